//! 会话级错误类型
//!
//! 各层错误（连接、LLM、流水线）在组装会话时汇总为 AgentError，main 再用 anyhow 加上下文。

use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp::McpError;
use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Tool server error: {0}")]
    Mcp(#[from] McpError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Cancelled by user")]
    Cancelled,
}
