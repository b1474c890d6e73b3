//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：给定 transcript 与可用工具，
//! 返回一条原始助手回复（文本 + 零或多个原生 tool_calls）。两种调用写法在 normalize 中统一。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolDescriptor;

/// 后端返回的原生工具调用；arguments 保持接口给出的 JSON 字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// 未归一化的助手回复
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAssistantTurn {
    pub content: String,
    pub tool_calls: Vec<RawToolCall>,
}

impl RawAssistantTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("scripted responses exhausted")]
    Exhausted,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// tools 为空时不发送工具定义
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<RawAssistantTurn, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
