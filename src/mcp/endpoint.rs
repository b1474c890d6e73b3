//! 端点能力接口：所有端点（远程 MCP 连接与进程内本地端点）统一实现

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::mcp::{McpError, RetryPolicy};
use crate::tools::ToolDescriptor;

/// 连接生命周期状态；Closed 为终态，Failed / Closed 之后不可再次初始化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// 工具调用结果；is_error 表示工具自身报告失败（不是传输故障，不重试）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// 端点：initialize / list_tools / execute_tool / cleanup
///
/// cleanup 必须幂等且不返回错误：它运行在已经失败的路径上，不能掩盖原始错误。
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// 一次性初始化；失败时端点自行释放已获取的资源并进入 Failed
    async fn initialize(&self) -> Result<(), McpError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        policy: &RetryPolicy,
    ) -> Result<ToolOutput, McpError>;

    async fn cleanup(&self);
}
