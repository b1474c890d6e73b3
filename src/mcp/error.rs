//! 工具端点错误类型

use crate::mcp::types::{error_codes, JsonRpcError};

/// 端点连接与调用过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// 连接参数缺失或非法（空命令、非法 URL、非法 header 等）
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 传输建立失败（进程启动、握手、HTTP 连接）
    #[error("Connection error ({server}): {message}")]
    Connection { server: String, message: String },

    /// 在非 Ready 状态调用操作
    #[error("Server '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },

    /// 服务端返回的 JSON-RPC 错误
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// 通道已关闭（进程退出、流结束）
    #[error("Channel closed: {0}")]
    Closed(String),
}

impl McpError {
    pub fn connection(server: &str, err: impl std::fmt::Display) -> Self {
        McpError::Connection {
            server: server.to_string(),
            message: err.to_string(),
        }
    }

    /// 是否值得重试：参数校验类与契约类 RPC 错误不重试，其余（传输、超时、服务端内部错误）重试
    pub fn is_retryable(&self) -> bool {
        match self {
            McpError::Rpc { code, .. } => {
                *code != error_codes::INVALID_PARAMS && *code != error_codes::METHOD_NOT_FOUND
            }
            McpError::Configuration(_) | McpError::NotReady { .. } => false,
            _ => true,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}
