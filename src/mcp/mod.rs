//! MCP 工具端点：JSON-RPC 类型、三种传输、连接生命周期、重试与端点组

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod http;
pub mod retry;
pub mod sse;
pub mod stdio;
pub mod types;

pub use connection::ToolEndpointConnection;
pub use endpoint::{ConnectionState, Endpoint, ToolOutput};
pub use error::McpError;
pub use group::{ConnectionGroup, GroupGuard};
pub use retry::{retry_fixed, RetryPolicy};
pub use sse::{SseDecoder, SseEvent};
