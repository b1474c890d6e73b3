//! 核心层：会话错误与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::AgentError;
pub use shutdown::{run_until_shutdown, ShutdownManager, ShutdownReason};
