//! 进程内端点：把 ToolRegistry 包装为 Endpoint，与远程连接一起参与目录聚合与关闭顺序
//!
//! 本地工具只执行一次、不重试：流水线工具会修改状态，重复执行不是幂等的。
//! 超时后返回 Timeout 错误，由目录转成失败结果。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::mcp::{ConnectionState, Endpoint, McpError, RetryPolicy, ToolOutput};
use crate::tools::{ToolDescriptor, ToolRegistry};

pub struct LocalEndpoint {
    name: String,
    registry: ToolRegistry,
    timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl LocalEndpoint {
    pub fn new(name: impl Into<String>, registry: ToolRegistry, timeout_secs: u64) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            name: name.into(),
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            state,
        }
    }

    fn require_ready(&self) -> Result<(), McpError> {
        let state = *self.state.borrow();
        if state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(McpError::NotReady {
                server: self.name.clone(),
                state: state.to_string(),
            })
        }
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let claimed = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Uninitialized {
                *s = ConnectionState::Ready;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(McpError::NotReady {
                server: self.name.clone(),
                state: self.state().to_string(),
            });
        }
        tracing::info!(server = %self.name, tools = self.registry.len(), "Local tools ready");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.require_ready()?;
        Ok(self.registry.descriptors())
    }

    async fn execute_tool(&self, name: &str, args: Value, _policy: &RetryPolicy) -> Result<ToolOutput, McpError> {
        self.require_ready()?;
        match tokio::time::timeout(self.timeout, self.registry.execute(name, args)).await {
            Ok(Ok(content)) => Ok(ToolOutput::ok(content)),
            Ok(Err(message)) => Ok(ToolOutput::error(message)),
            Err(_) => Err(McpError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn cleanup(&self) {
        self.state.send_replace(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use serde_json::json;

    fn endpoint() -> LocalEndpoint {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        LocalEndpoint::new("local", registry, 5)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let ep = endpoint();
        assert!(ep.list_tools().await.is_err());
        ep.initialize().await.unwrap();
        let tools = ep.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");
        ep.cleanup().await;
        assert_eq!(ep.state(), ConnectionState::Closed);
        assert!(ep.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_tool_error_is_output_not_fault() {
        let ep = endpoint();
        ep.initialize().await.unwrap();
        let out = ep
            .execute_tool("echo", json!({}), &RetryPolicy::default())
            .await
            .unwrap();
        assert!(out.is_error);
        let out = ep
            .execute_tool("echo", json!({"text": "hey"}), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::ok("hey"));
    }
}
