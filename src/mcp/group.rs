//! 端点组：按注册顺序初始化，任一失败则逆序回滚已就绪的端点；关闭时严格逆序
//!
//! GroupGuard 提供作用域式的释放保证：正常路径显式 `shutdown().await`，
//! 若因错误或取消提前离开作用域，Drop 时在后台补做逆序关闭。

use std::sync::Arc;

use crate::mcp::endpoint::{ConnectionState, Endpoint};
use crate::mcp::McpError;

#[derive(Default)]
pub struct ConnectionGroup {
    endpoints: Vec<Arc<dyn Endpoint>>,
}

impl ConnectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.push(endpoint);
    }

    pub fn with(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.register(endpoint);
        self
    }

    /// 注册顺序
    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// 全部初始化；第 k 个失败时，只对 k 之前的端点按 k-1..0 逆序 cleanup，然后返回该错误
    pub async fn initialize_all(&self) -> Result<(), McpError> {
        for (k, endpoint) in self.endpoints.iter().enumerate() {
            if let Err(e) = endpoint.initialize().await {
                tracing::error!(
                    server = %endpoint.name(),
                    index = k,
                    error = %e,
                    "Initialization failed, rolling back {} ready server(s)",
                    k
                );
                for earlier in self.endpoints[..k].iter().rev() {
                    earlier.cleanup().await;
                }
                return Err(e);
            }
        }
        tracing::info!(count = self.endpoints.len(), "All servers initialized");
        Ok(())
    }

    /// 逆序关闭全部端点；每个端点独立尝试，互不影响
    pub async fn shutdown(&self) {
        for endpoint in self.endpoints.iter().rev() {
            if endpoint.state() != ConnectionState::Closed {
                endpoint.cleanup().await;
            }
        }
    }

    pub fn guard(self: &Arc<Self>) -> GroupGuard {
        GroupGuard {
            group: Some(Arc::clone(self)),
        }
    }
}

/// 作用域守卫：持有期间端点组视为在用
pub struct GroupGuard {
    group: Option<Arc<ConnectionGroup>>,
}

impl GroupGuard {
    /// 显式逆序关闭并解除守卫
    pub async fn shutdown(mut self) {
        if let Some(group) = self.group.take() {
            group.shutdown().await;
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Connection group dropped without shutdown, cleaning up in background");
                handle.spawn(async move { group.shutdown().await });
            }
            Err(_) => tracing::warn!("Connection group dropped outside a runtime; child processes are killed on drop"),
        }
    }
}
