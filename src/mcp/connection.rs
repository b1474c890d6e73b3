//! 单个 MCP 端点连接：建立、列出工具、带重试调用、释放
//!
//! 传输是封闭集合（stdio / streamable-http / sse），由 Session 枚举分发。
//! 会话句柄独占持有于 Mutex 中；cleanup 另有一把锁，使显式关闭与失败级联触发的并发清理合并为一次。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};

use crate::config::{ServerEntry, TransportConfig};
use crate::mcp::endpoint::{ConnectionState, Endpoint, ToolOutput};
use crate::mcp::http::StreamableHttpTransport;
use crate::mcp::retry::{retry_fixed, RetryPolicy};
use crate::mcp::sse::SseTransport;
use crate::mcp::stdio::StdioTransport;
use crate::mcp::types::{initialize_params, CallToolResult, ListToolsResult};
use crate::mcp::McpError;
use crate::tools::ToolDescriptor;

/// 已建立的传输会话
enum Session {
    Stdio(StdioTransport),
    StreamableHttp(StreamableHttpTransport),
    Sse(SseTransport),
}

impl Session {
    async fn open(server: &str, transport: &TransportConfig, timeout: Duration) -> Result<Self, McpError> {
        Ok(match transport {
            TransportConfig::Stdio(cfg) => Session::Stdio(StdioTransport::spawn(server, cfg, timeout)?),
            TransportConfig::StreamableHttp(cfg) => {
                Session::StreamableHttp(StreamableHttpTransport::new(server, cfg)?)
            }
            TransportConfig::Sse(cfg) => Session::Sse(SseTransport::connect(server, cfg).await?),
        })
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match self {
            Session::Stdio(t) => t.request(method, params).await,
            Session::StreamableHttp(t) => t.request(method, params).await,
            Session::Sse(t) => t.request(method, params).await,
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        match self {
            Session::Stdio(t) => t.notify(method, params).await,
            Session::StreamableHttp(t) => t.notify(method, params).await,
            Session::Sse(t) => t.notify(method, params).await,
        }
    }

    async fn close(&mut self) -> Result<(), McpError> {
        match self {
            Session::Stdio(t) => t.close().await,
            Session::StreamableHttp(t) => t.close().await,
            Session::Sse(t) => t.close().await,
        }
    }

    async fn handshake(&mut self) -> Result<(), McpError> {
        self.request("initialize", Some(initialize_params())).await?;
        self.notify("notifications/initialized", None).await
    }
}

/// stdio 请求默认的响应等待上限，与 tools.tool_timeout_secs 的默认值一致
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ToolEndpointConnection {
    name: String,
    transport: TransportConfig,
    request_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
    cleanup_lock: Mutex<()>,
}

impl ToolEndpointConnection {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            name: name.into(),
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state,
            session: Mutex::new(None),
            cleanup_lock: Mutex::new(()),
        }
    }

    pub fn from_entry(entry: &ServerEntry) -> Self {
        Self::new(entry.name.clone(), entry.transport.clone())
    }

    /// stdio 子进程的单次响应等待上限；远程传输使用各自配置中的超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.max(Duration::from_secs(1));
        self
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            tracing::debug!(server = %self.name, from = %prev, to = %state, "Connection state changed");
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

    /// 释放会话（若有）；错误只记录
    async fn release_session(&self) {
        let taken = self.session.lock().await.take();
        if let Some(mut session) = taken {
            if let Err(e) = session.close().await {
                tracing::warn!(server = %self.name, error = %e, "Error during cleanup");
            }
        }
    }

    async fn establish(&self) -> Result<(), McpError> {
        let session = Session::open(&self.name, &self.transport, self.request_timeout).await?;
        let mut guard = self.session.lock().await;
        let session = guard.insert(session);
        session.handshake().await
    }
}

#[async_trait]
impl Endpoint for ToolEndpointConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let claimed = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Uninitialized {
                *s = ConnectionState::Initializing;
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

        tracing::info!(server = %self.name, transport = %self.transport.kind(), "Initializing server");
        match self.establish().await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                tracing::info!(server = %self.name, "Server ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(server = %self.name, error = %e, "Error initializing server");
                self.release_session().await;
                self.set_state(ConnectionState::Failed);
                Err(match e {
                    McpError::Configuration(_) | McpError::Connection { .. } => e,
                    other => McpError::connection(&self.name, other),
                })
            }
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.require_ready()?;
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| McpError::Closed(format!("{} has no session", self.name)))?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result: ListToolsResult = serde_json::from_value(session.request("tools/list", params).await?)?;
            tools.extend(result.tools.into_iter().map(ToolDescriptor::from));
            match result.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        tracing::debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        policy: &RetryPolicy,
    ) -> Result<ToolOutput, McpError> {
        self.require_ready()?;
        let label = format!("{}/{}", self.name, name);
        let params = json!({ "name": name, "arguments": args });
        tracing::info!(server = %self.name, tool = %name, "Executing tool");

        retry_fixed(policy, &label, |_| {
            let params = params.clone();
            async move {
                let mut guard = self.session.lock().await;
                let session = guard
                    .as_mut()
                    .ok_or_else(|| McpError::Closed(format!("{} has no session", self.name)))?;
                let value = session.request("tools/call", Some(params)).await?;
                let result: CallToolResult = serde_json::from_value(value)?;
                Ok(ToolOutput {
                    content: result.joined_text(),
                    is_error: result.is_error,
                })
            }
        })
        .await
    }

    async fn cleanup(&self) {
        let _guard = self.cleanup_lock.lock().await;
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.release_session().await;
        self.set_state(ConnectionState::Closed);
        tracing::info!(server = %self.name, "Server cleaned up");
    }
}
