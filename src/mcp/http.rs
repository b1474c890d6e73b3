//! Streamable HTTP 传输
//!
//! 每个 JSON-RPC 消息一次 POST；响应可以是 application/json，也可以是携带响应的 SSE 流。
//! 服务端在响应头 `Mcp-Session-Id` 中下发会话 id，后续请求原样带回；关闭时可选发送 DELETE 结束会话。

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::mcp::sse::SseDecoder;
use crate::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::McpError;

pub const SESSION_HEADER: &str = "mcp-session-id";

const STREAMABLE_CONNECT_TIMEOUT_SECS: u64 = 30;
const SSE_CONNECT_TIMEOUT_SECS: u64 = 5;
const STREAM_READ_TIMEOUT_SECS: u64 = 300;

/// 远程传输的两级超时：短连接超时与长流读取超时
#[derive(Debug, Clone, Copy)]
pub(crate) struct RemoteTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl RemoteTimeouts {
    fn resolve(server: &str, cfg: &RemoteConfig, default_connect: u64) -> Result<Self, McpError> {
        let connect = cfg.timeout_secs.unwrap_or(default_connect);
        let read = cfg.sse_read_timeout_secs.unwrap_or(STREAM_READ_TIMEOUT_SECS);
        if connect == 0 || read == 0 {
            return Err(McpError::Configuration(format!(
                "server '{server}': timeouts must be greater than zero"
            )));
        }
        Ok(Self {
            connect: Duration::from_secs(connect),
            read: Duration::from_secs(read),
        })
    }

    pub fn for_streamable(server: &str, cfg: &RemoteConfig) -> Result<Self, McpError> {
        Self::resolve(server, cfg, STREAMABLE_CONNECT_TIMEOUT_SECS)
    }

    pub fn for_sse(server: &str, cfg: &RemoteConfig) -> Result<Self, McpError> {
        Self::resolve(server, cfg, SSE_CONNECT_TIMEOUT_SECS)
    }
}

/// 自定义 header + Bearer 凭据
pub(crate) fn build_headers(server: &str, cfg: &RemoteConfig) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    for (k, v) in &cfg.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| McpError::Configuration(format!("server '{server}': invalid header '{k}': {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| McpError::Configuration(format!("server '{server}': invalid value for '{k}': {e}")))?;
        headers.insert(name, value);
    }
    if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| McpError::Configuration(format!("server '{server}': invalid api_key: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

pub struct StreamableHttpTransport {
    server: String,
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    session_id: Option<String>,
    read_timeout: Duration,
    terminate_on_close: bool,
    next_id: i64,
}

impl StreamableHttpTransport {
    /// 仅校验配置并构建客户端；握手由连接层随后发起
    pub fn new(server: &str, cfg: &RemoteConfig) -> Result<Self, McpError> {
        let url = Url::parse(cfg.url.trim())
            .map_err(|e| McpError::Configuration(format!("server '{server}': invalid url '{}': {e}", cfg.url)))?;
        let headers = build_headers(server, cfg)?;
        let timeouts = RemoteTimeouts::for_streamable(server, cfg)?;
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| McpError::connection(server, e))?;

        Ok(Self {
            server: server.to_string(),
            client,
            url,
            headers,
            session_id: None,
            read_timeout: timeouts.read,
            terminate_on_close: cfg.terminate_on_close,
            next_id: 1,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// POST 一条消息；通知返回 None（202 Accepted），请求返回匹配 id 的响应
    async fn post(&mut self, body: &Value, expect_id: Option<i64>) -> Result<Option<JsonRpcResponse>, McpError> {
        let mut req = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(sid) = &self.session_id {
            req = req.header(SESSION_HEADER, sid);
        }

        let resp = req.send().await?;
        if let Some(sid) = resp.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            if self.session_id.as_deref() != Some(sid) {
                tracing::debug!(server = %self.server, session_id = %sid, "Session established");
                self.session_id = Some(sid.to_string());
            }
        }

        let status = resp.status();
        if status == StatusCode::ACCEPTED || expect_id.is_none() {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {text}")));
        }

        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_stream {
            let parsed: JsonRpcResponse = resp.json().await?;
            return Ok(Some(parsed));
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = match stream.next().await {
                Some(chunk) => chunk?,
                None => return Err(McpError::Closed(format!("{} response stream ended", self.server))),
            };
            for ev in decoder.push(&chunk) {
                if ev.event != "message" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&ev.data) else {
                    continue;
                };
                if parsed.id.as_i64() == expect_id {
                    return Ok(Some(parsed));
                }
            }
        }
    }

    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.server, method = %method, id, "Posting request");

        let read_timeout = self.read_timeout;
        let resp = tokio::time::timeout(read_timeout, self.post(&body, Some(id)))
            .await
            .map_err(|_| McpError::Timeout(read_timeout.as_secs()))??
            .ok_or_else(|| McpError::Transport(format!("{method}: empty response")))?;
        match resp.error {
            Some(err) => Err(err.into()),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let body = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.post(&body, None).await.map(|_| ())
    }

    /// 若启用 terminate_on_close 且已有会话，发送 DELETE 结束会话；服务端返回 405 表示不支持，视为成功
    pub async fn close(&mut self) -> Result<(), McpError> {
        let Some(sid) = self.session_id.take() else {
            return Ok(());
        };
        if !self.terminate_on_close {
            return Ok(());
        }
        let resp = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, sid)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(McpError::Transport(format!("session DELETE returned HTTP {status}")))
        }
    }
}
