//! SSE 解码与旧版 SSE 传输
//!
//! SseDecoder 按行缓冲字节流，空行分隔事件；Streamable HTTP 的 SSE 响应体也复用它。
//! 旧版 SSE 传输：GET 建立推送流，等待 `endpoint` 事件给出 POST 地址，
//! 之后请求 POST 到该地址，响应以 `message` 事件推回，按 JSON-RPC id 分发给等待方。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::RemoteConfig;
use crate::mcp::http::{build_headers, RemoteTimeouts};
use crate::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::McpError;

/// 单个 SSE 事件；未声明 event 字段时类型为 "message"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// 增量 SSE 解码器：可跨 chunk 边界（含 UTF-8 多字节字符被切开的情况）
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节，返回本次凑齐的完整事件
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(ev) = self.dispatch() {
                    events.push(ev);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id / retry 不影响请求-响应匹配
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct SseTransport {
    server: String,
    client: reqwest::Client,
    headers: HeaderMap,
    endpoint: Url,
    pending: Pending,
    reader: JoinHandle<()>,
    read_timeout: Duration,
    next_id: i64,
}

impl SseTransport {
    /// 打开推送流并等待 endpoint 事件；两者合计受连接超时约束
    pub async fn connect(server: &str, cfg: &RemoteConfig) -> Result<Self, McpError> {
        let url = Url::parse(cfg.url.trim())
            .map_err(|e| McpError::Configuration(format!("server '{server}': invalid url '{}': {e}", cfg.url)))?;
        let headers = build_headers(server, cfg)?;
        let timeouts = RemoteTimeouts::for_sse(server, cfg)?;

        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| McpError::connection(server, e))?;

        tracing::info!(server = %server, url = %url, "Opening SSE stream");
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();

        let open = async {
            let resp = client
                .get(url.clone())
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(|e| McpError::connection(server, e))?;
            if !resp.status().is_success() {
                return Err(McpError::connection(server, format!("HTTP {}", resp.status())));
            }
            Ok(resp)
        };
        let resp = tokio::time::timeout(timeouts.connect, open)
            .await
            .map_err(|_| McpError::connection(server, format!("timed out after {}s", timeouts.connect.as_secs())))??;

        let reader = tokio::spawn(read_events(
            server.to_string(),
            url,
            resp,
            endpoint_tx,
            Arc::clone(&pending),
            timeouts.read,
        ));

        let endpoint = match tokio::time::timeout(timeouts.connect, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::connection(server, "stream ended before endpoint event"));
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::connection(server, "no endpoint event within connect timeout"));
            }
        };
        tracing::debug!(server = %server, endpoint = %endpoint, "SSE endpoint resolved");

        Ok(Self {
            server: server.to_string(),
            client,
            headers,
            endpoint,
            pending,
            reader,
            read_timeout: timeouts.read,
            next_id: 1,
        })
    }

    async fn post(&self, body: &Value) -> Result<(), McpError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {text}")));
        }
        Ok(())
    }

    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.reader.is_finished() {
            return Err(McpError::Closed(format!("{} event stream ended", self.server)));
        }
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.server, method = %method, id, "Posting request");
        if let Err(e) = self.post(&body).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.read_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpError::Closed(format!("{} event stream ended", self.server))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout(self.read_timeout.as_secs()));
            }
        };
        match resp.error {
            Some(err) => Err(err.into()),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let body = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.post(&body).await
    }

    /// 停止读取任务，丢弃所有等待方
    pub async fn close(&mut self) -> Result<(), McpError> {
        self.reader.abort();
        self.pending.lock().await.clear();
        Ok(())
    }
}

async fn read_events(
    server: String,
    base: Url,
    resp: reqwest::Response,
    endpoint_tx: oneshot::Sender<Url>,
    pending: Pending,
    read_timeout: Duration,
) {
    let mut stream = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let chunk = match tokio::time::timeout(read_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                tracing::warn!(server = %server, error = %e, "SSE stream error");
                break;
            }
            Ok(None) => {
                tracing::debug!(server = %server, "SSE stream closed by server");
                break;
            }
            Err(_) => {
                tracing::warn!(server = %server, "SSE stream idle for {}s, closing", read_timeout.as_secs());
                break;
            }
        };

        for ev in decoder.push(&chunk) {
            match ev.event.as_str() {
                "endpoint" => match base.join(ev.data.trim()) {
                    Ok(url) => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => tracing::warn!(server = %server, error = %e, "Invalid endpoint event"),
                },
                "message" => {
                    let resp: JsonRpcResponse = match serde_json::from_str(&ev.data) {
                        Ok(r) => r,
                        Err(_) => {
                            tracing::debug!(server = %server, "Ignoring non-response message");
                            continue;
                        }
                    };
                    let Some(id) = resp.id.as_i64() else { continue };
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
                other => tracing::debug!(server = %server, event = %other, "Ignoring SSE event"),
            }
        }
    }

    // 流结束：所有等待方收到 Closed
    pending.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_splits_events_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"event: endpoint\ndata: /messages?session").is_empty());
        let events = d.push(b"_id=abc\n\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".into(),
                    data: "/messages?session_id=abc".into()
                },
                SseEvent {
                    event: "message".into(),
                    data: "{\"a\":1}".into()
                },
            ]
        );
    }

    #[test]
    fn test_decoder_multiline_data_and_comments() {
        let mut d = SseDecoder::new();
        let events = d.push(b": ping\r\ndata: line1\r\ndata: line2\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_decoder_utf8_split() {
        let mut d = SseDecoder::new();
        let bytes = "data: 你好\n\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(d.push(a).is_empty());
        let events = d.push(b);
        assert_eq!(events[0].data, "你好");
    }

    #[test]
    fn test_endpoint_resolves_relative_to_stream_url() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let url = base.join("/messages/?session_id=1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/messages/?session_id=1");
    }
}
