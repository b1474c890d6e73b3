//! stdio 传输端到端：用 sh 脚本扮演 MCP 服务器
//!
//! 脚本按行读取 JSON-RPC 请求，回应 initialize / tools/list / tools/call：
//! - echo：回显 text 参数
//! - flaky：第一次返回内部错误，之后成功
//! - strict：总是返回参数错误
//! - hang：不回应（未在 tools/list 中列出）

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use tandem::config::{StdioConfig, TransportConfig};
use tandem::mcp::{ConnectionGroup, ConnectionState, Endpoint, McpError, RetryPolicy, ToolEndpointConnection};
use tandem::memory::ToolCall;
use tandem::tools::{EchoTool, LocalEndpoint, ToolCatalog, ToolRegistry};

const FAKE_SERVER: &str = r#"
flaky=0
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      echo "fake server starting"
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1"}}}'
      ;;
    *'"method":"tools/list"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}},{"name":"flaky","description":"Fails once","inputSchema":{"type":"object"}},{"name":"strict","inputSchema":{"type":"object"}}]}}'
      ;;
    *'"name":"echo"'*)
      text=$(printf '%s\n' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"content":[{"type":"text","text":"remote: '"$text"'"}]}}'
      ;;
    *'"name":"flaky"'*)
      flaky=$((flaky + 1))
      if [ "$flaky" -lt 2 ]; then
        echo '{"jsonrpc":"2.0","id":'"$id"',"error":{"code":-32603,"message":"warming up"}}'
      else
        echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"content":[{"type":"text","text":"ok after '"$flaky"' attempts"}]}}'
      fi
      ;;
    *'"name":"strict"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"error":{"code":-32602,"message":"missing field"}}'
      ;;
    *'"name":"hang"'*)
      ;;
  esac
done
"#;

fn write_server(dir: &Path) -> String {
    let path = dir.join("fake_mcp.sh");
    std::fs::write(&path, FAKE_SERVER).unwrap();
    path.to_string_lossy().into_owned()
}

fn sh(script: &str) -> TransportConfig {
    TransportConfig::Stdio(StdioConfig {
        command: "sh".to_string(),
        args: vec![script.to_string()],
        env: Default::default(),
    })
}

fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }
}

#[tokio::test]
async fn test_initialize_list_call_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let conn = ToolEndpointConnection::new("fake", sh(&write_server(dir.path())));
    assert_eq!(conn.transport_kind(), "stdio");

    conn.initialize().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);

    let tools = conn.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "flaky", "strict"]);

    let out = conn
        .execute_tool("echo", json!({"text": "hello"}), &RetryPolicy::new(1, 10))
        .await
        .unwrap();
    assert_eq!(out.content, "remote: hello");
    assert!(!out.is_error);

    conn.cleanup().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.list_tools().await, Err(McpError::NotReady { .. })));
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let conn = ToolEndpointConnection::new("fake", sh(&write_server(dir.path())));
    conn.initialize().await.unwrap();

    let out = conn
        .execute_tool("flaky", json!({}), &RetryPolicy::new(3, 10))
        .await
        .unwrap();
    assert_eq!(out.content, "ok after 2 attempts");
    conn.cleanup().await;
}

#[tokio::test]
async fn test_single_attempt_surfaces_transient_error() {
    let dir = tempfile::tempdir().unwrap();
    let conn = ToolEndpointConnection::new("fake", sh(&write_server(dir.path())));
    conn.initialize().await.unwrap();

    let err = conn
        .execute_tool("flaky", json!({}), &RetryPolicy::new(1, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32603, .. }));
    conn.cleanup().await;
}

#[tokio::test]
async fn test_silent_server_times_out_and_session_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let conn = ToolEndpointConnection::new("fake", sh(&write_server(dir.path())))
        .with_request_timeout(Duration::from_secs(1));
    conn.initialize().await.unwrap();

    let started = Instant::now();
    let err = conn
        .execute_tool("hang", json!({}), &RetryPolicy::new(1, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout(1)));
    assert!(started.elapsed() < Duration::from_secs(5));

    // 之后的请求按 id 匹配，不受未应答请求影响
    let out = conn
        .execute_tool("echo", json!({"text": "still here"}), &RetryPolicy::new(1, 10))
        .await
        .unwrap();
    assert_eq!(out.content, "remote: still here");

    conn.cleanup().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_catalog_prefers_local_tools_and_reports_failures() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_server(dir.path());

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let local: Arc<dyn Endpoint> = Arc::new(LocalEndpoint::new("local", registry, 5));
    let remote: Arc<dyn Endpoint> = Arc::new(ToolEndpointConnection::new("fake", sh(&script)));
    let group = Arc::new(ConnectionGroup::new().with(Arc::clone(&local)).with(Arc::clone(&remote)));
    group.initialize_all().await.unwrap();

    let catalog = ToolCatalog::aggregate(group.endpoints(), RetryPolicy::new(3, 10)).await;
    assert_eq!(catalog.tool_names(), vec!["echo", "flaky", "strict"]);
    assert_eq!(catalog.owner_of("echo"), Some("local"));
    assert_eq!(catalog.owner_of("flaky"), Some("fake"));

    let echoed = catalog.invoke(&call("echo", json!({"text": "hi"}))).await;
    assert!(echoed.success);
    assert_eq!(echoed.content, "hi");

    let strict = catalog.invoke(&call("strict", json!({}))).await;
    assert!(!strict.success);
    assert!(strict.content.contains("missing field"));

    let missing = catalog.invoke(&call("nope", json!({}))).await;
    assert!(!missing.success);
    assert_eq!(missing.call_id, "call_nope");

    group.guard().shutdown().await;
    assert_eq!(local.state(), ConnectionState::Closed);
    assert_eq!(remote.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_failed_second_server_rolls_back_first() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_server(dir.path());

    let first: Arc<dyn Endpoint> = Arc::new(ToolEndpointConnection::new("fake", sh(&script)));
    let broken: Arc<dyn Endpoint> = Arc::new(ToolEndpointConnection::new(
        "broken",
        TransportConfig::Stdio(StdioConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 0".to_string()],
            env: Default::default(),
        }),
    ));
    let group = ConnectionGroup::new().with(Arc::clone(&first)).with(Arc::clone(&broken));

    let err = group.initialize_all().await.unwrap_err();
    assert!(matches!(err, McpError::Connection { .. }));
    assert_eq!(first.state(), ConnectionState::Closed);
    assert_eq!(broken.state(), ConnectionState::Failed);
}
