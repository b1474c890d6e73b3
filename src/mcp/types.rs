//! JSON-RPC 2.0 与 MCP 协议类型
//!
//! 三种传输（stdio / Streamable HTTP / SSE）共用同一套线格式。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 客户端声明的协议版本
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 通知（无 id，不期待响应）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 响应（成功或错误）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 请求 id：数字或字符串
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl RpcId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcId::Number(n) => Some(*n),
            RpcId::String(s) => s.parse().ok(),
        }
    }
}

/// 标准 JSON-RPC 错误码
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// 服务端 tools/list 返回的单个工具
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// tools/call 结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

/// 结果内容块；非文本块原样保留，拼接时以 JSON 呈现
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Text {
        #[serde(rename = "type")]
        kind: TextKind,
        text: String,
    },
    Other(Value),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Text,
}

impl CallToolResult {
    /// 拼接所有内容块为一段文本
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text, .. } => text.clone(),
                ToolContent::Other(v) => v.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// initialize 请求参数
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "tandem",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_error_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"bad"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id.as_i64(), Some(3));
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_call_tool_result_joined_text() {
        let raw = r#"{"content":[{"type":"text","text":"a"},{"type":"image","data":"x"},{"type":"text","text":"b"}],"isError":false}"#;
        let result: CallToolResult = serde_json::from_str(raw).unwrap();
        let joined = result.joined_text();
        assert!(joined.starts_with("a\n"));
        assert!(joined.ends_with("\nb"));
        assert!(joined.contains("image"));
        assert!(!result.is_error);
    }

    #[test]
    fn test_list_tools_with_cursor() {
        let raw = r#"{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object"}}],"nextCursor":"p2"}"#;
        let result: ListToolsResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.tools[0].name, "echo");
        assert_eq!(result.next_cursor.as_deref(), Some("p2"));
    }
}
