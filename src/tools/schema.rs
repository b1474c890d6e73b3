//! 工具相关 JSON Schema 生成（schemars）
//!
//! - `args_schema::<T>()`：由参数结构体生成工具的 inputSchema，字段文档即参数说明
//! - `tool_call_schema_json()`：不支持原生 tool calling 的模型，把合法调用格式注入 system prompt

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

/// 文本调用格式：`{"tool": "...", "arguments": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是可用工具列表中的一个
    pub tool: String,
    /// 工具参数对象，字段依工具而定
    pub arguments: Map<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 参数结构体 → 对象型 JSON Schema
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Sample {
        /// Task text
        content: String,
        /// Parent task number
        parent: Option<usize>,
    }

    #[test]
    fn test_args_schema_keeps_docs_and_required() {
        let schema = args_schema::<Sample>();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["content"]["description"], "Task text");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &vec![Value::String("content".into())]);
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_call_format_mentions_arguments() {
        let s = tool_call_schema_json();
        assert!(s.contains("\"tool\""));
        assert!(s.contains("\"arguments\""));
    }
}
