//! 工具描述：名称、说明、参数表（从 inputSchema 解析），列出后不可变

use serde::Serialize;
use serde_json::{json, Value};

use crate::mcp::types::ToolInfo;

/// 单个参数：说明与是否必填
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    /// 原始 JSON Schema，原生函数调用时直接作为 parameters 下发
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let params = input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, info)| ParamSpec {
                        name: name.clone(),
                        description: info
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("No description")
                            .to_string(),
                        required: required.contains(&name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            params,
            input_schema,
        }
    }

    /// 渲染为提示词中的一段工具说明
    pub fn format_for_prompt(&self) -> String {
        let args = self
            .params
            .iter()
            .map(|p| {
                let mut line = format!("- {}: {}", p.name, p.description);
                if p.required {
                    line.push_str(" (required)");
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Tool: {}\nDescription: {}\nArguments:\n{}\n",
            self.name, self.description, args
        )
    }

    /// OpenAI Chat Completions `tools` 数组中的一项
    pub fn to_function_spec(&self) -> Value {
        let parameters = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            json!({ "type": "object", "properties": {} })
        };
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }
}

impl From<ToolInfo> for ToolDescriptor {
    fn from(info: ToolInfo) -> Self {
        ToolDescriptor::new(info.name, info.description.unwrap_or_default(), info.input_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_marks_required() {
        let d = ToolDescriptor::new(
            "add_task",
            "Append a task",
            json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Task text"},
                    "parent": {"type": "integer"}
                },
                "required": ["content"]
            }),
        );
        let text = d.format_for_prompt();
        assert!(text.starts_with("Tool: add_task\nDescription: Append a task\nArguments:\n"));
        assert!(text.contains("- content: Task text (required)"));
        assert!(text.contains("- parent: No description\n"));
    }

    #[test]
    fn test_missing_schema_yields_no_params() {
        let d = ToolDescriptor::new("ping", "Ping", Value::Null);
        assert!(d.params.is_empty());
        assert_eq!(d.to_function_spec()["function"]["parameters"]["type"], "object");
    }
}
