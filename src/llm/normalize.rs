//! 在 LLM 边界把两种调用写法统一成 ToolCall
//!
//! - 原生：`tool_calls: [{id, function: {name, arguments: "<json>"}}]`
//! - 文本：回复内容本身是 `{"tool": "...", "arguments": {...}}`，可包在 ```json 代码块中，`args` 作为别名
//!
//! 缺失的 id 按 `call_<轮次>_<序号>` 生成；无法解析的参数字符串原样保留为 JSON 字符串，调用时显式失败。

use serde::Deserialize;
use serde_json::Value;

use crate::llm::traits::RawAssistantTurn;
use crate::memory::ToolCall;

/// 归一化后的助手回复
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct LegacyCall {
    tool: String,
    #[serde(default, alias = "args")]
    arguments: Option<Value>,
}

fn synthesized_id(iteration: usize, index: usize) -> String {
    format!("call_{iteration}_{index}")
}

fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// 从文本中取出 JSON 片段：优先 ```json 代码块，其次首个 `{` 到最后一个 `}`
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn parse_legacy(content: &str) -> Option<(String, Value)> {
    let json = extract_json(content)?;
    let parsed: LegacyCall = serde_json::from_str(json).ok()?;
    if parsed.tool.trim().is_empty() {
        return None;
    }
    let args = parsed
        .arguments
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some((parsed.tool, args))
}

/// iteration 为本次 step 内的轮次（从 1 开始），仅用于生成 id
pub fn normalize(raw: RawAssistantTurn, iteration: usize) -> AssistantTurn {
    if !raw.tool_calls.is_empty() {
        let calls = raw
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCall {
                id: c
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| synthesized_id(iteration, i)),
                name: c.name,
                arguments: parse_arguments(&c.arguments),
            })
            .collect();
        return AssistantTurn {
            content: raw.content,
            calls,
        };
    }

    let calls = match parse_legacy(&raw.content) {
        Some((name, arguments)) => vec![ToolCall {
            id: synthesized_id(iteration, 0),
            name,
            arguments,
        }],
        None => Vec::new(),
    };
    AssistantTurn {
        content: raw.content,
        calls,
    }
}
