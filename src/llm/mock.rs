//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! MockLlmClient：按可用工具走固定流程，以文本格式输出 Tool Call，便于本地跑通三种角色。
//! ScriptedLlmClient：按顺序返回预置回复，测试推理循环用。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::traits::{LlmClient, LlmError, RawAssistantTurn};
use crate::memory::{Message, Role};
use crate::tools::ToolDescriptor;

fn legacy_call(tool: &str, arguments: serde_json::Value) -> RawAssistantTurn {
    RawAssistantTurn::text(json!({"tool": tool, "arguments": arguments}).to_string())
}

/// Mock 客户端：react 角色回显用户输入，generator 创建计划，executor 加载并执行计划
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<RawAssistantTurn, LlmError> {
        let last_user_pos = messages.iter().rposition(|m| m.role == Role::User);
        let last_user = last_user_pos
            .map(|i| messages[i].content.as_str())
            .unwrap_or("(no input)");
        let observations: Vec<&Message> = messages[last_user_pos.map(|i| i + 1).unwrap_or(0)..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        let has = |name: &str| tools.iter().any(|t| t.name == name);
        let last_observation = observations.last().map(|m| m.content.as_str()).unwrap_or("");

        let turn = match observations.len() {
            0 if has("create_and_prepare_plan") => {
                legacy_call("create_and_prepare_plan", json!({"instruction": last_user}))
            }
            0 if has("auto_load_ready_plan") => legacy_call("auto_load_ready_plan", json!({})),
            0 if has("echo") => legacy_call("echo", json!({"text": format!("Echo from Mock: {last_user}")})),
            1 if has("execute_all_remaining_tasks") && last_observation.contains("\"plan_loaded\": true") => {
                legacy_call("execute_all_remaining_tasks", json!({}))
            }
            0 => RawAssistantTurn::text(format!("Mock answer: {last_user}")),
            _ => RawAssistantTurn::text(format!("Mock answer based on tool output:\n{last_observation}")),
        };
        Ok(turn)
    }
}

/// 预置回复的客户端；回复用尽后返回 Exhausted
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<RawAssistantTurn, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Result<RawAssistantTurn, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次请求收到的 transcript 快照
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<RawAssistantTurn, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|_| LlmError::Exhausted)?
            .pop_front()
            .unwrap_or(Err(LlmError::Exhausted))
    }
}
