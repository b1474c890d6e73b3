//! OpenAI 兼容 API 客户端
//!
//! 直接用 reqwest 调用 `<base_url>/chat/completions`（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! native_tools 开启时发送 tools 定义并读取原生 tool_calls；关闭时工具结果以 user 消息回填，
//! 由模型按文本格式输出调用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::traits::{LlmClient, LlmError, RawAssistantTurn, RawToolCall};
use crate::memory::{Message, Role};
use crate::tools::ToolDescriptor;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    native_tools: bool,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            native_tools: true,
            usage: TokenUsage::new(),
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }

    /// 单次请求总超时
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(messages, self.native_tools),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if self.native_tools && !tools.is_empty() {
            let specs: Vec<Value> = tools.iter().map(ToolDescriptor::to_function_spec).collect();
            body["tools"] = Value::Array(specs);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// transcript → Chat API 消息；非原生模式下不发送 tool 角色
fn to_wire_messages(messages: &[Message], native_tools: bool) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => json!({"role": "system", "content": m.content}),
            Role::User => json!({"role": "user", "content": m.content}),
            Role::Assistant if native_tools && !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        let arguments = match &c.arguments {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": arguments},
                        })
                    })
                    .collect();
                json!({"role": "assistant", "content": m.content, "tool_calls": calls})
            }
            Role::Assistant => json!({"role": "assistant", "content": m.content}),
            Role::Tool if native_tools => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }),
            Role::Tool => json!({
                "role": "user",
                "content": format!(
                    "Observation ({}): {}",
                    m.tool_call_id.as_deref().unwrap_or("tool"),
                    m.content
                ),
            }),
        })
        .collect()
}

fn parse_response(resp: ChatResponse) -> Result<(RawAssistantTurn, Option<(u64, u64)>), LlmError> {
    let usage = resp.usage.map(|u| (u.prompt_tokens, u.completion_tokens));
    let message = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("missing choices[0].message".into()))?
        .message;
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| RawToolCall {
            id: c.id,
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();
    Ok((
        RawAssistantTurn {
            content: message.content.unwrap_or_default(),
            tool_calls,
        },
        usage,
    ))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<RawAssistantTurn, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(url = %url, model = %self.model, messages = messages.len(), "LLM request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, tools))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let resp: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let (turn, usage) = parse_response(resp)?;
        if let Some((prompt, completion)) = usage {
            self.usage.add(prompt, completion);
        }
        Ok(turn)
    }
}
