//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），以及边界处的调用归一化

pub mod deepseek;
pub mod mock;
pub mod normalize;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use normalize::{normalize, AssistantTurn};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RawAssistantTurn, RawToolCall};

/// 按 `[llm]` 配置创建客户端：openai | deepseek | mock
pub fn create_client(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, LlmError> {
    let client: Arc<dyn LlmClient> = match cfg.provider.as_str() {
        "mock" => Arc::new(MockLlmClient),
        "deepseek" => Arc::new(
            create_deepseek_client(Some(&cfg.model), cfg.api_key.as_deref())
                .with_sampling(cfg.temperature, cfg.max_tokens)
                .with_native_tools(cfg.native_tools)
                .with_timeout(cfg.timeout_secs),
        ),
        "openai" => Arc::new(
            OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, cfg.api_key.as_deref())
                .with_sampling(cfg.temperature, cfg.max_tokens)
                .with_native_tools(cfg.native_tools)
                .with_timeout(cfg.timeout_secs),
        ),
        other => return Err(LlmError::NotConfigured(format!("unknown provider '{other}'"))),
    };
    tracing::info!(provider = %cfg.provider, model = %cfg.model, "LLM client ready");
    Ok(client)
}
