//! ReAct 主循环
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan；最大步数限制，取消令牌。
//! 每次 step 必定产生一条 assistant 回复：LLM 出错时给出自然语言错误说明，步数耗尽时给出固定提示。
//! 可选 event_tx：向终端等前端推送 Thinking / ToolCall / Observation / Answer。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::llm::{normalize, LlmClient};
use crate::memory::{Message, Transcript};
use crate::react::ReactEvent;
use crate::tools::{ToolCatalog, ToolDescriptor};

/// 单次请求默认最大轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const BUDGET_EXHAUSTED_MESSAGE: &str = "I've reached the maximum number of tool calls for this request.";
const CANCELLED_MESSAGE: &str = "Request cancelled.";
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

/// 一次 step 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub answer: String,
    /// 本次 step 是否执行过工具
    pub acted: bool,
    pub iterations: usize,
    pub tool_calls: usize,
    /// 因步数上限结束
    pub exhausted: bool,
}

pub fn llm_error_answer(err: impl std::fmt::Display) -> String {
    format!("I encountered an error: {err}. Please try again or rephrase your request.")
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

pub struct ReasoningLoop {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    descriptors: Vec<ToolDescriptor>,
    transcript: Transcript,
    max_iterations: usize,
    cancel_token: CancellationToken,
    event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl ReasoningLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<ToolCatalog>,
        system_prompt: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        let descriptors = catalog.descriptor_list();
        Self {
            llm,
            catalog,
            descriptors,
            transcript: Transcript::new(system_prompt),
            max_iterations: max_iterations.max(1),
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// 清空对话，保留 system prompt
    pub fn reset(&mut self) {
        self.transcript.reset();
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn finish(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        self.transcript.push(Message::assistant(outcome.answer.clone()));
        outcome
    }

    /// 处理一条用户输入，直到 LLM 给出不含工具调用的回复或达到步数上限
    pub async fn step(&mut self, user_input: &str) -> TurnOutcome {
        self.transcript.push(Message::user(user_input));
        let mut acted = false;
        let mut tool_calls = 0;

        for iteration in 1..=self.max_iterations {
            self.send_event(ReactEvent::StepUpdate {
                step: iteration,
                max_steps: self.max_iterations,
            });
            if self.cancel_token.is_cancelled() {
                self.send_event(ReactEvent::Error {
                    text: "Cancelled by user".to_string(),
                });
                return self.finish(TurnOutcome {
                    answer: CANCELLED_MESSAGE.to_string(),
                    acted,
                    iterations: iteration - 1,
                    tool_calls,
                    exhausted: false,
                });
            }

            self.send_event(ReactEvent::Thinking);
            let raw = match self.llm.complete(self.transcript.messages(), &self.descriptors).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(error = %e, iteration, "LLM request failed");
                    self.send_event(ReactEvent::Error { text: e.to_string() });
                    return self.finish(TurnOutcome {
                        answer: llm_error_answer(&e),
                        acted,
                        iterations: iteration,
                        tool_calls,
                        exhausted: false,
                    });
                }
            };
            let turn = normalize(raw, iteration);

            if turn.calls.is_empty() {
                tracing::debug!(iteration, "Final answer");
                self.send_event(ReactEvent::Answer {
                    text: turn.content.clone(),
                });
                let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
                self.send_event(ReactEvent::TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                });
                return self.finish(TurnOutcome {
                    answer: turn.content,
                    acted,
                    iterations: iteration,
                    tool_calls,
                    exhausted: false,
                });
            }

            if !turn.content.trim().is_empty() {
                self.send_event(ReactEvent::ThinkingContent {
                    text: preview(&turn.content, THINKING_PREVIEW_CHARS),
                });
            }
            let calls = turn.calls.clone();
            self.transcript
                .push(Message::assistant_with_calls(turn.content, turn.calls));

            // 同一轮的多个调用严格按发出顺序依次执行
            for call in &calls {
                tracing::info!(tool = %call.name, call_id = %call.id, iteration, "Tool call");
                self.send_event(ReactEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    server: self.catalog.owner_of(&call.name).map(str::to_string),
                    args: call.arguments.clone(),
                });
                let result = self.catalog.invoke(call).await;
                self.send_event(ReactEvent::Observation {
                    id: result.call_id.clone(),
                    tool: result.tool.clone(),
                    success: result.success,
                    preview: preview(&result.content, OBSERVATION_PREVIEW_CHARS),
                });
                self.transcript.push(Message::tool(result.call_id, result.content));
                tool_calls += 1;
            }
            acted = true;
        }

        tracing::warn!(max = self.max_iterations, "Iteration budget exhausted");
        self.send_event(ReactEvent::BudgetExhausted {
            max_steps: self.max_iterations,
        });
        self.finish(TurnOutcome {
            answer: BUDGET_EXHAUSTED_MESSAGE.to_string(),
            acted,
            iterations: self.max_iterations,
            tool_calls,
            exhausted: true,
        })
    }
}
