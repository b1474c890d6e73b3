//! 认知层：ReAct 主循环、过程事件、角色提示词

pub mod events;
pub mod loop_;
pub mod prompts;

pub use events::ReactEvent;
pub use loop_::{ReasoningLoop, TurnOutcome, BUDGET_EXHAUSTED_MESSAGE, DEFAULT_MAX_ITERATIONS};
