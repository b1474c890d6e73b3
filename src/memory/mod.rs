//! 记忆层：推理循环的对话记录

pub mod conversation;

pub use conversation::{Message, Role, ToolCall, Transcript};
