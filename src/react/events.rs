//! 推理循环事件：终端展示迭代进度、工具调用（含所属端点）、观察与回复

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 进入第 step 次迭代
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用 LLM 思考
    Thinking,
    /// 与工具调用同时返回的说明文字
    ThinkingContent { text: String },
    /// 调用工具；server 为目录中的所属端点，未知工具为 None
    ToolCall {
        id: String,
        tool: String,
        server: Option<String>,
        args: serde_json::Value,
    },
    /// 工具返回（截断预览）
    Observation {
        id: String,
        tool: String,
        success: bool,
        preview: String,
    },
    /// 最终回复
    Answer { text: String },
    /// 达到最大步数
    BudgetExhausted { max_steps: usize },
    /// 累计 token 用量
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// LLM 请求失败或取消
    Error { text: String },
}
