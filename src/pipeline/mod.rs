//! 计划流水线：生成端创建计划、执行端轮询接手并逐个推进任务

pub mod classify;
pub mod coordinator;
pub mod markdown;
pub mod runner;
pub mod store;
pub mod types;

pub use classify::Category;
pub use coordinator::{
    BatchSummary, CreateOutcome, ExecutionRecord, ExecutionStatus, PipelineState, PipelineStatusReport,
    PlanPipeline, PlanSummary, PollOutcome, SharedPipeline, StepOutcome, TaskExecution,
};
pub use runner::{SimulatedRunner, TaskRunner};
pub use store::{JsonPlanStore, MemoryPlanStore, PlanStore};
pub use types::{PipelineError, Plan, PlanStatus, Progress, Task, TaskStatus};
