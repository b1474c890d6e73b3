//! 流水线工具：生成端与执行端各自的一组本地工具
//!
//! 生成端：create_and_prepare_plan / add_task / get_pipeline_status / list_all_plans / view_plan_details
//! 执行端：auto_load_ready_plan / execute_next_pending_task / execute_all_remaining_tasks /
//! get_execution_status / retry_failed_task
//!
//! 返回值均为 JSON 字符串；流水线错误以 Err 返回，由目录转成失败的 ToolResult。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::markdown::render_plan;
use crate::pipeline::{PollOutcome, SharedPipeline, StepOutcome, TaskRunner};
use crate::tools::schema::args_schema;
use crate::tools::{Tool, ToolRegistry};

/// 流水线工具共享的上下文
#[derive(Clone)]
pub struct PipelineContext {
    pub pipeline: SharedPipeline,
    pub runner: Arc<dyn TaskRunner>,
    /// execute_all_remaining_tasks 未指定时的默认值
    pub continue_on_failure: bool,
}

impl PipelineContext {
    pub fn new(pipeline: SharedPipeline, runner: Arc<dyn TaskRunner>, continue_on_failure: bool) -> Self {
        Self {
            pipeline,
            runner,
            continue_on_failure,
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))
}

fn to_json(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

/// 注册生成端工具
pub fn register_generator_tools(registry: &mut ToolRegistry, ctx: &PipelineContext) {
    registry.register(CreatePlanTool(ctx.clone()));
    registry.register(AddTaskTool(ctx.clone()));
    registry.register(PipelineStatusTool(ctx.clone()));
    registry.register(ListPlansTool(ctx.clone()));
    registry.register(ViewPlanTool(ctx.clone()));
}

/// 注册执行端工具
pub fn register_executor_tools(registry: &mut ToolRegistry, ctx: &PipelineContext) {
    registry.register(AutoLoadTool(ctx.clone()));
    registry.register(ExecuteNextTool(ctx.clone()));
    registry.register(ExecuteAllTool(ctx.clone()));
    registry.register(ExecutionStatusTool(ctx.clone()));
    registry.register(RetryTaskTool(ctx.clone()));
}

// ---------- 生成端 ----------

#[derive(Deserialize, JsonSchema)]
struct CreatePlanArgs {
    /// The user's goal or project description to break down into tasks
    instruction: String,
}

pub struct CreatePlanTool(PipelineContext);

#[async_trait]
impl Tool for CreatePlanTool {
    fn name(&self) -> &str {
        "create_and_prepare_plan"
    }

    fn description(&self) -> &str {
        "Create a task plan from an instruction and mark it ready for the executor"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<CreatePlanArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CreatePlanArgs = parse_args(args)?;
        let mut pipeline = self.0.pipeline.lock().await;
        let out = pipeline.create(&args.instruction).map_err(|e| e.to_string())?;
        to_json(&json!({
            "success": true,
            "plan_id": out.plan.id,
            "title": out.plan.title,
            "category": out.plan.category,
            "total_tasks": out.plan.tasks.len(),
            "execution_ready": out.plan.pipeline_ready,
            "pipeline_status": pipeline.state(),
            "message": format!("Plan '{}' created and ready for execution", out.plan.title),
            "next_step": "Plan will be automatically loaded by executor",
            "persist_error": out.persist_error,
        }))
    }
}

#[derive(Deserialize, JsonSchema)]
struct AddTaskArgs {
    /// Task description
    content: String,
    /// Optional parent task number; the new task becomes its subtask
    parent: Option<usize>,
}

pub struct AddTaskTool(PipelineContext);

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Append a task (or a subtask of an existing task) to the active plan"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<AddTaskArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: AddTaskArgs = parse_args(args)?;
        if args.content.trim().is_empty() {
            return Err("Task content must not be empty".to_string());
        }
        let mut pipeline = self.0.pipeline.lock().await;
        let (number, persist_error) = pipeline
            .add_task(&args.content, args.parent)
            .map_err(|e| e.to_string())?;
        to_json(&json!({
            "success": true,
            "task_number": number,
            "parent": args.parent,
            "message": format!("Task {number} added: {}", args.content.trim()),
            "persist_error": persist_error,
        }))
    }
}

pub struct PipelineStatusTool(PipelineContext);

#[async_trait]
impl Tool for PipelineStatusTool {
    fn name(&self) -> &str {
        "get_pipeline_status"
    }

    fn description(&self) -> &str {
        "Show the pipeline state and the active plan's progress"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let pipeline = self.0.pipeline.lock().await;
        to_json(&pipeline.status_report())
    }
}

pub struct ListPlansTool(PipelineContext);

#[async_trait]
impl Tool for ListPlansTool {
    fn name(&self) -> &str {
        "list_all_plans"
    }

    fn description(&self) -> &str {
        "List all known plans, newest first"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let plans = self.0.pipeline.lock().await.list_plans();
        to_json(&json!({
            "total_plans": plans.len(),
            "plans": plans,
        }))
    }
}

#[derive(Deserialize, JsonSchema)]
struct ViewPlanArgs {
    /// Plan id; defaults to the active plan
    plan_id: Option<String>,
}

pub struct ViewPlanTool(PipelineContext);

#[async_trait]
impl Tool for ViewPlanTool {
    fn name(&self) -> &str {
        "view_plan_details"
    }

    fn description(&self) -> &str {
        "Show a plan's tasks, notes and progress"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ViewPlanArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ViewPlanArgs = parse_args(args)?;
        let pipeline = self.0.pipeline.lock().await;
        let plan = pipeline
            .view_plan(args.plan_id.as_deref())
            .map_err(|e| e.to_string())?;
        to_json(&json!({
            "progress": plan.progress(),
            "markdown": render_plan(&plan),
            "plan": plan,
        }))
    }
}

// ---------- 执行端 ----------

pub struct AutoLoadTool(PipelineContext);

#[async_trait]
impl Tool for AutoLoadTool {
    fn name(&self) -> &str {
        "auto_load_ready_plan"
    }

    fn description(&self) -> &str {
        "Load the most recent plan that is ready for execution"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let mut pipeline = self.0.pipeline.lock().await;
        match pipeline.poll_for_ready_plan() {
            PollOutcome::Ready(plan) => to_json(&json!({
                "plan_loaded": true,
                "plan_id": plan.id,
                "title": plan.title,
                "total_tasks": plan.tasks.len(),
                "pending_tasks": plan.pending_count(),
                "ready_for_execution": true,
                "message": format!("Plan '{}' loaded and ready for execution", plan.title),
            })),
            PollOutcome::Idle => to_json(&json!({
                "plan_loaded": false,
                "waiting_for_plan": true,
                "message": "No plan ready for execution. Waiting for plan generator...",
            })),
        }
    }
}

pub struct ExecuteNextTool(PipelineContext);

#[async_trait]
impl Tool for ExecuteNextTool {
    fn name(&self) -> &str {
        "execute_next_pending_task"
    }

    fn description(&self) -> &str {
        "Execute the first unfinished task of the active plan"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let mut pipeline = self.0.pipeline.lock().await;
        let outcome = pipeline
            .execute_next_pending_task(self.0.runner.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        match outcome {
            StepOutcome::Executed(exec) => to_json(&json!({
                "success": exec.success,
                "task_number": exec.task_number,
                "task_content": exec.content,
                "message": format!(
                    "Execution {}: {}",
                    if exec.success { "successful" } else { "failed" },
                    exec.message
                ),
                "duration_seconds": exec.duration_seconds,
                "has_more_pending": exec.has_more_pending,
                "plan_status": exec.plan_status,
                "persist_error": exec.persist_error,
            })),
            StepOutcome::NothingPending => to_json(&json!({
                "success": true,
                "all_completed": true,
                "message": "All tasks completed",
            })),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct ExecuteAllArgs {
    /// Keep going after a failed task (each task is attempted at most once per batch)
    continue_on_failure: Option<bool>,
}

pub struct ExecuteAllTool(PipelineContext);

#[async_trait]
impl Tool for ExecuteAllTool {
    fn name(&self) -> &str {
        "execute_all_remaining_tasks"
    }

    fn description(&self) -> &str {
        "Execute every unfinished task of the active plan in order and summarize the batch"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ExecuteAllArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ExecuteAllArgs = parse_args(args)?;
        let continue_on_failure = args.continue_on_failure.unwrap_or(self.0.continue_on_failure);
        let mut pipeline = self.0.pipeline.lock().await;
        let summary = pipeline
            .execute_all_remaining(self.0.runner.as_ref(), continue_on_failure)
            .await
            .map_err(|e| e.to_string())?;
        let history: Vec<_> = pipeline.history().iter().rev().take(10).cloned().collect();
        to_json(&json!({
            "summary": summary,
            "execution_history": history,
        }))
    }
}

pub struct ExecutionStatusTool(PipelineContext);

#[async_trait]
impl Tool for ExecutionStatusTool {
    fn name(&self) -> &str {
        "get_execution_status"
    }

    fn description(&self) -> &str {
        "Show execution progress, task overview and the next task"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let pipeline = self.0.pipeline.lock().await;
        let status = pipeline.execution_status().map_err(|e| e.to_string())?;
        to_json(&status)
    }
}

#[derive(Deserialize, JsonSchema)]
struct RetryArgs {
    /// 1-based task number to re-run
    task_number: usize,
}

pub struct RetryTaskTool(PipelineContext);

#[async_trait]
impl Tool for RetryTaskTool {
    fn name(&self) -> &str {
        "retry_failed_task"
    }

    fn description(&self) -> &str {
        "Re-run a task by number, whatever its current status"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<RetryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: RetryArgs = parse_args(args)?;
        let mut pipeline = self.0.pipeline.lock().await;
        let exec = pipeline
            .retry(args.task_number, self.0.runner.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        to_json(&json!({
            "success": exec.success,
            "task_number": exec.task_number,
            "task_content": exec.content,
            "message": format!("Retry result: {}", exec.message),
            "plan_status": exec.plan_status,
            "persist_error": exec.persist_error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MemoryPlanStore, PlanPipeline, SimulatedRunner, Task};

    fn context() -> PipelineContext {
        let pipeline = PlanPipeline::new(Arc::new(MemoryPlanStore::new()), "tester").into_shared();
        PipelineContext::new(pipeline, Arc::new(SimulatedRunner::new(0.0)), true)
    }

    struct AlwaysOk;

    #[async_trait]
    impl TaskRunner for AlwaysOk {
        async fn run(&self, _task: &Task) -> Result<String, String> {
            Ok("done".into())
        }
    }

    #[tokio::test]
    async fn test_generator_then_executor_round() {
        let mut ctx = context();
        ctx.runner = Arc::new(AlwaysOk);
        let mut registry = ToolRegistry::new();
        register_generator_tools(&mut registry, &ctx);
        register_executor_tools(&mut registry, &ctx);
        assert_eq!(registry.len(), 10);

        let out = registry
            .execute("create_and_prepare_plan", json!({"instruction": "Learn Rust macros"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["total_tasks"], 8);
        assert_eq!(v["next_step"], "Plan will be automatically loaded by executor");

        let loaded: Value =
            serde_json::from_str(&registry.execute("auto_load_ready_plan", json!({})).await.unwrap()).unwrap();
        assert_eq!(loaded["plan_loaded"], true);
        assert_eq!(loaded["pending_tasks"], 8);

        let step: Value = serde_json::from_str(
            &registry.execute("execute_next_pending_task", json!({})).await.unwrap(),
        )
        .unwrap();
        assert_eq!(step["task_number"], 1);
        assert_eq!(step["message"], "Execution successful: done");

        let batch: Value = serde_json::from_str(
            &registry.execute("execute_all_remaining_tasks", json!({})).await.unwrap(),
        )
        .unwrap();
        assert_eq!(batch["summary"]["total_executed"], 7);
        assert_eq!(batch["summary"]["all_completed"], true);
    }

    #[tokio::test]
    async fn test_executor_without_plan_waits_or_errors() {
        let ctx = context();
        let mut registry = ToolRegistry::new();
        register_executor_tools(&mut registry, &ctx);

        let idle: Value =
            serde_json::from_str(&registry.execute("auto_load_ready_plan", json!({})).await.unwrap()).unwrap();
        assert_eq!(idle["waiting_for_plan"], true);

        let err = registry.execute("get_execution_status", json!({})).await.unwrap_err();
        assert_eq!(err, "No active plan");
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_reported() {
        let ctx = context();
        let mut registry = ToolRegistry::new();
        register_generator_tools(&mut registry, &ctx);
        let err = registry.execute("create_and_prepare_plan", json!({})).await.unwrap_err();
        assert!(err.starts_with("Invalid arguments"));
        let schema = registry.get("add_task").unwrap().parameters_schema();
        assert_eq!(schema["required"], json!(["content"]));
    }
}
