//! 生成端与执行端通过共享计划目录交接
//!
//! 两个独立的 PlanPipeline 实例共用一个 JsonPlanStore 目录，模拟两个进程。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use tandem::pipeline::{
    JsonPlanStore, PlanPipeline, PlanStatus, PlanStore, PollOutcome, StepOutcome, Task, TaskRunner, TaskStatus,
};
use tandem::tools::{register_executor_tools, register_generator_tools, PipelineContext, ToolRegistry};

/// 内容含 "deploy" 的任务失败，其余成功
struct DeployFails;

#[async_trait]
impl TaskRunner for DeployFails {
    async fn run(&self, task: &Task) -> Result<String, String> {
        if task.content.to_lowercase().contains("deploy") {
            Err("target environment unreachable".into())
        } else {
            Ok(format!("finished '{}'", task.content))
        }
    }
}

fn pipeline(dir: &std::path::Path, creator: &str) -> PlanPipeline {
    PlanPipeline::new(Arc::new(JsonPlanStore::new(dir)), creator)
}

#[tokio::test]
async fn test_executor_adopts_plan_written_by_generator() {
    let dir = tempfile::tempdir().unwrap();
    let mut generator = pipeline(dir.path(), "plan_generator");
    let mut executor = pipeline(dir.path(), "plan_executor");

    assert!(matches!(executor.poll_for_ready_plan(), PollOutcome::Idle));

    let created = generator.create("Build a website dashboard for metrics").unwrap();
    assert!(created.persist_error.is_none());
    assert_eq!(created.plan.status, PlanStatus::ReadyForExecution);
    assert!(dir.path().join(format!("{}.json", created.plan.id)).exists());
    assert!(dir.path().join(format!("{}.md", created.plan.id)).exists());

    let adopted = match executor.poll_for_ready_plan() {
        PollOutcome::Ready(plan) => plan,
        PollOutcome::Idle => panic!("executor should see the new plan"),
    };
    assert_eq!(adopted.id, created.plan.id);
    assert_eq!(adopted.creator, "plan_generator");
    assert_eq!(adopted.category, "web");

    let outcome = executor.execute_next_pending_task(&DeployFails).await.unwrap();
    let StepOutcome::Executed(exec) = outcome else {
        panic!("expected a task to run");
    };
    assert_eq!(exec.task_number, 1);
    assert!(exec.success);

    // 执行进度写回共享目录，生成端的存储能读到
    let store = JsonPlanStore::new(dir.path());
    let on_disk = store.load(&created.plan.id).unwrap();
    assert_eq!(on_disk.status, PlanStatus::Executing);
    assert_eq!(on_disk.tasks[0].status, TaskStatus::Done);
    assert!(on_disk.tasks[0].notes.iter().any(|n| n.contains("Execution successful")));
}

#[tokio::test]
async fn test_batch_leaves_failed_task_pending_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut generator = pipeline(dir.path(), "plan_generator");
    let mut executor = pipeline(dir.path(), "plan_executor");

    let created = generator.create("Build a website dashboard for metrics").unwrap();
    executor.poll_for_ready_plan();

    let summary = executor.execute_all_remaining(&DeployFails, true).await.unwrap();
    assert_eq!(summary.total_executed, created.plan.tasks.len());
    assert_eq!(summary.failed, 1);
    assert!(!summary.all_completed);

    let on_disk = JsonPlanStore::new(dir.path()).load(&created.plan.id).unwrap();
    let failed: Vec<_> = on_disk
        .tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Done)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, TaskStatus::Todo);
    assert!(failed[0].content.to_lowercase().contains("deploy"));
    assert_eq!(on_disk.status, PlanStatus::Executing);
}

#[tokio::test]
async fn test_released_executor_picks_up_newer_plan() {
    let dir = tempfile::tempdir().unwrap();
    let mut generator = pipeline(dir.path(), "plan_generator");
    let mut executor = pipeline(dir.path(), "plan_executor");

    let first = generator.create("Learn the basics of Rust").unwrap();
    match executor.poll_for_ready_plan() {
        PollOutcome::Ready(plan) => assert_eq!(plan.id, first.plan.id),
        PollOutcome::Idle => panic!("first plan not found"),
    }

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = generator.create("Research vector databases").unwrap();

    // 活动计划仍可执行时优先于存储中的新计划
    match executor.poll_for_ready_plan() {
        PollOutcome::Ready(plan) => assert_eq!(plan.id, first.plan.id),
        PollOutcome::Idle => panic!("active plan lost"),
    }

    executor.release_active();
    match executor.poll_for_ready_plan() {
        PollOutcome::Ready(plan) => assert_eq!(plan.id, second.plan.id),
        PollOutcome::Idle => panic!("second plan not found"),
    }
}

#[tokio::test]
async fn test_tool_level_handoff_between_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let gen_ctx = PipelineContext::new(
        pipeline(dir.path(), "plan_generator").into_shared(),
        Arc::new(DeployFails),
        true,
    );
    let exec_ctx = PipelineContext::new(
        pipeline(dir.path(), "plan_executor").into_shared(),
        Arc::new(DeployFails),
        false,
    );

    let mut gen_tools = ToolRegistry::new();
    register_generator_tools(&mut gen_tools, &gen_ctx);
    let mut exec_tools = ToolRegistry::new();
    register_executor_tools(&mut exec_tools, &exec_ctx);

    let created: Value = serde_json::from_str(
        &gen_tools
            .execute("create_and_prepare_plan", json!({"instruction": "Study distributed consensus"}))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(created["success"], true);
    let plan_id = created["plan_id"].as_str().unwrap().to_string();

    let loaded: Value =
        serde_json::from_str(&exec_tools.execute("auto_load_ready_plan", json!({})).await.unwrap()).unwrap();
    assert_eq!(loaded["plan_loaded"], true);
    assert_eq!(loaded["plan_id"], plan_id.as_str());

    let batch: Value = serde_json::from_str(
        &exec_tools
            .execute("execute_all_remaining_tasks", json!({}))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(batch["summary"]["failed"], 0);
    assert_eq!(batch["summary"]["all_completed"], true);

    // 生成端列出计划时看到执行端写回的完成状态
    let listed: Value =
        serde_json::from_str(&gen_tools.execute("list_all_plans", json!({})).await.unwrap()).unwrap();
    assert_eq!(listed["total_plans"], 1);
    assert_eq!(listed["plans"][0]["id"], plan_id.as_str());
    assert_eq!(listed["plans"][0]["status"], "completed");
}
