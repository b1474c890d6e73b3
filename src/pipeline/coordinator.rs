//! 计划流水线：生成端与执行端共用的状态机
//!
//! 计划按 id 存在内存表中，另有显式的“当前活动计划” id；旧计划保留，不会被覆盖。
//! 两个角色之间没有直接调用，生成端写入 PlanStore，执行端轮询 PlanStore 接手。
//! 每个操作在持有 `SharedPipeline` 锁期间完成完整的读-改-写。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::classify::{classify, estimate_duration, extract_title, generate_plan_id};
use crate::pipeline::runner::TaskRunner;
use crate::pipeline::store::PlanStore;
use crate::pipeline::types::{percent, PipelineError, Plan, PlanStatus, Progress, Task, TaskStatus};

/// 执行历史保留条数
const HISTORY_LIMIT: usize = 100;
/// 状态报告中展示的最近执行条数
const RECENT_EXECUTIONS: usize = 5;
/// 任务概览中内容截断长度
const OVERVIEW_CONTENT_CHARS: usize = 60;

pub type SharedPipeline = Arc<tokio::sync::Mutex<PlanPipeline>>;

/// 流水线状态视图（只读快照）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub has_active_plan: bool,
    pub active_plan_id: Option<String>,
    pub ready_for_execution: bool,
    pub execution_triggered: bool,
}

/// 单次任务执行记录
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub plan_id: String,
    pub task_number: usize,
    pub content: String,
    pub success: bool,
    pub message: String,
    pub duration_seconds: f64,
    pub retry: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub plan: Plan,
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// 已接手的计划快照
    Ready(Plan),
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskExecution {
    pub task_number: usize,
    pub content: String,
    pub success: bool,
    pub message: String,
    pub duration_seconds: f64,
    pub has_more_pending: bool,
    pub plan_status: PlanStatus,
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Executed(TaskExecution),
    NothingPending,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_executed: usize,
    pub successful: usize,
    pub failed: usize,
    /// 本批未尝试且未完成的任务数
    pub remaining: usize,
    pub success_rate: String,
    pub total_duration_seconds: f64,
    pub all_completed: bool,
    pub batch_results: Vec<TaskExecution>,
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivePlanView {
    pub id: String,
    pub title: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub task_count: usize,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatusReport {
    pub pipeline_state: PipelineState,
    pub current_time: DateTime<Utc>,
    pub active_plan: Option<ActivePlanView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOverview {
    pub number: usize,
    pub icon: &'static str,
    pub status: TaskStatus,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextTask {
    pub number: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatus {
    pub plan_id: String,
    pub title: String,
    pub plan_status: PlanStatus,
    pub progress: Progress,
    pub task_overview: Vec<TaskOverview>,
    pub recent_executions: Vec<ExecutionRecord>,
    pub next_task: Option<NextTask>,
    pub execution_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub title: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub task_count: usize,
    pub completion_rate: String,
    pub is_active: bool,
}

pub struct PlanPipeline {
    plans: HashMap<String, Plan>,
    active: Option<String>,
    execution_triggered: bool,
    history: Vec<ExecutionRecord>,
    store: Arc<dyn PlanStore>,
    creator: String,
}

impl PlanPipeline {
    pub fn new(store: Arc<dyn PlanStore>, creator: impl Into<String>) -> Self {
        Self {
            plans: HashMap::new(),
            active: None,
            execution_triggered: false,
            history: Vec::new(),
            store,
            creator: creator.into(),
        }
    }

    pub fn into_shared(self) -> SharedPipeline {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn active_plan(&self) -> Option<&Plan> {
        self.active.as_ref().and_then(|id| self.plans.get(id))
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    fn active_id(&self) -> Result<String, PipelineError> {
        self.active
            .clone()
            .filter(|id| self.plans.contains_key(id))
            .ok_or(PipelineError::NoActivePlan)
    }

    fn plan_mut(&mut self, id: &str) -> Result<&mut Plan, PipelineError> {
        self.plans
            .get_mut(id)
            .ok_or_else(|| PipelineError::PlanNotFound(id.to_string()))
    }

    /// 由指令生成计划：分类 → 模板任务 → 持久化 → ReadyForExecution → 再持久化 → 设为活动计划
    pub fn create(&mut self, instruction: &str) -> Result<CreateOutcome, PipelineError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(PipelineError::EmptyInstruction);
        }

        let category = classify(instruction);
        let tasks = category
            .template()
            .iter()
            .map(|content| Task::new(*content, estimate_duration(content)))
            .collect();
        let mut title = extract_title(instruction);
        if title.is_empty() {
            title = "Untitled Plan".to_string();
        }
        let id = generate_plan_id(Utc::now());
        let mut plan = Plan::new(&id, title, instruction, &self.creator, category.as_str(), tasks);

        let mut persist_error = persist(self.store.as_ref(), &plan);
        plan.transition(PlanStatus::ReadyForExecution)?;
        plan.pipeline_ready = true;
        if let Some(e) = persist(self.store.as_ref(), &plan) {
            persist_error = Some(e);
        }

        tracing::info!(plan = %id, category = category.as_str(), tasks = plan.tasks.len(), "Plan created");
        self.plans.insert(id.clone(), plan.clone());
        self.active = Some(id);
        self.execution_triggered = false;
        Ok(CreateOutcome { plan, persist_error })
    }

    /// 向活动计划追加任务；parent 为父任务编号（子任务）
    pub fn add_task(
        &mut self,
        content: &str,
        parent: Option<usize>,
    ) -> Result<(usize, Option<String>), PipelineError> {
        let id = self.active_id()?;
        let store = Arc::clone(&self.store);
        let plan = self.plan_mut(&id)?;
        if matches!(plan.status, PlanStatus::Completed | PlanStatus::Failed) {
            return Err(PipelineError::PlanClosed(plan.status));
        }
        if let Some(p) = parent {
            plan.task_index(p)?;
        }

        let mut task = Task::new(content.trim(), estimate_duration(content));
        task.parent = parent;
        plan.tasks.push(task);
        plan.touch();
        let number = plan.tasks.len();
        tracing::debug!(plan = %id, number, ?parent, "Task added");
        Ok((number, persist(store.as_ref(), plan)))
    }

    pub fn state(&self) -> PipelineState {
        let active = self.active_plan();
        PipelineState {
            has_active_plan: active.is_some(),
            active_plan_id: active.map(|p| p.id.clone()),
            ready_for_execution: active
                .map(|p| p.pipeline_ready && p.status.is_executable())
                .unwrap_or(false),
            execution_triggered: self.execution_triggered,
        }
    }

    pub fn status_report(&self) -> PipelineStatusReport {
        PipelineStatusReport {
            pipeline_state: self.state(),
            current_time: Utc::now(),
            active_plan: self.active_plan().map(|p| ActivePlanView {
                id: p.id.clone(),
                title: p.title.clone(),
                status: p.status,
                created_at: p.created_at,
                task_count: p.tasks.len(),
                progress: p.progress(),
            }),
        }
    }

    /// 执行端接手：先看内存中的活动计划，再查持久化存储中最近的就绪计划。不阻塞。
    pub fn poll_for_ready_plan(&mut self) -> PollOutcome {
        if let Some(plan) = self.active_plan() {
            if plan.status.is_executable() {
                return PollOutcome::Ready(plan.clone());
            }
        }

        match self.store.latest_ready() {
            Ok(Some(plan)) => {
                tracing::info!(plan = %plan.id, title = %plan.title, "Adopted ready plan from store");
                self.active = Some(plan.id.clone());
                self.plans.insert(plan.id.clone(), plan.clone());
                PollOutcome::Ready(plan)
            }
            Ok(None) => PollOutcome::Idle,
            Err(e) => {
                tracing::warn!(error = %e, "Plan store poll failed");
                PollOutcome::Idle
            }
        }
    }

    /// 放开当前活动计划，下次轮询重新查询存储；计划本身保留在内存表中
    pub fn release_active(&mut self) {
        if let Some(id) = self.active.take() {
            tracing::debug!(plan = %id, "Released active plan");
        }
        self.execution_triggered = false;
    }

    /// 执行创建顺序中第一个未完成的任务
    pub async fn execute_next_pending_task(
        &mut self,
        runner: &dyn TaskRunner,
    ) -> Result<StepOutcome, PipelineError> {
        let id = self.active_id()?;
        let next = self.plans.get(&id).and_then(Plan::next_pending);
        match next {
            Some(index) => Ok(StepOutcome::Executed(self.run_task(&id, index, runner, false).await?)),
            None => Ok(StepOutcome::NothingPending),
        }
    }

    /// 批量执行：每个任务本批最多尝试一次；continue_on_failure 为 false 时遇到首个失败即停
    pub async fn execute_all_remaining(
        &mut self,
        runner: &dyn TaskRunner,
        continue_on_failure: bool,
    ) -> Result<BatchSummary, PipelineError> {
        let id = self.active_id()?;
        let started = Instant::now();
        let mut attempted = HashSet::new();
        let mut results: Vec<TaskExecution> = Vec::new();

        loop {
            let next = self.plans.get(&id).and_then(|plan| {
                plan.tasks
                    .iter()
                    .enumerate()
                    .position(|(i, t)| t.status != TaskStatus::Done && !attempted.contains(&i))
            });
            let Some(index) = next else { break };
            attempted.insert(index);

            let exec = self.run_task(&id, index, runner, false).await?;
            let failed = !exec.success;
            results.push(exec);
            if failed && !continue_on_failure {
                break;
            }
        }

        let plan = self.plans.get(&id).ok_or(PipelineError::NoActivePlan)?;
        let remaining = plan
            .tasks
            .iter()
            .enumerate()
            .filter(|(i, t)| t.status != TaskStatus::Done && !attempted.contains(i))
            .count();
        let successful = results.iter().filter(|r| r.success).count();
        let persist_error = results.iter().rev().find_map(|r| r.persist_error.clone());

        Ok(BatchSummary {
            total_executed: results.len(),
            successful,
            failed: results.len() - successful,
            remaining,
            success_rate: percent(successful, results.len()),
            total_duration_seconds: started.elapsed().as_secs_f64(),
            all_completed: plan.all_done(),
            batch_results: results,
            persist_error,
        })
    }

    /// 强制重跑指定任务，不论其当前状态；已完成的计划会被重新打开为 Executing
    pub async fn retry(
        &mut self,
        task_number: usize,
        runner: &dyn TaskRunner,
    ) -> Result<TaskExecution, PipelineError> {
        let id = self.active_id()?;
        let index = self
            .plans
            .get(&id)
            .ok_or(PipelineError::NoActivePlan)?
            .task_index(task_number)?;
        self.run_task(&id, index, runner, true).await
    }

    /// 不可恢复的流水线故障：Executing → Failed
    pub fn fail_active(&mut self, reason: &str) -> Result<Option<String>, PipelineError> {
        let id = self.active_id()?;
        let store = Arc::clone(&self.store);
        let plan = self.plan_mut(&id)?;
        plan.transition(PlanStatus::Failed)?;
        tracing::error!(plan = %id, reason, "Plan failed");
        Ok(persist(store.as_ref(), plan))
    }

    pub fn execution_status(&self) -> Result<ExecutionStatus, PipelineError> {
        let plan = self.active_plan().ok_or(PipelineError::NoActivePlan)?;
        let task_overview = plan
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| TaskOverview {
                number: i + 1,
                icon: t.status.icon(),
                status: t.status,
                content: truncate_chars(&t.content, OVERVIEW_CONTENT_CHARS),
            })
            .collect();
        let recent_executions = self
            .history
            .iter()
            .filter(|r| r.plan_id == plan.id)
            .rev()
            .take(RECENT_EXECUTIONS)
            .cloned()
            .collect();
        let next_task = plan.next_pending().map(|i| NextTask {
            number: i + 1,
            content: plan.tasks[i].content.clone(),
        });

        Ok(ExecutionStatus {
            plan_id: plan.id.clone(),
            title: plan.title.clone(),
            plan_status: plan.status,
            progress: plan.progress(),
            task_overview,
            recent_executions,
            execution_complete: plan.all_done(),
            next_task,
        })
    }

    /// 内存与存储中的全部计划，同一计划取更新时间较新的副本，按创建时间倒序
    pub fn list_plans(&self) -> Vec<PlanSummary> {
        let mut merged: HashMap<String, Plan> = match self.store.list() {
            Ok(plans) => plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list persisted plans");
                HashMap::new()
            }
        };
        for (id, plan) in &self.plans {
            let stale = merged.get(id).is_some_and(|p| p.updated_at > plan.updated_at);
            if !stale {
                merged.insert(id.clone(), plan.clone());
            }
        }

        let mut plans: Vec<Plan> = merged.into_values().collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        plans
            .into_iter()
            .map(|p| PlanSummary {
                is_active: self.active.as_deref() == Some(p.id.as_str()),
                completion_rate: p.progress().completion_rate,
                task_count: p.tasks.len(),
                id: p.id,
                title: p.title,
                status: p.status,
                created_at: p.created_at,
            })
            .collect()
    }

    /// 查看计划详情；id 为空时取活动计划
    pub fn view_plan(&self, id: Option<&str>) -> Result<Plan, PipelineError> {
        match id {
            None => self.active_plan().cloned().ok_or(PipelineError::NoActivePlan),
            Some(id) => match self.plans.get(id) {
                Some(plan) => Ok(plan.clone()),
                None => self.store.load(id),
            },
        }
    }

    async fn run_task(
        &mut self,
        id: &str,
        index: usize,
        runner: &dyn TaskRunner,
        retry: bool,
    ) -> Result<TaskExecution, PipelineError> {
        let task = {
            let plan = self.plan_mut(id)?;
            match plan.status {
                PlanStatus::Failed | PlanStatus::Created => {
                    return Err(PipelineError::PlanClosed(plan.status));
                }
                PlanStatus::Completed if !retry => return Err(PipelineError::PlanClosed(plan.status)),
                PlanStatus::Completed => {
                    tracing::info!(plan = %id, "Reopening completed plan for retry");
                    plan.status = PlanStatus::Executing;
                }
                PlanStatus::ReadyForExecution => plan.transition(PlanStatus::Executing)?,
                PlanStatus::Executing => {}
            }
            plan.tasks[index].status = TaskStatus::InProgress;
            plan.touch();
            plan.tasks[index].clone()
        };
        self.execution_triggered = true;

        let number = index + 1;
        tracing::info!(plan = %id, task = number, content = %task.content, retry, "Executing task");
        let started = Instant::now();
        let outcome = runner.run(&task).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        let store = Arc::clone(&self.store);
        let plan = self.plan_mut(id)?;
        let (success, message) = match outcome {
            Ok(msg) => (true, msg),
            Err(msg) => (false, msg),
        };
        let slot = &mut plan.tasks[index];
        slot.status = if success { TaskStatus::Done } else { TaskStatus::Todo };
        let note = format!(
            "Execution {}: {}",
            if success { "successful" } else { "failed" },
            message
        );
        if retry {
            slot.add_note(&format!("Retry result: {note}"));
        } else {
            slot.add_note(&note);
        }
        plan.touch();

        if plan.all_done() {
            plan.transition(PlanStatus::Completed)?;
            tracing::info!(plan = %id, "All tasks completed");
        }
        let persist_error = persist(store.as_ref(), plan);
        let has_more_pending = plan.pending_count() > 0;
        let plan_status = plan.status;

        if success {
            tracing::info!(task = number, %message, "Task succeeded");
        } else {
            tracing::warn!(task = number, %message, "Task failed");
        }

        self.history.push(ExecutionRecord {
            plan_id: id.to_string(),
            task_number: number,
            content: task.content.clone(),
            success,
            message: message.clone(),
            duration_seconds,
            retry,
            timestamp: Utc::now(),
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }

        Ok(TaskExecution {
            task_number: number,
            content: task.content,
            success,
            message,
            duration_seconds,
            has_more_pending,
            plan_status,
            persist_error,
        })
    }
}

/// 保存失败只记录并返回说明，不中断操作
fn persist(store: &dyn PlanStore, plan: &Plan) -> Option<String> {
    match store.save(plan) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(plan = %plan.id, error = %e, "Failed to persist plan");
            Some(e.to_string())
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::store::{JsonPlanStore, MemoryPlanStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 按任务编号决定失败，记录调用顺序
    struct ScriptedRunner {
        fail_on: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn failing(fail_on: &[&str]) -> Self {
            Self {
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run(&self, task: &Task) -> Result<String, String> {
            assert_eq!(task.status, TaskStatus::InProgress);
            self.calls.lock().unwrap().push(task.content.clone());
            if self.fail_on.contains(&task.content) {
                Err("boom".into())
            } else {
                Ok("ok".into())
            }
        }
    }

    fn pipeline() -> PlanPipeline {
        PlanPipeline::new(Arc::new(MemoryPlanStore::new()), "tester")
    }

    /// 活动计划替换为 n 个编号任务 "t1".."tn"
    fn pipeline_with_tasks(n: usize) -> PlanPipeline {
        let mut p = pipeline();
        p.create("Organize the garage").unwrap();
        let id = p.active_id().unwrap();
        let plan = p.plans.get_mut(&id).unwrap();
        plan.tasks = (1..=n).map(|i| Task::new(format!("t{i}"), "1 hour")).collect();
        p
    }

    #[test]
    fn test_create_is_ready_and_active() {
        let store = Arc::new(MemoryPlanStore::new());
        let mut p = PlanPipeline::new(store.clone(), "gen");
        let out = p.create("Build a website for my bakery").unwrap();

        assert_eq!(out.plan.status, PlanStatus::ReadyForExecution);
        assert!(out.plan.pipeline_ready);
        assert_eq!(out.plan.category, "web");
        assert_eq!(out.plan.tasks.len(), 8);
        assert!(out.persist_error.is_none());
        assert_eq!(store.load(&out.plan.id).unwrap(), out.plan);

        let state = p.state();
        assert!(state.has_active_plan && state.ready_for_execution);
        assert!(!state.execution_triggered);
    }

    #[test]
    fn test_create_rejects_empty_instruction() {
        assert!(matches!(pipeline().create("   "), Err(PipelineError::EmptyInstruction)));
    }

    #[test]
    fn test_second_create_keeps_older_plan() {
        let mut p = pipeline();
        let first = p.create("Learn Rust").unwrap().plan.id;
        let second = p.create("Build an API").unwrap().plan.id;
        assert_eq!(p.active_plan().unwrap().id, second);
        assert_eq!(p.view_plan(Some(&first)).unwrap().id, first);
        assert_eq!(p.list_plans().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_without_plan_is_no_active_plan() {
        let mut p = pipeline();
        let runner = ScriptedRunner::failing(&[]);
        assert!(matches!(
            p.execute_next_pending_task(&runner).await,
            Err(PipelineError::NoActivePlan)
        ));
    }

    #[tokio::test]
    async fn test_next_pending_runs_in_order_and_completes() {
        let mut p = pipeline_with_tasks(2);
        let runner = ScriptedRunner::failing(&[]);

        let StepOutcome::Executed(first) = p.execute_next_pending_task(&runner).await.unwrap() else {
            panic!("expected execution");
        };
        assert_eq!(first.task_number, 1);
        assert!(first.has_more_pending);
        assert_eq!(first.plan_status, PlanStatus::Executing);

        let StepOutcome::Executed(second) = p.execute_next_pending_task(&runner).await.unwrap() else {
            panic!("expected execution");
        };
        assert!(!second.has_more_pending);
        assert_eq!(second.plan_status, PlanStatus::Completed);
        assert!(matches!(
            p.execute_next_pending_task(&runner).await.unwrap(),
            StepOutcome::NothingPending
        ));
        assert_eq!(runner.calls(), vec!["t1", "t2"]);

        let note = &p.active_plan().unwrap().tasks[0].notes[0];
        assert!(note.starts_with('[') && note.ends_with("UTC] Execution successful: ok"));
    }

    #[tokio::test]
    async fn test_failed_task_returns_to_todo() {
        let mut p = pipeline_with_tasks(2);
        let runner = ScriptedRunner::failing(&["t1"]);
        p.execute_next_pending_task(&runner).await.unwrap();

        let plan = p.active_plan().unwrap();
        assert_eq!(plan.tasks[0].status, TaskStatus::Todo);
        assert!(plan.tasks[0].notes[0].ends_with("Execution failed: boom"));
        assert_eq!(plan.status, PlanStatus::Executing);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let mut p = pipeline_with_tasks(5);
        let runner = ScriptedRunner::failing(&["t3"]);
        let s = p.execute_all_remaining(&runner, false).await.unwrap();

        assert_eq!(
            (s.total_executed, s.successful, s.failed, s.remaining),
            (3, 2, 1, 2)
        );
        assert!(!s.all_completed);
        assert_eq!(s.success_rate, "66.7%");
        assert_eq!(runner.calls(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_batch_continue_attempts_each_task_once() {
        let mut p = pipeline_with_tasks(5);
        let runner = ScriptedRunner::failing(&["t3"]);
        let s = p.execute_all_remaining(&runner, true).await.unwrap();

        assert_eq!(
            (s.total_executed, s.successful, s.failed, s.remaining),
            (5, 4, 1, 0)
        );
        assert_eq!(runner.calls(), vec!["t1", "t2", "t3", "t4", "t5"]);
        assert_eq!(p.active_plan().unwrap().status, PlanStatus::Executing);
    }

    #[tokio::test]
    async fn test_retry_reruns_done_task_and_reopens_plan() {
        let mut p = pipeline_with_tasks(1);
        let runner = ScriptedRunner::failing(&[]);
        p.execute_all_remaining(&runner, true).await.unwrap();
        assert_eq!(p.active_plan().unwrap().status, PlanStatus::Completed);

        let exec = p.retry(1, &runner).await.unwrap();
        assert!(exec.success);
        assert_eq!(exec.plan_status, PlanStatus::Completed);
        let notes = &p.active_plan().unwrap().tasks[0].notes;
        assert!(notes[1].contains("Retry result: Execution successful: ok"));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_rejects_bad_task_number() {
        let mut p = pipeline_with_tasks(2);
        let runner = ScriptedRunner::failing(&[]);
        assert!(matches!(
            p.retry(3, &runner).await,
            Err(PipelineError::InvalidTaskNumber { number: 3, total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_fail_active_only_from_executing() {
        let mut p = pipeline_with_tasks(2);
        assert!(matches!(
            p.fail_active("disk gone"),
            Err(PipelineError::InvalidTransition { .. })
        ));

        let runner = ScriptedRunner::failing(&["t1"]);
        p.execute_next_pending_task(&runner).await.unwrap();
        p.fail_active("disk gone").unwrap();
        assert_eq!(p.active_plan().unwrap().status, PlanStatus::Failed);
        assert!(matches!(
            p.execute_next_pending_task(&runner).await,
            Err(PipelineError::PlanClosed(PlanStatus::Failed))
        ));
    }

    #[test]
    fn test_add_subtask_validates_parent() {
        let mut p = pipeline_with_tasks(2);
        let (number, err) = p.add_task("child", Some(1)).unwrap();
        assert_eq!(number, 3);
        assert!(err.is_none());
        assert_eq!(p.active_plan().unwrap().subtree(1).unwrap(), vec![1, 3]);
        assert!(matches!(
            p.add_task("orphan", Some(9)),
            Err(PipelineError::InvalidTaskNumber { .. })
        ));
    }

    #[tokio::test]
    async fn test_execution_status_reports_progress_and_next() {
        let mut p = pipeline_with_tasks(3);
        let runner = ScriptedRunner::failing(&[]);
        p.execute_next_pending_task(&runner).await.unwrap();

        let status = p.execution_status().unwrap();
        assert_eq!(status.progress.completed, 1);
        assert_eq!(status.recent_executions.len(), 1);
        assert_eq!(status.next_task.unwrap().number, 2);
        assert_eq!(status.task_overview[0].icon, "✅");
        assert!(!status.execution_complete);
    }

    #[test]
    fn test_poll_adopts_plan_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PlanStore> = Arc::new(JsonPlanStore::new(dir.path()));
        let mut generator = PlanPipeline::new(store.clone(), "gen");
        let mut executor = PlanPipeline::new(store, "exec");

        assert!(matches!(executor.poll_for_ready_plan(), PollOutcome::Idle));
        let id = generator.create("Study compilers").unwrap().plan.id;
        match executor.poll_for_ready_plan() {
            PollOutcome::Ready(plan) => assert_eq!(plan.id, id),
            PollOutcome::Idle => panic!("plan not adopted"),
        }
        assert_eq!(executor.state().active_plan_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_poll_keeps_active_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PlanStore> = Arc::new(JsonPlanStore::new(dir.path()));
        let mut generator = PlanPipeline::new(store.clone(), "gen");
        let mut executor = PlanPipeline::new(store, "exec");

        let first = generator.create("Learn SQL").unwrap().plan.id;
        assert!(matches!(executor.poll_for_ready_plan(), PollOutcome::Ready(p) if p.id == first));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = generator.create("Learn Haskell").unwrap().plan.id;

        assert!(matches!(executor.poll_for_ready_plan(), PollOutcome::Ready(p) if p.id == first));
        executor.release_active();
        assert!(!executor.state().has_active_plan);
        assert!(matches!(executor.poll_for_ready_plan(), PollOutcome::Ready(p) if p.id == second));
    }

    #[test]
    fn test_persist_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blocker");
        std::fs::write(&file, "x").unwrap();
        let mut p = PlanPipeline::new(Arc::new(JsonPlanStore::new(&file)), "gen");

        let out = p.create("Learn Go").unwrap();
        assert!(out.persist_error.is_some());
        assert_eq!(p.active_plan().unwrap().status, PlanStatus::ReadyForExecution);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 60), "short");
        assert_eq!(truncate_chars(&"x".repeat(61), 60), format!("{}...", "x".repeat(60)));
    }
}
