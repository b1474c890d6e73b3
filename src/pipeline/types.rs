//! 计划与任务：持久化记录、状态机、进度统计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 计划级状态
///
/// Created → ReadyForExecution → Executing → Completed；Failed 只能从 Executing 进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Created,
    ReadyForExecution,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Created, ReadyForExecution)
                | (ReadyForExecution, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    /// 执行端可以接手的状态
    pub fn is_executable(self) -> bool {
        matches!(self, PlanStatus::ReadyForExecution | PlanStatus::Executing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Created => "created",
            PlanStatus::ReadyForExecution => "ready_for_execution",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务级状态：Todo → InProgress → Done（失败回到 Todo）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            TaskStatus::Todo => "⏳",
            TaskStatus::InProgress => "🔄",
            TaskStatus::Done => "✅",
        }
    }
}

/// 单个任务；编号即在 tasks 中的 1 基位置，创建后不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub content: String,
    pub status: TaskStatus,
    #[serde(default, alias = "estimatedTime")]
    pub estimated_time: String,
    #[serde(default)]
    pub notes: Vec<String>,
    /// 父任务编号（子任务）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl Task {
    pub fn new(content: impl Into<String>, estimated_time: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: TaskStatus::Todo,
            estimated_time: estimated_time.into(),
            notes: Vec::new(),
            parent: None,
        }
    }

    /// 追加带 UTC 时间戳的备注
    pub fn add_note(&mut self, note: &str) {
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.notes.push(format!("[{ts} UTC] {note}"));
    }
}

/// 持久化的计划记录，生成端与执行端之间的交接契约
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub instruction: String,
    pub creator: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub status: PlanStatus,
    pub tasks: Vec<Task>,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "pipelineReady")]
    pub pipeline_ready: bool,
}

fn default_category() -> String {
    "general".to_string()
}

/// 进度统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub todo: usize,
    pub completion_rate: String,
}

impl Plan {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        instruction: impl Into<String>,
        creator: impl Into<String>,
        category: impl Into<String>,
        tasks: Vec<Task>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            instruction: instruction.into(),
            creator: creator.into(),
            category: category.into(),
            status: PlanStatus::Created,
            tasks,
            created_at: now,
            updated_at: now,
            pipeline_ready: false,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn transition(&mut self, next: PlanStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(plan = %self.id, from = %self.status, to = %next, "Plan status changed");
        self.status = next;
        self.touch();
        Ok(())
    }

    /// 1 基编号转下标
    pub fn task_index(&self, number: usize) -> Result<usize, PipelineError> {
        if number == 0 || number > self.tasks.len() {
            return Err(PipelineError::InvalidTaskNumber {
                number,
                total: self.tasks.len(),
            });
        }
        Ok(number - 1)
    }

    pub fn all_done(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    /// 创建顺序中第一个未完成任务的下标
    pub fn next_pending(&self) -> Option<usize> {
        self.tasks.iter().position(|t| t.status != TaskStatus::Done)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status != TaskStatus::Done).count()
    }

    pub fn progress(&self) -> Progress {
        let total = self.tasks.len();
        let completed = self.tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
        let in_progress = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .count();
        Progress {
            total,
            completed,
            in_progress,
            todo: total - completed - in_progress,
            completion_rate: percent(completed, total),
        }
    }

    /// 以 number 为根的子树（含自身）的任务编号，先序；用显式栈遍历
    pub fn subtree(&self, number: usize) -> Result<Vec<usize>, PipelineError> {
        self.task_index(number)?;
        let mut out = Vec::new();
        let mut seen = vec![false; self.tasks.len() + 1];
        let mut stack = vec![number];
        while let Some(n) = stack.pop() {
            if std::mem::replace(&mut seen[n], true) {
                continue;
            }
            out.push(n);
            let children: Vec<usize> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.parent == Some(n))
                .map(|(i, _)| i + 1)
                .collect();
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// 任务嵌套深度（顶层为 0）；沿父链上溯，步数以任务总数为界，异常数据中的环不会死循环
    pub fn depth(&self, number: usize) -> usize {
        let mut depth = 0;
        let mut current = self.tasks.get(number.wrapping_sub(1)).and_then(|t| t.parent);
        while let Some(p) = current {
            depth += 1;
            if depth >= self.tasks.len() {
                break;
            }
            current = self.tasks.get(p.wrapping_sub(1)).and_then(|t| t.parent);
        }
        depth
    }
}

pub(crate) fn percent(part: usize, total: usize) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.1}%", part as f64 / total as f64 * 100.0)
    }
}

/// 流水线操作错误
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No active plan")]
    NoActivePlan,

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Invalid task number {number}. Valid range: 1-{total}")]
    InvalidTaskNumber { number: usize, total: usize },

    #[error("Invalid plan transition: {from} -> {to}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },

    #[error("Plan is {0} and no longer accepts changes")]
    PlanClosed(PlanStatus),

    #[error("Instruction must not be empty")]
    EmptyInstruction,

    #[error("Persistence failure: {0}")]
    Persistence(String),
}
