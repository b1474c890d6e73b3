//! 计划持久化
//!
//! JsonPlanStore：每个计划一个 `<id>.json`（交接契约）+ `<id>.md`（阅读视图），目录不存在时自动创建。
//! JSON 先写临时文件再 rename，另一进程轮询读取时不会读到半截文件。
//! MemoryPlanStore：测试与无盘场景使用。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::pipeline::markdown::render_plan;
use crate::pipeline::types::{PipelineError, Plan};

/// 计划存储：按 id 读写
pub trait PlanStore: Send + Sync {
    fn save(&self, plan: &Plan) -> Result<(), PipelineError>;

    fn load(&self, id: &str) -> Result<Plan, PipelineError>;

    fn list(&self) -> Result<Vec<Plan>, PipelineError>;

    /// 最近更新的、标记 pipeline_ready 且处于可执行状态的计划
    fn latest_ready(&self) -> Result<Option<Plan>, PipelineError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.pipeline_ready && p.status.is_executable())
            .max_by_key(|p| p.updated_at))
    }
}

fn persistence(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Persistence(err.to_string())
}

/// id 直接拼进文件名，只接受单个路径分量
fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.contains("..")
}

#[derive(Debug, Clone)]
pub struct JsonPlanStore {
    dir: PathBuf,
}

impl JsonPlanStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn json_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn markdown_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.md"))
    }
}

impl PlanStore for JsonPlanStore {
    fn save(&self, plan: &Plan) -> Result<(), PipelineError> {
        if !is_safe_id(&plan.id) {
            return Err(persistence(format!("invalid plan id '{}'", plan.id)));
        }
        std::fs::create_dir_all(&self.dir).map_err(persistence)?;
        let json = serde_json::to_string_pretty(plan).map_err(persistence)?;

        let target = self.json_path(&plan.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", plan.id));
        std::fs::write(&tmp, json).map_err(persistence)?;
        std::fs::rename(&tmp, &target).map_err(persistence)?;

        std::fs::write(self.markdown_path(&plan.id), render_plan(plan)).map_err(persistence)?;
        tracing::debug!(plan = %plan.id, path = %target.display(), "Plan saved");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Plan, PipelineError> {
        if !is_safe_id(id) {
            tracing::warn!(plan = %id, "Rejecting plan id outside the plans directory");
            return Err(PipelineError::PlanNotFound(id.to_string()));
        }
        let path = self.json_path(id);
        if !path.exists() {
            return Err(PipelineError::PlanNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path).map_err(persistence)?;
        serde_json::from_str(&data).map_err(persistence)
    }

    /// 不可解析的文件跳过并告警
    fn list(&self) -> Result<Vec<Plan>, PipelineError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut plans = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(persistence)? {
            let path = entry.map_err(persistence)?.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true);
            if !is_json || hidden {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(persistence)
                .and_then(|data| serde_json::from_str::<Plan>(&data).map_err(persistence));
            match parsed {
                Ok(plan) => plans.push(plan),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable plan file"),
            }
        }
        Ok(plans)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    plans: Mutex<HashMap<String, Plan>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Plan>> {
        self.plans.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PlanStore for MemoryPlanStore {
    fn save(&self, plan: &Plan) -> Result<(), PipelineError> {
        self.guard().insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Plan, PipelineError> {
        self.guard()
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::PlanNotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<Plan>, PipelineError> {
        Ok(self.guard().values().cloned().collect())
    }
}
