//! 任务执行器：流水线只负责状态推进，具体“做事”交给可插拔的 TaskRunner
//!
//! SimulatedRunner 按任务关键字模拟耗时与成功率，用于在没有真实执行后端时跑通整条流水线。

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::pipeline::types::Task;

/// 执行单个任务：Ok(说明) 为成功，Err(说明) 为失败（任务回到 Todo，可重试）
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> Result<String, String>;
}

const SUCCESS_MESSAGES: [&str; 4] = [
    "Task completed successfully with all requirements met",
    "Execution finished successfully, output validated",
    "Task accomplished as planned, ready for next step",
    "Successfully completed with optimal results",
];

const FAILURE_MESSAGES: [&str; 4] = [
    "Task failed due to configuration issues",
    "Execution interrupted by dependency problems",
    "Failed to complete due to resource constraints",
    "Error encountered during execution phase",
];

#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    /// 模拟耗时倍率；0 表示不等待
    time_scale: f64,
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self { time_scale: 1.0 }
    }
}

impl SimulatedRunner {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale: time_scale.max(0.0),
        }
    }

    /// 基础耗时（秒）：实现类 2.0，测试类 1.0，设计/分析类 1.5，其余 0.5
    pub fn base_seconds(content: &str) -> f64 {
        let lower = content.to_lowercase();
        let has = |kws: &[&str]| kws.iter().any(|kw| lower.contains(kw));
        if has(&["implement", "develop", "create"]) {
            2.0
        } else if has(&["test", "validate"]) {
            1.0
        } else if has(&["design", "analyze"]) {
            1.5
        } else {
            0.5
        }
    }

    /// 成功率：测试/校验类 0.95，部署/生产类 0.75，其余 0.85
    pub fn success_rate(content: &str) -> f64 {
        let lower = content.to_lowercase();
        let has = |kws: &[&str]| kws.iter().any(|kw| lower.contains(kw));
        if has(&["test", "validate", "verify"]) {
            0.95
        } else if has(&["deploy", "production"]) {
            0.75
        } else {
            0.85
        }
    }
}

#[async_trait]
impl TaskRunner for SimulatedRunner {
    async fn run(&self, task: &Task) -> Result<String, String> {
        // rng 不跨 await 持有
        let (seconds, success, message) = {
            let mut rng = rand::thread_rng();
            let seconds = Self::base_seconds(&task.content) + rng.gen_range(0.2..=1.0);
            let success = rng.gen::<f64>() < Self::success_rate(&task.content);
            let pool = if success { &SUCCESS_MESSAGES } else { &FAILURE_MESSAGES };
            let message = pool.choose(&mut rng).copied().unwrap_or("Task finished");
            (seconds, success, message.to_string())
        };

        if self.time_scale > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(seconds * self.time_scale)).await;
        }
        tracing::debug!(task = %task.content, success, "Simulated task finished");

        if success {
            Ok(message)
        } else {
            Err(message)
        }
    }
}
