//! Agent 会话：配置 → 端点组 → 工具目录 → 推理循环
//!
//! 三种角色共用同一套组装流程，只是本地端点上的工具与 system prompt 不同：
//! - react：交互对话，本地端点提供 echo
//! - generator：由指令生成计划，本地端点提供生成端流水线工具
//! - executor：接手最近的就绪计划并执行，本地端点提供执行端流水线工具
//!
//! 本地端点总是第一个注册，其后按配置顺序注册远程 MCP 服务器；同名工具以先注册者为准。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::mcp::{ConnectionGroup, Endpoint, GroupGuard, RetryPolicy, ToolEndpointConnection};
use crate::pipeline::{JsonPlanStore, PlanPipeline, SharedPipeline, SimulatedRunner};
use crate::react::prompts::{
    build_system_prompt, EXECUTOR_INSTRUCTIONS, GENERATOR_INSTRUCTIONS, REACT_INSTRUCTIONS,
};
use crate::react::{ReactEvent, ReasoningLoop, TurnOutcome};
use crate::tools::{
    register_executor_tools, register_generator_tools, tool_call_schema_json, EchoTool, LocalEndpoint,
    PipelineContext, ToolCatalog, ToolRegistry,
};

/// Agent 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    React,
    Generator,
    Executor,
}

impl AgentRole {
    pub fn instructions(self) -> &'static str {
        match self {
            AgentRole::React => REACT_INSTRUCTIONS,
            AgentRole::Generator => GENERATOR_INSTRUCTIONS,
            AgentRole::Executor => EXECUTOR_INSTRUCTIONS,
        }
    }

    /// 本地端点名称
    pub fn local_endpoint_name(self) -> &'static str {
        match self {
            AgentRole::React => "local",
            AgentRole::Generator => "plan_generator",
            AgentRole::Executor => "plan_executor",
        }
    }
}

/// 会话组装选项
pub struct SessionOptions {
    pub role: AgentRole,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl SessionOptions {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

pub struct AgentSession {
    role: AgentRole,
    group: Arc<ConnectionGroup>,
    catalog: Arc<ToolCatalog>,
    pipeline: Option<SharedPipeline>,
    reasoning: ReasoningLoop,
}

/// 按角色创建流水线（生成端与执行端）；react 角色没有流水线
fn build_pipeline(cfg: &AppConfig, role: AgentRole) -> Option<SharedPipeline> {
    let creator = match role {
        AgentRole::React => return None,
        AgentRole::Generator => cfg.app.creator.clone(),
        AgentRole::Executor => "plan_executor".to_string(),
    };
    let store = Arc::new(JsonPlanStore::new(&cfg.app.plans_dir));
    Some(PlanPipeline::new(store, creator).into_shared())
}

fn local_registry(cfg: &AppConfig, role: AgentRole, pipeline: Option<&SharedPipeline>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    match (role, pipeline) {
        (AgentRole::Generator, Some(p)) | (AgentRole::Executor, Some(p)) => {
            let ctx = PipelineContext::new(
                Arc::clone(p),
                Arc::new(SimulatedRunner::new(cfg.pipeline.simulate_time_scale)),
                cfg.pipeline.continue_on_failure,
            );
            if role == AgentRole::Generator {
                register_generator_tools(&mut registry, &ctx);
            } else {
                register_executor_tools(&mut registry, &ctx);
            }
        }
        _ => registry.register(EchoTool),
    }
    registry
}

impl AgentSession {
    /// 组装会话：初始化全部端点（失败时已逆序回滚）、聚合工具目录、构建推理循环
    pub async fn build(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        options: SessionOptions,
    ) -> Result<Self, AgentError> {
        let role = options.role;
        let pipeline = build_pipeline(cfg, role);
        let registry = local_registry(cfg, role, pipeline.as_ref());

        let mut group = ConnectionGroup::new();
        group.register(Arc::new(LocalEndpoint::new(
            role.local_endpoint_name(),
            registry,
            cfg.tools.tool_timeout_secs,
        )));
        let request_timeout = Duration::from_secs(cfg.tools.tool_timeout_secs);
        for entry in &cfg.servers {
            group.register(Arc::new(
                ToolEndpointConnection::from_entry(entry).with_request_timeout(request_timeout),
            ));
        }
        let group = Arc::new(group);
        group.initialize_all().await?;

        let policy = RetryPolicy::new(cfg.tools.retries, cfg.tools.retry_delay_ms);
        let catalog = Arc::new(ToolCatalog::aggregate(group.endpoints(), policy).await);

        let schema = (!cfg.llm.native_tools).then(tool_call_schema_json);
        let system_prompt = build_system_prompt(
            role.instructions(),
            &catalog.describe_for_prompt(),
            schema.as_deref(),
        );
        let mut reasoning = ReasoningLoop::new(llm, Arc::clone(&catalog), system_prompt, cfg.react.max_iterations)
            .with_cancel_token(options.cancel_token);
        if let Some(tx) = options.event_tx {
            reasoning = reasoning.with_event_tx(tx);
        }

        tracing::info!(
            role = ?role,
            servers = group.len(),
            tools = catalog.len(),
            "Agent session ready"
        );
        Ok(Self {
            role,
            group,
            catalog,
            pipeline,
            reasoning,
        })
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> Option<&SharedPipeline> {
        self.pipeline.as_ref()
    }

    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        self.group.endpoints()
    }

    /// 作用域守卫：会话结束时显式 `shutdown().await`，否则 Drop 时后台逆序关闭
    pub fn guard(&self) -> GroupGuard {
        self.group.guard()
    }

    pub async fn step(&mut self, input: &str) -> TurnOutcome {
        self.reasoning.step(input).await
    }

    /// 清空对话（保留 system prompt）
    pub fn reset(&mut self) {
        self.reasoning.reset();
    }

    pub fn reasoning(&self) -> &ReasoningLoop {
        &self.reasoning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerEntry, StdioConfig, TransportConfig};
    use crate::llm::MockLlmClient;
    use crate::mcp::ConnectionState;

    fn config(plans_dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.plans_dir = plans_dir.to_path_buf();
        cfg.pipeline.simulate_time_scale = 0.0;
        cfg
    }

    #[tokio::test]
    async fn test_react_session_with_mock_echo() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut session = AgentSession::build(&cfg, Arc::new(MockLlmClient), SessionOptions::new(AgentRole::React))
            .await
            .unwrap();
        assert_eq!(session.catalog().tool_names(), vec!["echo"]);
        assert!(session.pipeline().is_none());

        let out = session.step("ping").await;
        assert!(out.acted);
        assert!(out.answer.contains("Echo from Mock: ping"));

        let endpoints: Vec<_> = session.endpoints().to_vec();
        session.guard().shutdown().await;
        assert!(endpoints.iter().all(|e| e.state() == ConnectionState::Closed));
    }

    #[tokio::test]
    async fn test_generator_then_executor_sessions_hand_off() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let mut generator =
            AgentSession::build(&cfg, Arc::new(MockLlmClient), SessionOptions::new(AgentRole::Generator))
                .await
                .unwrap();
        let out = generator.step("Study distributed systems").await;
        assert!(out.acted);
        generator.guard().shutdown().await;

        let mut executor =
            AgentSession::build(&cfg, Arc::new(MockLlmClient), SessionOptions::new(AgentRole::Executor))
                .await
                .unwrap();
        let out = executor.step(crate::react::prompts::EXECUTOR_TRIGGER).await;
        assert_eq!(out.tool_calls, 2);

        let pipeline = executor.pipeline().unwrap().lock().await;
        let plan = pipeline.active_plan().unwrap();
        assert_eq!(plan.category, "learning");
        assert!(pipeline.history().len() >= 8);
        drop(pipeline);
        executor.guard().shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_server_rolls_back_local_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.servers.push(ServerEntry {
            name: "broken".into(),
            transport: TransportConfig::Stdio(StdioConfig {
                command: String::new(),
                args: Vec::new(),
                env: Default::default(),
            }),
        });
        let result = AgentSession::build(&cfg, Arc::new(MockLlmClient), SessionOptions::new(AgentRole::React)).await;
        assert!(matches!(result, Err(AgentError::Mcp(_))));
    }
}
