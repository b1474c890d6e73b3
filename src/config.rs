//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TANDEM__*` 覆盖（双下划线表示嵌套，如 `TANDEM__LLM__PROVIDER=mock`）。
//! 工具端点在 `[[servers]]` 数组中声明，按声明顺序注册、初始化，逆序关闭。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub react: ReactSection,
    pub tools: ToolsSection,
    pub pipeline: PipelineSection,
    pub servers: Vec<ServerEntry>,
}

/// [app] 段：应用名、计划存储目录、计划创建者
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 计划 JSON / Markdown 存放目录，生成端与执行端共享
    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,
    #[serde(default = "default_creator")]
    pub creator: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            plans_dir: default_plans_dir(),
            creator: default_creator(),
        }
    }
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from("plans")
}

fn default_creator() -> String {
    "plan_generator".to_string()
}

/// [llm] 段：后端选择与请求参数
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读环境变量 OPENAI_API_KEY（deepseek 为 DEEPSEEK_API_KEY）
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// 是否通过 tools 字段走原生函数调用；关闭时仅依赖提示词中的 JSON 约定
    #[serde(default = "default_true")]
    pub native_tools: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_request_timeout(),
            native_tools: true,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// [react] 段：单次用户输入内的最大迭代数
#[derive(Debug, Clone, Deserialize)]
pub struct ReactSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ReactSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    25
}

/// [tools] 段：调用重试与本地工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 总尝试次数（含首次）
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 本地工具单次调用超时，同时是 stdio 服务器单个响应的等待上限（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_tool_timeout_secs() -> u64 {
    120
}

/// [pipeline] 段：执行端轮询间隔与模拟执行参数
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 模拟执行耗时倍率；0 表示不等待
    #[serde(default = "default_time_scale")]
    pub simulate_time_scale: f64,
    #[serde(default = "default_true")]
    pub continue_on_failure: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            simulate_time_scale: default_time_scale(),
            continue_on_failure: true,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_time_scale() -> f64 {
    1.0
}

/// [[servers]] 项：端点名称 + 传输配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

/// 传输类型（封闭集合）
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// 本地子进程，stdin/stdout 行分隔 JSON-RPC
    Stdio(StdioConfig),
    /// Streamable HTTP：POST 请求，响应为 JSON 或 SSE
    StreamableHttp(RemoteConfig),
    /// 旧版 SSE：GET 长连接推送 + POST 到 endpoint 事件给出的地址
    Sse(RemoteConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::StreamableHttp(_) => "streamable-http",
            TransportConfig::Sse(_) => "sse",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StdioConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 叠加在父进程环境变量之上
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 连接超时（秒）；未设置时 streamable-http 为 30，sse 为 5
    pub timeout_secs: Option<u64>,
    /// 流式读取超时（秒），默认 300
    pub sse_read_timeout_secs: Option<u64>,
    /// 以 `Authorization: Bearer` 发送
    pub api_key: Option<String>,
    /// 关闭时是否发送 DELETE 终止会话（仅 streamable-http）
    #[serde(default = "default_true")]
    pub terminate_on_close: bool,
}

/// 从 config 目录加载配置，环境变量 TANDEM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TANDEM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TANDEM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(src: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(src, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_toml("");
        assert_eq!(cfg.react.max_iterations, 25);
        assert_eq!(cfg.tools.retries, 2);
        assert_eq!(cfg.tools.retry_delay_ms, 1000);
        assert_eq!(cfg.pipeline.poll_interval_secs, 5);
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn test_servers_parse_in_order() {
        let cfg = from_toml(
            r#"
            [[servers]]
            name = "local"
            type = "stdio"
            command = "python"
            args = ["server.py"]

            [[servers]]
            name = "remote"
            type = "streamable-http"
            url = "http://localhost:8000/mcp"
            api_key = "k"

            [[servers]]
            name = "legacy"
            type = "sse"
            url = "http://localhost:8001/sse"
            "#,
        );
        let names: Vec<_> = cfg.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["local", "remote", "legacy"]);
        match &cfg.servers[0].transport {
            TransportConfig::Stdio(s) => assert_eq!(s.args, vec!["server.py"]),
            other => panic!("unexpected {other:?}"),
        }
        match &cfg.servers[1].transport {
            TransportConfig::StreamableHttp(r) => {
                assert_eq!(r.api_key.as_deref(), Some("k"));
                assert!(r.terminate_on_close);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cfg.servers[2].transport.kind(), "sse");
    }
}
