//! Tandem - MCP 工具端点管理与计划生成/执行流水线
//!
//! 模块划分：
//! - **agent**: 会话组装（端点组 → 工具目录 → 推理循环），react / generator / executor 三种角色
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话错误与优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），回复规范化
//! - **mcp**: 工具端点连接（stdio / Streamable HTTP / SSE）、重试与逆序清理
//! - **memory**: 对话记录
//! - **observability**: tracing 初始化
//! - **pipeline**: 计划模型、持久化存储与生成/执行协调
//! - **react**: ReAct 主循环、事件与提示词
//! - **tools**: 本地工具、工具目录与调用

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod react;
pub mod tools;
