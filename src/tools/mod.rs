//! 工具层：描述符、本地工具注册表与端点、工具目录与调用、流水线工具

pub mod catalog;
pub mod descriptor;
pub mod echo;
pub mod local;
pub mod pipeline_tools;
pub mod registry;
pub mod schema;

pub use catalog::{ToolCatalog, ToolResult};
pub use descriptor::{ParamSpec, ToolDescriptor};
pub use echo::EchoTool;
pub use local::LocalEndpoint;
pub use pipeline_tools::{register_executor_tools, register_generator_tools, PipelineContext};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
