//! 工具目录与调用路由
//!
//! aggregate 按注册顺序向每个 Ready 端点列出工具并合并；同名工具先注册者胜出，后者被遮蔽。
//! invoke 永远返回 ToolResult：找不到工具、参数非对象、重试耗尽都以失败结果返回，不向上抛错。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::mcp::{ConnectionState, Endpoint, RetryPolicy};
use crate::memory::ToolCall;
use crate::tools::ToolDescriptor;

/// 单次工具调用的结果，原样写回 transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    pub content: String,
}

impl ToolResult {
    fn failure(call: &ToolCall, message: impl std::fmt::Display) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: false,
            content: format!("Error: {message}"),
        }
    }
}

struct Entry {
    descriptor: ToolDescriptor,
    owner: usize,
}

pub struct ToolCatalog {
    endpoints: Vec<Arc<dyn Endpoint>>,
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    policy: RetryPolicy,
}

impl ToolCatalog {
    /// 合并所有 Ready 端点的工具；列出失败的端点跳过并告警
    pub async fn aggregate(endpoints: &[Arc<dyn Endpoint>], policy: RetryPolicy) -> Self {
        let mut catalog = Self {
            endpoints: Vec::new(),
            entries: Vec::new(),
            by_name: HashMap::new(),
            policy,
        };

        for endpoint in endpoints {
            if endpoint.state() != ConnectionState::Ready {
                tracing::debug!(server = %endpoint.name(), state = %endpoint.state(), "Skipping server that is not ready");
                continue;
            }
            let tools = match endpoint.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server = %endpoint.name(), error = %e, "Failed to list tools");
                    continue;
                }
            };
            let owner = catalog.endpoints.len();
            catalog.endpoints.push(Arc::clone(endpoint));
            for descriptor in tools {
                if let Some(&existing) = catalog.by_name.get(&descriptor.name) {
                    let winner = catalog.endpoints[catalog.entries[existing].owner].name();
                    tracing::debug!(tool = %descriptor.name, server = %endpoint.name(), winner = %winner, "Tool shadowed by earlier server");
                    continue;
                }
                catalog.by_name.insert(descriptor.name.clone(), catalog.entries.len());
                catalog.entries.push(Entry { descriptor, owner });
            }
        }

        tracing::info!(tools = catalog.entries.len(), servers = catalog.endpoints.len(), "Tool catalog built");
        catalog
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn descriptor_list(&self) -> Vec<ToolDescriptor> {
        self.descriptors().cloned().collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.descriptors().map(|d| d.name.clone()).collect()
    }

    /// 工具所属端点名称
    pub fn owner_of(&self, tool: &str) -> Option<&str> {
        self.by_name
            .get(tool)
            .map(|&i| self.endpoints[self.entries[i].owner].name())
    }

    /// 全部工具说明，拼入 system prompt
    pub fn describe_for_prompt(&self) -> String {
        self.descriptors()
            .map(ToolDescriptor::format_for_prompt)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let Some(&index) = self.by_name.get(&call.name) else {
            tracing::warn!(tool = %call.name, "No server found with tool");
            return ToolResult::failure(call, format!("No server found with tool '{}'", call.name));
        };
        if !call.arguments.is_object() {
            return ToolResult::failure(
                call,
                format!(
                    "Arguments for tool '{}' must be a JSON object, got: {}",
                    call.name,
                    args_preview(&call.arguments)
                ),
            );
        }

        let endpoint = &self.endpoints[self.entries[index].owner];
        let start = Instant::now();
        let outcome = endpoint
            .execute_tool(&call.name, call.arguments.clone(), &self.policy)
            .await;

        let (ok, label) = match &outcome {
            Ok(out) if !out.is_error => (true, "ok"),
            Ok(_) => (false, "tool_error"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "server": endpoint.name(),
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match outcome {
            Ok(out) if !out.is_error => ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                success: true,
                content: out.content,
            },
            Ok(out) => ToolResult::failure(call, out.content),
            Err(e) => ToolResult::failure(call, format!("Error executing tool '{}': {e}", call.name)),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
