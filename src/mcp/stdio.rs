//! stdio 传输：启动子进程，stdin/stdout 上按行收发 JSON-RPC

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::StdioConfig;
use crate::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::McpError;

/// 关闭 stdin 后等待子进程自行退出的时间
const EXIT_GRACE: Duration = Duration::from_secs(2);

pub struct StdioTransport {
    server: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
    /// 等待单个响应的上限；子进程挂起时请求以 Timeout 失败
    timeout: Duration,
}

impl StdioTransport {
    /// 启动子进程：父进程环境 + env 覆盖，stderr 直通终端
    pub fn spawn(server: &str, cfg: &StdioConfig, timeout: Duration) -> Result<Self, McpError> {
        if cfg.command.trim().is_empty() {
            return Err(McpError::Configuration(format!(
                "server '{server}': stdio command must not be empty"
            )));
        }
        tracing::info!(server = %server, command = %cfg.command, args = ?cfg.args, "Spawning MCP server process");

        let mut child = Command::new(&cfg.command)
            .args(&cfg.args)
            .envs(&cfg.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::connection(server, format!("spawn '{}': {e}", cfg.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection(server, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection(server, "failed to capture stdout"))?;

        Ok(Self {
            server: server.to_string(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            next_id: 1,
            timeout,
        })
    }

    async fn write_line(&mut self, json: &str) -> Result<(), McpError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Closed(format!("{} stdin closed", self.server)))?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// 发送请求并读取与之 id 匹配的响应；期间的通知、日志行等跳过
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        let json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.server, method = %method, id, "Sending request");
        self.write_line(&json).await?;

        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.read_response(id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(server = %self.server, method = %method, id, "No response within {}s", timeout.as_secs());
                Err(McpError::Timeout(timeout.as_secs().max(1)))
            }
        }
    }

    async fn read_response(&mut self, id: i64) -> Result<Value, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.stdout.read_line(&mut line).await?;
            if n == 0 {
                return Err(McpError::Closed(format!("{} exited", self.server)));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    tracing::debug!(server = %self.server, line = %trimmed, "Skipping non-JSON output");
                    continue;
                }
            };
            let is_response = value.get("result").is_some() || value.get("error").is_some();
            if !is_response {
                continue;
            }
            let resp: JsonRpcResponse = serde_json::from_value(value)?;
            if resp.id.as_i64() != Some(id) {
                tracing::debug!(server = %self.server, expected = id, got = ?resp.id, "Skipping stale response");
                continue;
            }
            return match resp.error {
                Some(err) => Err(err.into()),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            };
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_line(&json).await
    }

    /// 关闭顺序与建立相反：先关 stdin，再等待退出，超时则 kill
    pub async fn close(&mut self) -> Result<(), McpError> {
        drop(self.stdin.take());
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, %status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::debug!(server = %self.server, "MCP server did not exit, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}
