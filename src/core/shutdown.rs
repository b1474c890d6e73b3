//! 优雅关闭处理
//!
//! Ctrl+C / SIGTERM 触发取消令牌。令牌只打断空闲等待（读输入、轮询间隔）与推理循环的下一轮；
//! 正在执行的工具调用会跑完，会话返回后连接组才按注册逆序关闭。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::mcp::GroupGuard;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserInitiated => f.write_str("Ctrl+C"),
            ShutdownReason::Signal => f.write_str("SIGTERM"),
        }
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 获取关闭 token（传给推理循环与执行端轮询）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 运行会话直到它自行返回，然后逆序关闭连接组
///
/// 关闭信号不会丢弃会话 future：会话需要自己观察令牌并在空闲点退出，
/// 这样进行中的工具调用总能在连接关闭之前完成。
pub async fn run_until_shutdown<F, T>(manager: &ShutdownManager, guard: GroupGuard, app: F) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(app);
    let out = tokio::select! {
        out = &mut app => {
            tracing::debug!("Session finished normally");
            out
        }
        _ = manager.wait_for_shutdown() => {
            tracing::info!("Shutdown requested, waiting for session to finish");
            app.await
        }
    };
    guard.shutdown().await;
    out
}
