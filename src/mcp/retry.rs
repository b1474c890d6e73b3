//! 工具调用重试：固定间隔，非指数退避

use std::future::Future;
use std::time::Duration;

use crate::mcp::McpError;

/// 重试策略：总尝试次数与两次尝试之间的固定间隔
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// 0 次视为 1 次
    pub fn effective_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// 按策略执行 op；可重试错误间隔 delay 后再试，用尽后原样返回最后一次错误
pub async fn retry_fixed<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, McpError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, McpError>>,
{
    let attempts = policy.effective_attempts();
    let mut attempt = 1;
    loop {
        tracing::debug!(op = %label, attempt, attempts, "Attempt {} of {}", attempt, attempts);
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(
                    op = %label,
                    attempt,
                    error = %e,
                    "Attempt failed, retrying in {}ms",
                    policy.delay.as_millis()
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(op = %label, attempt, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::error_codes;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_two_delays() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1000);
        let start = tokio::time::Instant::now();

        let result = retry_fixed(&policy, "t", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(McpError::Closed("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 暂停时钟下，耗时恰为 2 次间隔
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_after_exhausting() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = retry_fixed(&policy, "t", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(McpError::Transport(format!("fail {attempt}"))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(McpError::Transport(msg)) => assert_eq!(msg, "fail 2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_params_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 10);
        let result: Result<(), _> = retry_fixed(&policy, "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(McpError::Rpc {
                    code: error_codes::INVALID_PARAMS,
                    message: "bad args".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_treated_as_one() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, 10);
        let _: Result<(), _> = retry_fixed(&policy, "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(McpError::Timeout(1)) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
