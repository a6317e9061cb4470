//! 通用重试机制模块
//!
//! 固定间隔退避的重试逻辑，由 producer 和 consumer 共用。
//! 是否重试由调用方传入的分类函数决定。

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 重试策略：最多重试 `retries` 次，每次间隔固定的 `backoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次尝试）
    pub retries: u32,
    /// 每次重试前的等待时间
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// 总尝试次数
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// 第 n 次重试的延迟（固定间隔，与 n 无关）
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.backoff
    }
}

/// 重试失败结果
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// 最后一次错误
    pub error: E,
    /// 实际尝试次数
    pub attempts: u32,
    /// 是否因为预算耗尽而失败（false 表示遇到不可重试的错误）
    pub exhausted: bool,
}

/// 带分类的重试执行器
///
/// `should_retry` 返回 false 时立即放弃；否则在预算内按固定间隔重试。
/// 成功时返回结果和尝试次数。
pub async fn with_classified_retry<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok((result, attempt));
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(RetryFailure {
                        error: e,
                        attempts: attempt,
                        exhausted: false,
                    });
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Operation failed, no more retries"
                    );
                    return Err(RetryFailure {
                        error: e,
                        attempts: attempt,
                        exhausted: true,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
