//! 重试与退避
//!
//! 能力调用与 LLM 调用共用同一套 RetryPolicy：指数退避、上限延迟、按错误类型判断是否可重试。
//! 各调用点不再各自写重试逻辑，统一走 retry_with。

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// 重试策略（可从配置反序列化，单位毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次调用）
    pub max_retries: usize,
    /// 首次重试前的等待
    pub initial_delay_ms: u64,
    /// 单次等待上限
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 attempt 次重试（从 0 开始）前的等待时间
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// 重试结果：最终值与实际调用次数
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: usize,
}

/// 按策略执行 op；仅当 is_retryable 返回 true 时退避重试，用尽次数后返回最后一次错误
pub async fn retry_with<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Attempted<Result<T, E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => {
                return Attempted {
                    value: Ok(v),
                    attempts: attempt + 1,
                }
            }
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    op = %label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Attempted {
                    value: Err(e),
                    attempts: attempt + 1,
                }
            }
        }
    }
}
