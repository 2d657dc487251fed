//! LLM 客户端抽象
//!
//! 规划、执行、评审三处都只依赖 LlmClient::complete；重试与限流以装饰器形式包在外层，
//! 调用方无需关心。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::recovery::{retry_with, RetryPolicy};
use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 限流、超时以及看起来像网络抖动的 API 错误可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout => true,
            LlmError::ApiError(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("connection")
                    || lower.contains("429")
                    || lower.contains("502")
                    || lower.contains("503")
            }
            LlmError::InvalidRequest(_) => false,
        }
    }
}

/// LLM 客户端 trait：给定消息序列返回补全文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)，不统计的实现返回 0
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 按 RetryPolicy 对可重试错误退避重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        retry_with(&self.policy, "llm", LlmError::is_retryable, || {
            self.inner.complete(messages)
        })
        .await
        .value
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

/// 两次调用之间至少间隔 min_interval
pub struct RateLimitedLlmClient {
    inner: Arc<dyn LlmClient>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_call: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LlmClient for RateLimitedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        {
            // 持锁等待，保证并发调用也按间隔排队
            let mut last = self.last_call.lock().await;
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < self.min_interval {
                    tokio::time::sleep(self.min_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }
        self.inner.complete(messages).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
