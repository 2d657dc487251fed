//! 编排错误类型
//!
//! 规划、能力调用、调度三层的错误统一为 AgentError；除 LLM 之外的错误都会被降级为可检查的结果（任务 Failed / Observation 中的 Error:），不会终止进程。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Unknown action: {0}")]
    UnknownCapability(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 任务的依赖尚未全部 Completed，不允许进入 InProgress
    #[error("Dependencies not met for task {task_id}: {missing:?}")]
    DependenciesUnmet { task_id: String, missing: Vec<String> },

    #[error("Scheduler stalled with {0} unreachable task(s)")]
    Stalled(usize),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否值得按退避策略重试（超时、限流等暂时性错误）
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::ToolTimeout(_) => true,
            AgentError::LlmError(e) => e.is_retryable(),
            AgentError::ToolExecutionFailed(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection")
                    || lower.contains("rate limit")
                    || lower.contains("429")
                    || lower.contains("503")
            }
            _ => false,
        }
    }
}
