//! 能力执行器
//!
//! 调用边界的统一处理：名称解析（未知 -> UnknownCapability）、参数 schema 校验、超时、
//! 按能力名选择的重试策略；每次调用输出一条结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::recovery::{retry_with, Attempted, RetryPolicy};
use crate::core::AgentError;
use crate::tools::schema::validate_args;
use crate::tools::{Tool, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    default_policy: RetryPolicy,
    overrides: HashMap<String, RetryPolicy>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            default_policy: RetryPolicy::none(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 所有能力默认使用的重试策略
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// 为单个能力指定重试策略
    pub fn with_tool_policy(mut self, tool: impl Into<String>, policy: RetryPolicy) -> Self {
        self.overrides.insert(tool.into(), policy);
        self
    }

    fn policy_for(&self, tool: &str) -> &RetryPolicy {
        self.overrides.get(tool).unwrap_or(&self.default_policy)
    }

    /// 执行指定能力；None 参数视为空对象
    pub async fn execute(&self, tool_name: &str, args: Option<Value>) -> Result<Value, AgentError> {
        let start = Instant::now();
        let args = args.unwrap_or_else(|| Value::Object(Default::default()));
        let args_preview = args_preview(&args);

        let result = self.invoke(tool_name, args).await;
        let (value, attempts) = (result.value, result.attempts);

        let outcome = match &value {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(AgentError::UnknownCapability(_)) => "unknown",
            Err(AgentError::InvalidArguments { .. }) => "invalid_args",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": value.is_ok(),
            "outcome": outcome,
            "attempts": attempts,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        value
    }

    async fn invoke(
        &self,
        tool_name: &str,
        args: Value,
    ) -> Attempted<Result<Value, AgentError>> {
        let Some(tool) = self.registry.get(tool_name) else {
            return rejected(AgentError::UnknownCapability(tool_name.to_string()));
        };
        if let Err(reason) = validate_args(&tool.parameters_schema(), &args) {
            return rejected(AgentError::InvalidArguments {
                tool: tool_name.to_string(),
                reason,
            });
        }

        retry_with(
            self.policy_for(tool_name),
            tool_name,
            AgentError::is_retryable,
            || self.call_once(&tool, args.clone()),
        )
        .await
    }

    async fn call_once(&self, tool: &Arc<dyn Tool>, args: Value) -> Result<Value, AgentError> {
        match timeout(self.timeout, tool.execute(args)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool.name().to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

/// 调用前即被拒绝（未注册 / 参数不合法），不计调用次数
fn rejected(e: AgentError) -> Attempted<Result<Value, AgentError>> {
    Attempted {
        value: Err(e),
        attempts: 0,
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
