//! 测试用 LLM 客户端（无需 API）
//!
//! MockLlmClient：无 API Key 时的占位后端，按 system 段的角色描述给出可让主循环跑通的固定格式回复。
//! ScriptedLlmClient：按顺序返回预设回复，并记录每次收到的消息，供测试断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// 占位客户端：规划时把请求原样作为单步计划，重规划时返回结束标记，执行时直接 FINISH，评审时通过
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();
        let user = last_user(messages);

        let reply = if system.contains("replanner") {
            "Nothing.".to_string()
        } else if system.contains("planner") {
            let last = user.lines().last().unwrap_or(user).trim();
            format!("1. {}", last.strip_prefix("Request:").unwrap_or(last).trim())
        } else if system.contains("critic") {
            "APPROVED".to_string()
        } else {
            format!(
                "Thought: (mock) no model configured, echoing the task\nAction: FINISH\n\n{}",
                user.lines().next().unwrap_or_default()
            )
        };
        Ok(reply)
    }
}

/// 脚本客户端：依次返回 responses，用尽后返回 fallback（若未设置则报错）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 脚本用尽后一直返回该文本
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// 已收到的全部调用（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(text) => Ok(text),
            None => Err(LlmError::ApiError("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_returns_in_order_and_records() {
        let llm = ScriptedLlmClient::new(["one", "two"]);
        assert_eq!(llm.complete(&[Message::user("a")]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[Message::user("b")]).await.unwrap(), "two");
        assert!(llm.complete(&[Message::user("c")]).await.is_err());
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.prompts()[1][0].content, "b");
    }

    #[tokio::test]
    async fn test_scripted_fallback() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new()).with_fallback("APPROVED");
        assert_eq!(llm.complete(&[]).await.unwrap(), "APPROVED");
    }

    #[tokio::test]
    async fn test_mock_routes_by_system_tag() {
        let llm = MockLlmClient;
        let r = llm
            .complete(&[Message::system("You are a task replanner."), Message::user("x")])
            .await
            .unwrap();
        assert_eq!(r, "Nothing.");
        let r = llm
            .complete(&[Message::system("You are a strict critic."), Message::user("x")])
            .await
            .unwrap();
        assert_eq!(r, "APPROVED");
    }
}
