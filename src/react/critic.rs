//! Critic：对最终答案做一次复核
//!
//! 回复经 trim + 大写归一化后与通过标记完全相等即为 Approved，其余文本都视为评审意见，
//! 由主循环折叠进下一轮规划的请求中。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

pub const DEFAULT_APPROVAL_SENTINEL: &str = "APPROVED";

pub const DEFAULT_CRITIC_PROMPT: &str = "You are a critical reviewer. Evaluate the assistant's answer provided in the 'Answer' section. \
If the answer is clear, correct and safe, respond with only the word '{approved}'. \
Otherwise, respond with a short critique explaining the problem.";

/// 评审结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    /// 评审意见原文（已 trim）
    Critique(String),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }

    /// 驱动层输出的标注文本
    pub fn annotation(&self) -> String {
        match self {
            Verdict::Approved => "approved".to_string(),
            Verdict::Critique(text) => format!("critique: {text}"),
        }
    }
}

pub struct Critic {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
    approval_sentinel: String,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            prompt_template: DEFAULT_CRITIC_PROMPT.to_string(),
            approval_sentinel: DEFAULT_APPROVAL_SENTINEL.to_string(),
        }
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_approval_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.approval_sentinel = sentinel.into();
        self
    }

    /// 归一化：去首尾空白并转大写
    pub fn normalize(text: &str) -> String {
        text.trim().to_uppercase()
    }

    pub async fn run_critic(&self, answer: &str) -> Result<Verdict, AgentError> {
        let system = self
            .prompt_template
            .replace("{approved}", &self.approval_sentinel);
        let messages = [
            Message::system(system),
            Message::user(format!("Answer:\n{answer}")),
        ];
        let response = self.llm.complete(&messages).await?;
        let verdict = if Self::normalize(&response) == Self::normalize(&self.approval_sentinel) {
            Verdict::Approved
        } else {
            Verdict::Critique(response.trim().to_string())
        };
        tracing::info!(approved = verdict.is_approved(), "critic verdict");
        Ok(verdict)
    }
}
