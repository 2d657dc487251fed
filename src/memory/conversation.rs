//! 消息与 agent 运行历史
//!
//! Message 为 LLM 调用的基本单元；AgentHistory 保存执行 agent 跨任务的 Thought/Action 与 Observation 轮次，
//! 超出 max_turns 时丢弃最旧的一轮（system 段不在其中，每次调用时固定放在最前）。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 执行 agent 的历史：Assistant(推理) / User(观察) 交替
#[derive(Clone, Debug)]
pub struct AgentHistory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl AgentHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// 记录一轮：推理文本 + 观察文本
    pub fn push_turn(&mut self, assistant: impl Into<String>, observation: impl Into<String>) {
        self.messages.push(Message::assistant(assistant));
        self.messages.push(Message::user(observation));
        self.prune();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 纯文本形式（Human / Assistant 前缀），用于拼入单条 prompt
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m.role {
                Role::System => format!("System: {}", m.content),
                Role::User => format!("Human: {}", m.content),
                Role::Assistant => format!("Assistant: {}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prune(&mut self) {
        let keep = self.max_turns * 2;
        if self.messages.len() > keep {
            let excess = self.messages.len() - keep;
            self.messages.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_latest_turns() {
        let mut h = AgentHistory::new(2);
        for i in 0..3 {
            h.push_turn(format!("Thought: t{i}"), format!("Observation: o{i}"));
        }
        assert_eq!(h.len(), 4);
        assert_eq!(h.messages()[0].content, "Thought: t1");
        assert_eq!(h.messages()[0].role, Role::Assistant);
    }

    #[test]
    fn test_render() {
        let mut h = AgentHistory::new(5);
        h.push_turn("Thought: add", "Observation: 4");
        assert_eq!(h.render(), "Assistant: Thought: add\nHuman: Observation: 4");
    }
}
