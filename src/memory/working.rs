//! 已完成工作列表：(任务描述, 结果) 对
//!
//! 仅在一次规划周期内有效，用于拼重规划 prompt 的已完成工作段。

#[derive(Clone, Debug, Default)]
pub struct CompletedWork {
    items: Vec<(String, String)>,
}

impl CompletedWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl Into<String>, result: impl Into<String>) {
        self.items.push((task.into(), result.into()));
    }

    pub fn items(&self) -> &[(String, String)] {
        &self.items
    }

    pub fn last_result(&self) -> Option<&str> {
        self.items.last().map(|(_, r)| r.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 重规划 prompt 用：`- 任务: 结果`，为空时为 `(none)`
    pub fn to_prompt_block(&self) -> String {
        if self.items.is_empty() {
            return "(none)".to_string();
        }
        self.items
            .iter()
            .map(|(t, r)| format!("- {}: {}", t, r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks() {
        let mut w = CompletedWork::new();
        assert_eq!(w.to_prompt_block(), "(none)");
        assert_eq!(w.last_result(), None);
        w.push("Find album", "Thriller");
        w.push("Count singles", "7");
        assert_eq!(w.to_prompt_block(), "- Find album: Thriller\n- Count singles: 7");
        assert_eq!(w.last_result(), Some("7"));
    }
}
