//! 共享上下文缓冲：有界、有序的文本日志
//!
//! 每次规划与执行前都会读取最近的条目；超过 max_entries 时淘汰序号最小的条目。
//! 每条写入同时镜像到长期记忆（追加日志 / 检索）。

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::memory::LongTermMemory;

/// 默认容量
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// 单条上下文
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    /// 单调递增序号
    pub seq: u64,
    pub text: String,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<ContextEntry>,
    next_seq: u64,
    max_entries: usize,
}

/// 共享上下文句柄（Clone 后指向同一缓冲）
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<Inner>>,
    long_term: Option<Arc<dyn LongTermMemory>>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl SharedContext {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: VecDeque::new(),
                next_seq: 0,
                max_entries: max_entries.max(1),
            })),
            long_term: None,
        }
    }

    /// 镜像写入长期记忆
    pub fn with_long_term(mut self, long_term: Arc<dyn LongTermMemory>) -> Self {
        self.long_term = Some(long_term);
        self
    }

    pub fn long_term(&self) -> Option<&Arc<dyn LongTermMemory>> {
        self.long_term.as_ref()
    }

    /// 追加一条，返回其序号
    pub fn add(&self, text: impl Into<String>) -> u64 {
        let text = text.into();
        let seq = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_back(ContextEntry {
                seq,
                text: text.clone(),
            });
            while inner.entries.len() > inner.max_entries {
                inner.entries.pop_front();
            }
            seq
        };
        if let Some(lt) = &self.long_term {
            lt.add(&text);
        }
        seq
    }

    /// 最近 n 条（None 表示全部，且不超过容量），按时间先后排列
    pub fn entries(&self, n: Option<usize>) -> Vec<ContextEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let n = n.unwrap_or(inner.max_entries).min(inner.max_entries);
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// 最近 n 条的文本，以换行连接
    pub fn get_context(&self, n: Option<usize>) -> String {
        self.entries(n)
            .into_iter()
            .map(|e| e.text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLongTerm;

    #[test]
    fn test_get_context_returns_latest_in_order() {
        let ctx = SharedContext::new(5);
        for i in 0..4 {
            ctx.add(format!("entry {i}"));
        }
        assert_eq!(ctx.get_context(Some(2)), "entry 2\nentry 3");
        assert_eq!(ctx.get_context(None), "entry 0\nentry 1\nentry 2\nentry 3");
        assert_eq!(ctx.get_context(Some(100)).lines().count(), 4);
        assert_eq!(ctx.get_context(Some(0)), "");
    }

    #[test]
    fn test_eviction_drops_oldest_exactly() {
        let ctx = SharedContext::new(3);
        for i in 0..7 {
            ctx.add(format!("e{i}"));
            assert!(ctx.len() <= 3);
        }
        let seqs: Vec<u64> = ctx.entries(None).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
        assert_eq!(ctx.get_context(Some(10)), "e4\ne5\ne6");
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let ctx = SharedContext::new(2);
        let a = ctx.add("a");
        let b = ctx.add("b");
        let c = ctx.add("c");
        assert!(a < b && b < c);
        let entries = ctx.entries(Some(2));
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_mirrors_to_long_term() {
        let lt = Arc::new(InMemoryLongTerm::new(10));
        let ctx = SharedContext::new(1).with_long_term(lt.clone());
        ctx.add("Search: album lookup\nThriller");
        ctx.add("something else entirely");
        assert_eq!(ctx.len(), 1);
        assert_eq!(lt.search("album", 5).len(), 1);
    }
}
