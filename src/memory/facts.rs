//! 事实库：执行过程中发现的键值事实
//!
//! 同键写入直接覆盖，无过期；序列化为 JSON 文本拼入 prompt。
//! 句柄可 Clone 共享，内部 RwLock 保护，批量并发执行时各任务写入不同前缀的键。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

#[derive(Clone, Debug, Default)]
pub struct FactStore {
    facts: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fact(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        tracing::debug!(key = %key, "fact added");
        self.facts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    pub fn get_fact(&self, key: &str) -> Option<Value> {
        self.facts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// 整个事实表的 JSON 文本（键有序，便于 prompt 稳定）
    pub fn to_serialized(&self) -> String {
        let facts = self.facts.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_string(&*facts).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.facts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.facts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_overwrites_and_get() {
        let store = FactStore::new();
        assert!(store.get_fact("t1_answer").is_none());
        store.add_fact("t1_answer", "3");
        store.add_fact("t1_answer", json!(4));
        assert_eq!(store.get_fact("t1_answer"), Some(json!(4)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_serialized_is_json_object() {
        let store = FactStore::new();
        assert_eq!(store.to_serialized(), "{}");
        store.add_fact("b", 2);
        store.add_fact("a", "x");
        assert_eq!(store.to_serialized(), r#"{"a":"x","b":2}"#);
    }

    #[test]
    fn test_clones_share_state() {
        let store = FactStore::new();
        let other = store.clone();
        other.add_fact("k", true);
        assert_eq!(store.get_fact("k"), Some(json!(true)));
    }
}
