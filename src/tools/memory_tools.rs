//! 记忆类能力：search_ltm / cache_write / cache_read
//!
//! search_ltm 检索长期记忆（上下文镜像日志）；cache_* 为键值暂存，落在 FactStore 的 `cache:<key>` 下，
//! 因此缓存内容同时对后续规划可见。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::{FactStore, LongTermMemory};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

const CACHE_PREFIX: &str = "cache:";

#[derive(Deserialize, JsonSchema)]
pub struct SearchLtmArgs {
    /// 检索关键词或问题
    pub query: String,
}

pub struct SearchLtmTool {
    memory: Arc<dyn LongTermMemory>,
    k: usize,
}

impl SearchLtmTool {
    pub fn new(memory: Arc<dyn LongTermMemory>) -> Self {
        Self { memory, k: 5 }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }
}

#[async_trait]
impl Tool for SearchLtmTool {
    fn name(&self) -> &str {
        "search_ltm"
    }

    fn description(&self) -> &str {
        "Search long-term memory for past entries relevant to the query."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchLtmArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: SearchLtmArgs = parse_args(args)?;
        let hits = self.memory.search(&args.query, self.k);
        if hits.is_empty() {
            return Ok(Value::String("No relevant memory found".to_string()));
        }
        Ok(Value::String(hits.join("\n")))
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct CacheWriteArgs {
    pub key: String,
    pub text: String,
}

pub struct CacheWriteTool {
    facts: FactStore,
}

impl CacheWriteTool {
    pub fn new(facts: FactStore) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for CacheWriteTool {
    fn name(&self) -> &str {
        "cache_write"
    }

    fn description(&self) -> &str {
        "Store text in a temporary cache by key."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CacheWriteArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: CacheWriteArgs = parse_args(args)?;
        let len = args.text.chars().count();
        self.facts
            .add_fact(format!("{CACHE_PREFIX}{}", args.key), args.text);
        Ok(Value::String(format!(
            "Cached {len} characters under '{}'.",
            args.key
        )))
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct CacheReadArgs {
    pub key: String,
}

pub struct CacheReadTool {
    facts: FactStore,
}

impl CacheReadTool {
    pub fn new(facts: FactStore) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for CacheReadTool {
    fn name(&self) -> &str {
        "cache_read"
    }

    fn description(&self) -> &str {
        "Read cached text by key. Returns an empty string if missing."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CacheReadArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: CacheReadArgs = parse_args(args)?;
        let text = match self.facts.get_fact(&format!("{CACHE_PREFIX}{}", args.key)) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Ok(Value::String(text))
    }
}
