//! 能力注册表
//!
//! 所有能力实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! 执行 agent 在运行时按 Action 名解析，未注册的名字由 ToolExecutor 转为 UnknownCapability。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 能力 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// Action 行中使用的名字
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认为无参数的空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行；返回标量 / 字符串 / 结构化值，失败返回错误描述
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 按名称存储 Arc<dyn Tool>；BTreeMap 保证 prompt 中能力列表顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "capability re-registered, previous entry replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// prompt 中的 Available actions 段：每个能力一行描述 + 一行参数 schema
    pub fn describe_for_prompt(&self) -> String {
        if self.tools.is_empty() {
            return "(no actions available)".to_string();
        }
        self.tools
            .iter()
            .map(|(name, tool)| {
                format!(
                    "- {}: {}\n  args schema: {}",
                    name,
                    tool.description(),
                    compact_schema(&tool.parameters_schema())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 只保留 properties / required，去掉 $schema、title 等噪声
fn compact_schema(schema: &Value) -> String {
    let mut out = serde_json::Map::new();
    for key in ["properties", "required"] {
        if let Some(v) = schema.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(out).to_string()
}
