//! 子 agent 委派能力：use_<name>_agent
//!
//! 把一个 ExecutionAgent 包装成能力，协调者可以把子任务交给专门的 agent（例如只带计算器的 calculator agent）。
//! 子 agent 运行前可读取共享上下文，结束后把 `<Name>: <task>` 与输出追加回共享上下文。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::{FactStore, SharedContext};
use crate::react::ExecutionAgent;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

#[derive(Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// 交给子 agent 的任务描述
    pub task: String,
}

pub struct DelegateTool {
    tool_name: String,
    display_name: String,
    description: String,
    agent: Arc<ExecutionAgent>,
    facts: FactStore,
    context: SharedContext,
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl DelegateTool {
    pub fn new(
        name: &str,
        description: impl Into<String>,
        agent: Arc<ExecutionAgent>,
        facts: FactStore,
        context: SharedContext,
    ) -> Self {
        Self {
            tool_name: format!("use_{name}_agent"),
            display_name: capitalize(name),
            description: description.into(),
            agent,
            facts,
            context,
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DelegateArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: DelegateArgs = parse_args(args)?;
        let task_id = format!("{}-{}", self.tool_name, uuid::Uuid::new_v4());
        let report = self
            .agent
            .run(&task_id, &args.task, &self.facts)
            .await
            .map_err(|e| e.to_string())?;
        self.context.add(format!(
            "{}: {}\n{}",
            self.display_name, args.task, report.final_thought
        ));
        Ok(Value::String(report.final_thought))
    }
}
