//! ReAct 执行 agent
//!
//! 每个任务内循环 Think -> Act -> Observe，直到某一步不再给出 Action，或达到最大步数。
//! 能力调用失败不会中断循环，而是以 `Error: ...` 形式写入 Observation；
//! 只有 LLM 本身的错误会向上传播，由调度器把任务标记为 Failed。
//!
//! agent 维护跨任务的运行历史（System 段固定在最前，之后是 Assistant 推理 / User 观察交替），
//! 每个任务开始时取历史快照，结束时把本任务的轮次追加回去，因此同一批次并发执行的任务互不干扰。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::core::{AgentError, Task, TaskAgent};
use crate::llm::LlmClient;
use crate::memory::{AgentHistory, FactStore, Message, SharedContext};
use crate::react::events::{emit, preview, LoopEvent};
use crate::react::parser::{parse_step, ReActStep};
use crate::tools::ToolExecutor;

/// 默认最大推理步数
pub const DEFAULT_MAX_REACT_STEPS: usize = 10;

pub const DEFAULT_EXECUTOR_PROMPT: &str = "You are an execution agent. You solve exactly one task at a time by reasoning step by step and calling the available actions. \
When the task is done, put the final answer in your Thought and reply with Action: FINISH.";

const FORMAT_INSTRUCTIONS: &str = "Respond in exactly this format:\n\
Thought: (your reasoning)\n\
Action: (action name, or FINISH if the task is done)\n\
Action Input: (action arguments as a JSON object)";

/// 单个任务的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub steps: Vec<ReActStep>,
    pub final_thought: String,
    /// 达到步数上限仍未结束
    pub stalled: bool,
}

/// 能力返回值的展示文本：字符串原样，其它标量直接转字符串，复合值序列化为 JSON
pub fn observation_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

pub struct ExecutionAgent {
    name: String,
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    system_prompt: String,
    history: Mutex<AgentHistory>,
    max_steps: usize,
    context: Option<(SharedContext, usize)>,
    events: Option<UnboundedSender<LoopEvent>>,
}

impl ExecutionAgent {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            name: name.into(),
            llm,
            executor,
            system_prompt: DEFAULT_EXECUTOR_PROMPT.to_string(),
            history: Mutex::new(AgentHistory::new(20)),
            max_steps: DEFAULT_MAX_REACT_STEPS,
            context: None,
            events: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history = Mutex::new(AgentHistory::new(turns));
        self
    }

    /// Think 时附带共享上下文最近 entries 条
    pub fn with_context(mut self, context: SharedContext, entries: usize) -> Self {
        self.context = Some((context, entries));
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    fn task_prompt(&self, description: &str, facts: &FactStore) -> String {
        let context = self
            .context
            .as_ref()
            .map(|(ctx, n)| ctx.get_context(Some(*n)))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "(empty)".to_string());
        format!(
            "Task: {description}\n\nAvailable actions:\n{}\n\nFacts:\n{}\n\nShared context:\n{}\n\n{}",
            self.executor.registry().describe_for_prompt(),
            facts.to_serialized(),
            context,
            FORMAT_INSTRUCTIONS
        )
    }

    /// Think：System + 历史 + 本任务轮次 -> 一步推理
    async fn think(&self, history: &[Message], turns: &[Message]) -> Result<ReActStep, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + turns.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(history);
        messages.extend_from_slice(turns);
        let raw = self.llm.complete(&messages).await?;
        Ok(parse_step(&raw))
    }

    /// Act + Observe：任何失败都折叠为 `Error: ...`
    async fn act(&self, task_id: &str, action: &str, input: Option<&serde_json::Map<String, Value>>) -> String {
        let args = input.cloned().map(Value::Object);
        emit(
            self.events.as_ref(),
            LoopEvent::ToolCall {
                task_id: task_id.to_string(),
                tool: action.to_string(),
                args: args.clone().unwrap_or(Value::Null),
            },
        );
        let observation = match self.executor.execute(action, args).await {
            Ok(value) => observation_text(&value),
            Err(e) => {
                tracing::warn!(agent = %self.name, tool = %action, error = %e, "action failed");
                format!("Error: {e}")
            }
        };
        emit(
            self.events.as_ref(),
            LoopEvent::Observation {
                task_id: task_id.to_string(),
                tool: action.to_string(),
                preview: preview(&observation),
            },
        );
        observation
    }

    /// 执行一个任务描述，返回完整推理轨迹
    pub async fn run(&self, task_id: &str, description: &str, facts: &FactStore) -> Result<ExecutionReport, AgentError> {
        let history = self.history.lock().await.messages().to_vec();
        let mut turns = vec![Message::user(self.task_prompt(description, facts))];
        let mut steps: Vec<ReActStep> = Vec::new();
        let mut finished = false;

        for step_no in 1..=self.max_steps {
            let mut step = self.think(&history, &turns).await?;
            tracing::debug!(agent = %self.name, task = %task_id, step = step_no, action = ?step.action, "react step");

            let Some(action) = step.action.clone() else {
                turns.push(Message::assistant(step.render()));
                steps.push(step);
                finished = true;
                break;
            };
            let observation = self.act(task_id, &action, step.action_input.as_ref()).await;
            turns.push(Message::assistant(step.render()));
            turns.push(Message::user(format!("Observation: {observation}")));
            step.observation = Some(observation);
            steps.push(step);
        }

        if !finished {
            tracing::warn!(agent = %self.name, task = %task_id, max_steps = self.max_steps, "react step limit reached");
            emit(
                self.events.as_ref(),
                LoopEvent::StepLimitReached {
                    task_id: task_id.to_string(),
                    max_steps: self.max_steps,
                },
            );
        }

        self.history.lock().await.extend(turns);

        let final_thought = steps
            .last()
            .map(|s| {
                if s.thought.is_empty() {
                    s.observation.clone().unwrap_or_default()
                } else {
                    s.thought.clone()
                }
            })
            .unwrap_or_default();

        Ok(ExecutionReport {
            steps,
            final_thought,
            stalled: !finished,
        })
    }
}

#[async_trait]
impl TaskAgent for ExecutionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &Task, facts: &FactStore) -> Result<Value, AgentError> {
        let report = self.run(&task.id, &task.description, facts).await?;
        serde_json::to_value(report).map_err(|e| AgentError::JsonParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;
    use crate::tools::{CalculatorTool, ToolRegistry};
    use serde_json::json;

    fn calculator_executor() -> Arc<ToolExecutor> {
        let mut reg = ToolRegistry::new();
        reg.register(CalculatorTool);
        Arc::new(ToolExecutor::new(reg, 5))
    }

    #[test]
    fn test_observation_text() {
        assert_eq!(observation_text(&json!("4")), "4");
        assert_eq!(observation_text(&json!(4)), "4");
        assert_eq!(observation_text(&json!(true)), "true");
        assert_eq!(observation_text(&json!({"a": [1, 2]})), "{\"a\":[1,2]}");
    }

    #[tokio::test]
    async fn test_think_act_observe_until_finish() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "Thought: compute it\nAction: calculate_expression\nAction Input: {\"expression\": \"2 + 2\"}",
            "Thought: The answer is 4\nAction: FINISH",
        ]));
        let agent = ExecutionAgent::new("executor", llm.clone(), calculator_executor());
        let report = agent.run("t1", "What is 2 + 2?", &FactStore::new()).await.unwrap();

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].observation.as_deref(), Some("4"));
        assert_eq!(report.final_thought, "The answer is 4");
        assert!(!report.stalled);

        let second_call = &llm.prompts()[1];
        assert_eq!(second_call[0].role, Role::System);
        assert!(second_call.last().unwrap().content.starts_with("Observation: 4"));
    }

    #[tokio::test]
    async fn test_capability_error_becomes_observation() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "Thought: try\nAction: teleport\nAction Input: {}",
            "Thought: divide\nAction: calculate_expression\nAction Input: {\"expression\": \"1/0\"}",
            "Thought: cannot be done\nAction: FINISH",
        ]));
        let agent = ExecutionAgent::new("executor", llm, calculator_executor());
        let report = agent.run("t1", "x", &FactStore::new()).await.unwrap();
        let obs: Vec<&str> = report
            .steps
            .iter()
            .filter_map(|s| s.observation.as_deref())
            .collect();
        assert_eq!(obs.len(), 2);
        assert!(obs[0].starts_with("Error:") && obs[0].contains("teleport"));
        assert!(obs[1].starts_with("Error:") && obs[1].contains("division by zero"));
        assert_eq!(report.final_thought, "cannot be done");
    }

    #[tokio::test]
    async fn test_step_cap_reports_stall_with_last_thought() {
        let llm = Arc::new(
            ScriptedLlmClient::new(Vec::<String>::new()).with_fallback(
                "Thought: keep going\nAction: calculate_expression\nAction Input: {\"expression\": \"1\"}",
            ),
        );
        let agent = ExecutionAgent::new("executor", llm.clone(), calculator_executor()).with_max_steps(3);
        let report = agent.run("t1", "loop", &FactStore::new()).await.unwrap();
        assert!(report.stalled);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.final_thought, "keep going");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_history_carries_across_tasks() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "Thought: first done\nAction: FINISH",
            "Thought: second done",
        ]));
        let agent = ExecutionAgent::new("executor", llm.clone(), calculator_executor());
        agent.run("t1", "first", &FactStore::new()).await.unwrap();
        assert_eq!(agent.history_len().await, 2);
        agent.run("t2", "second", &FactStore::new()).await.unwrap();

        let second = &llm.prompts()[1];
        assert!(second.iter().any(|m| m.content.contains("Thought: first done")));
        assert!(second[1].content.starts_with("Task: first"));
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let agent = ExecutionAgent::new("executor", llm, calculator_executor());
        let task = Task::new("t1", "x");
        assert!(agent.execute(&task, &FactStore::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_prompt_includes_facts_and_actions() {
        let llm = Arc::new(ScriptedLlmClient::new(["Thought: ok"]));
        let facts = FactStore::new();
        facts.add_fact("t0_final_thought", "Thriller");
        let ctx = SharedContext::new(10);
        ctx.add("User query: album?");
        let agent = ExecutionAgent::new("executor", llm.clone(), calculator_executor()).with_context(ctx, 5);
        agent.run("t1", "Find the album", &facts).await.unwrap();
        let prompt = &llm.prompts()[0][1].content;
        assert!(prompt.contains("Task: Find the album"));
        assert!(prompt.contains("calculate_expression"));
        assert!(prompt.contains("Thriller"));
        assert!(prompt.contains("User query: album?"));
    }
}
