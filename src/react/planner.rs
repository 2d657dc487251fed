//! Planner / Replanner
//!
//! initial_plan：把请求拆成编号列表，解析时去掉 `1.` / `2)` 等前缀并丢弃空行。
//! replan：给出原始请求与已完成工作，返回剩余任务；首行等于结束标记时视为「没有剩余工作」，
//! 与空计划（计划耗尽）是两种不同的终止。
//! decompose：要求模型输出 `{"subtasks": [...]}`，得到带优先级与依赖的任务图。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;

use crate::core::{AgentError, Task};
use crate::llm::LlmClient;
use crate::memory::{CompletedWork, FactStore, Message};

pub const DEFAULT_DONE_SENTINEL: &str = "Nothing.";

pub const DEFAULT_PLAN_PROMPT: &str = "You are a task planner. Break the user's request into a short numbered list of atomic tasks, one task per line. \
Each task must be solvable by an execution agent using the available actions. Output only the numbered list.";

pub const DEFAULT_REPLAN_PROMPT: &str = "You are a task replanner. Given the original request and the work completed so far, \
list only the tasks that are still required, as a numbered list, one per line. \
If the completed work already answers the request, reply with exactly: {done}";

pub const DEFAULT_DECOMPOSE_PROMPT: &str = "You are a task planning AI. Break the task into smaller subtasks, each atomic and achievable by a single agent. \
Consider dependencies between subtasks and parallel execution opportunities. \
Respond with a JSON object containing a \"subtasks\" array; each subtask has: id (unique string), description, priority (1 is most urgent), dependencies (array of task ids). \
Respond with valid JSON only, no additional text.";

/// 重规划结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanOutcome {
    /// 计划里只有结束标记
    Done,
    Remaining(Vec<String>),
    /// 解析后为空
    Exhausted,
}

fn enumeration_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").ok())
        .as_ref()
}

fn strip_enumeration(line: &str) -> String {
    match enumeration_re() {
        Some(re) => re.replace(line, "").trim().to_string(),
        None => line.trim().to_string(),
    }
}

/// 计划文本 -> 有序任务描述
pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_enumeration)
        .filter(|line| !line.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
struct Subtask {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Decomposition {
    subtasks: Vec<Subtask>,
}

/// 从回复中取出 JSON 对象（容忍 ```json 围栏与前后说明文字）
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    plan_prompt: String,
    replan_prompt: String,
    decompose_prompt: String,
    done_sentinel: String,
    capabilities: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            plan_prompt: DEFAULT_PLAN_PROMPT.to_string(),
            replan_prompt: DEFAULT_REPLAN_PROMPT.to_string(),
            decompose_prompt: DEFAULT_DECOMPOSE_PROMPT.to_string(),
            done_sentinel: DEFAULT_DONE_SENTINEL.to_string(),
            capabilities: "(none)".to_string(),
        }
    }

    pub fn with_prompts(
        mut self,
        plan: impl Into<String>,
        replan: impl Into<String>,
        decompose: impl Into<String>,
    ) -> Self {
        self.plan_prompt = plan.into();
        self.replan_prompt = replan.into();
        self.decompose_prompt = decompose.into();
        self
    }

    pub fn with_done_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.done_sentinel = sentinel.into();
        self
    }

    /// 规划时告知模型的能力列表
    pub fn with_capabilities(mut self, description: impl Into<String>) -> Self {
        self.capabilities = description.into();
        self
    }

    pub fn done_sentinel(&self) -> &str {
        &self.done_sentinel
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, AgentError> {
        let messages = [Message::system(system), Message::user(user)];
        Ok(self.llm.complete(&messages).await?)
    }

    pub async fn initial_plan(&self, query: &str, context: &str) -> Result<Vec<String>, AgentError> {
        let user = format!(
            "Available actions:\n{}\n\nRecent context:\n{}\n\nRequest: {}",
            self.capabilities,
            if context.is_empty() { "(empty)" } else { context },
            query
        );
        let text = self.ask(&self.plan_prompt, user).await?;
        let plan = parse_plan(&text);
        tracing::info!(tasks = plan.len(), "initial plan");
        Ok(plan)
    }

    pub async fn replan(
        &self,
        query: &str,
        completed: &CompletedWork,
        context: &str,
    ) -> Result<ReplanOutcome, AgentError> {
        let system = self.replan_prompt.replace("{done}", &self.done_sentinel);
        let user = format!(
            "Available actions:\n{}\n\nRequest: {}\n\nCompleted work:\n{}\n\nRecent context:\n{}\n\nList only the remaining tasks.",
            self.capabilities,
            query,
            completed.to_prompt_block(),
            if context.is_empty() { "(empty)" } else { context },
        );
        let text = self.ask(&system, user).await?;
        let plan = parse_plan(&text);
        // 结束标记与任务行混在一起时，只丢弃标记行，其余照常作为剩余任务
        let outcome = if plan.is_empty() {
            ReplanOutcome::Exhausted
        } else {
            let remaining: Vec<String> = plan.into_iter().filter(|line| *line != self.done_sentinel).collect();
            if remaining.is_empty() {
                ReplanOutcome::Done
            } else {
                ReplanOutcome::Remaining(remaining)
            }
        };
        tracing::info!(outcome = ?outcome, "replan");
        Ok(outcome)
    }

    /// 结构化拆解；缺失的 id 以 uuid 补齐，缺失的优先级取其在列表中的位置
    pub async fn decompose(
        &self,
        query: &str,
        facts: &FactStore,
        default_agent: &str,
    ) -> Result<Vec<Task>, AgentError> {
        let user = format!(
            "Task to break down: {}\n\nKnown facts: {}",
            query,
            facts.to_serialized()
        );
        let text = self.ask(&self.decompose_prompt, user).await?;
        let json = extract_json_object(&text)
            .ok_or_else(|| AgentError::PlanningFailed(format!("no JSON object in response: {text}")))?;
        let parsed: Decomposition = serde_json::from_str(json)
            .map_err(|e| AgentError::PlanningFailed(format!("{e}: {json}")))?;

        let tasks: Vec<Task> = parsed
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let id = s
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                Task::new(id, s.description)
                    .with_priority(s.priority.unwrap_or(i as i64))
                    .with_dependencies(s.dependencies)
                    .assigned_to(default_agent)
            })
            .collect();
        tracing::info!(tasks = tasks.len(), "decomposed");
        Ok(tasks)
    }
}
