//! ReAct 输出解析
//!
//! 逐行分类为 Thought / Action / Action Input / Observation / 续行，再折叠成一个 ReActStep。
//! 解析永不失败：缺少 Action 视为结束，Action Input 不是 JSON 对象时退化为空映射。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 表示「本任务已完成」的 Action 值
pub const FINISH_ACTION: &str = "FINISH";

/// 单步推理
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReActStep {
    pub thought: String,
    /// None 表示不再调用能力，循环结束
    pub action: Option<String>,
    pub action_input: Option<Map<String, Value>>,
    pub observation: Option<String>,
}

impl ReActStep {
    /// 写回历史的 Assistant 文本
    pub fn render(&self) -> String {
        let mut out = format!("Thought: {}", self.thought);
        out.push_str(&format!(
            "\nAction: {}",
            self.action.as_deref().unwrap_or(FINISH_ACTION)
        ));
        if let Some(input) = &self.action_input {
            out.push_str(&format!(
                "\nAction Input: {}",
                Value::Object(input.clone())
            ));
        }
        out
    }

    pub fn is_final(&self) -> bool {
        self.action.is_none()
    }
}

/// 行分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepLine<'a> {
    Thought(&'a str),
    Action(&'a str),
    ActionInput(&'a str),
    /// 模型自行编造的观察，解析到此为止
    Observation,
    Continuation(&'a str),
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let head = line.get(..marker.len())?;
    if head.eq_ignore_ascii_case(marker) {
        line.get(marker.len()..).map(str::trim)
    } else {
        None
    }
}

pub fn classify(line: &str) -> StepLine<'_> {
    let trimmed = line.trim_start();
    // 先匹配 "Action Input:"，避免被 "Action:" 前缀吞掉
    if let Some(rest) = strip_marker(trimmed, "Action Input:") {
        StepLine::ActionInput(rest)
    } else if let Some(rest) = strip_marker(trimmed, "Action:") {
        StepLine::Action(rest)
    } else if let Some(rest) = strip_marker(trimmed, "Thought:") {
        StepLine::Thought(rest)
    } else if strip_marker(trimmed, "Observation:").is_some() {
        StepLine::Observation
    } else {
        StepLine::Continuation(line)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Thought,
    Action,
    ActionInput,
}

/// 去掉 ``` / ```json 围栏
fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

/// Action Input 文本 -> 映射；非对象或解析失败时为空映射
pub fn parse_action_input(text: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(strip_fences(text)) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::debug!(input = %text, "action input is not a JSON object, using empty mapping");
            Map::new()
        }
    }
}

fn normalize_action(raw: &str) -> Option<String> {
    let name = raw.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'').trim();
    if name.is_empty() || name.eq_ignore_ascii_case(FINISH_ACTION) {
        None
    } else {
        Some(name.to_string())
    }
}

/// 解析一次 LLM 回复；任何标记之前的文本归入 thought
pub fn parse_step(raw: &str) -> ReActStep {
    let mut thought: Vec<&str> = Vec::new();
    let mut action: Option<&str> = None;
    let mut input: Option<Vec<&str>> = None;
    let mut field = Field::Thought;

    for line in raw.lines() {
        match classify(line) {
            StepLine::Thought(rest) => {
                field = Field::Thought;
                thought.push(rest);
            }
            StepLine::Action(rest) => {
                field = Field::Action;
                action = Some(rest);
            }
            StepLine::ActionInput(rest) => {
                field = Field::ActionInput;
                input = Some(vec![rest]);
            }
            StepLine::Observation => break,
            StepLine::Continuation(text) => match field {
                Field::Thought => thought.push(text),
                Field::ActionInput => {
                    if let Some(lines) = input.as_mut() {
                        lines.push(text);
                    }
                }
                Field::Action => {}
            },
        }
    }

    ReActStep {
        thought: thought.join("\n").trim().to_string(),
        action: action.and_then(normalize_action),
        action_input: input.map(|lines| parse_action_input(&lines.join("\n"))),
        observation: None,
    }
}
