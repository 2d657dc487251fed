//! 任务定义：优先级、依赖、状态与结果
//!
//! Task 由 Planner 创建，仅由 TaskScheduler 修改 status / result；完成或失败后保留，用于依赖判断与事实传播。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待调度
    Pending,
    /// 正在执行
    InProgress,
    /// 已完成
    Completed,
    /// 失败（result 中为原因）
    Failed,
}

/// 单个子任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    /// 数值越小越紧急
    pub priority: i64,
    pub dependencies: BTreeSet<TaskId>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    /// 负责执行的 agent 名称（在调度器注册表中查找）
    pub assigned_agent: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: 0,
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            assigned_agent: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn assigned_to(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 结果的展示文本：字符串直接返回；含 final_thought 的对象取该字段；其它值序列化为 JSON
    pub fn result_text(&self) -> String {
        match &self.result {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(map)) => match map.get("final_thought") {
                Some(Value::String(s)) => s.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Some(other) => other.to_string(),
        }
    }

    /// 执行 agent 在步数上限内没有给出 FINISH
    pub fn hit_step_limit(&self) -> bool {
        matches!(&self.result, Some(Value::Object(map)) if map.get("stalled") == Some(&Value::Bool(true)))
    }
}
