//! 运行结果：最终答案、终止原因、评审结论与已完成工作
//!
//! 主循环的所有失败都降级为某种 Termination，而不是错误返回。

use std::fmt;

use serde::Serialize;

use crate::react::Verdict;

/// 一次运行为何停止
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// 重规划返回结束标记，或 DAG 模式下所有任务已完成
    Completed,
    /// 计划为空（初始计划或重规划），视为「无事可做」
    PlanExhausted,
    /// 达到步数上限，答案为已有的部分结果
    BudgetExhausted,
    /// 剩余任务的依赖永远无法满足
    Stalled,
    /// 规划阶段 LLM 调用或解析失败
    PlanningFailed(String),
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Completed => "completed",
            Termination::PlanExhausted => "plan_exhausted",
            Termination::BudgetExhausted => "budget_exhausted",
            Termination::Stalled => "stalled",
            Termination::PlanningFailed(_) => "planning_failed",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::PlanningFailed(reason) => write!(f, "planning_failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Orchestrator::run 的返回值
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub answer: String,
    pub termination: Termination,
    /// 未启用评审时为 None；多轮评审时为最后一轮的结论
    pub verdict: Option<Verdict>,
    /// 最后一轮规划周期中的 (任务描述, 结果)
    pub completed: Vec<(String, String)>,
    /// 全部周期内分发的任务总数
    pub steps: usize,
    /// 实际执行的规划周期数（含评审触发的重跑）
    pub cycles: usize,
    /// 步数用尽仍未 FINISH 的任务描述（全部周期）
    pub step_limited: Vec<String>,
}

impl RunOutcome {
    pub fn is_approved(&self) -> bool {
        self.verdict.as_ref().is_some_and(Verdict::is_approved)
    }
}
