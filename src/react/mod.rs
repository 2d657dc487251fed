//! 认知层：Planner / Replanner、ReAct 执行 agent、Critic、过程事件

pub mod critic;
pub mod events;
pub mod loop_;
pub mod parser;
pub mod planner;

pub use critic::{Critic, Verdict, DEFAULT_APPROVAL_SENTINEL};
pub use events::LoopEvent;
pub use loop_::{observation_text, ExecutionAgent, ExecutionReport, DEFAULT_MAX_REACT_STEPS};
pub use parser::{parse_step, ReActStep, StepLine};
pub use planner::{parse_plan, Planner, ReplanOutcome, DEFAULT_DONE_SENTINEL};
