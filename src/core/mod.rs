//! 核心编排层：错误与重试、任务模型、调度器、主控循环与装配

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod task;
pub mod task_scheduler;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder, EXECUTOR_AGENT};
pub use error::AgentError;
pub use orchestrator::Orchestrator;
pub use recovery::{retry_with, RetryPolicy};
pub use state::{RunOutcome, Termination};
pub use task::{Task, TaskId, TaskStatus};
pub use task_scheduler::{RunReport, SchedulerConfig, TaskAgent, TaskScheduler};
