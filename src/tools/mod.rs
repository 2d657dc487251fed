//! 能力层：注册表、参数 schema、执行器（超时 / 重试 / 审计）与具体能力

pub mod ask_human;
pub mod calculator;
pub mod delegate;
pub mod executor;
pub mod fetch;
pub mod memory_tools;
pub mod registry;
pub mod schema;

pub use ask_human::{AskHumanTool, HumanInput, StdinHumanInput};
pub use calculator::CalculatorTool;
pub use delegate::DelegateTool;
pub use executor::ToolExecutor;
pub use fetch::OpenUrlTool;
pub use memory_tools::{CacheReadTool, CacheWriteTool, SearchLtmTool};
pub use registry::{Tool, ToolRegistry};
