//! taskloop - 规划 / 执行 / 重规划 / 评审 任务编排循环
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与提示词模板
//! - **core**: 任务模型、调度器、主控循环、错误与重试、装配
//! - **llm**: 文本补全客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本）
//! - **memory**: 事实库、共享上下文、会话历史、长期记忆
//! - **react**: Planner、ReAct 执行 agent、Critic、过程事件
//! - **tools**: 能力注册表、执行器与具体能力

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, RunOutcome, Termination};
