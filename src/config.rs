//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再叠加显式指定的文件，最后用环境变量 `TASKLOOP__*` 覆盖
//! （双下划线表示嵌套，如 `TASKLOOP__ORCHESTRATOR__BATCH_WIDTH=1`）。
//! 各段缺省时取与 config/default.toml 相同的默认值。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::recovery::RetryPolicy;
use crate::core::SchedulerConfig;

/// 应用配置根
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub agent: AgentSection,
    pub orchestrator: OrchestratorSection,
    pub context: ContextSection,
    pub critic: CriticSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 长期记忆日志目录；未设置时只保留进程内记忆
    pub log_dir: Option<PathBuf>,
    /// 提示词模板目录（<name>.txt）
    pub prompts_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "taskloop".to_string(),
            log_dir: None,
            prompts_dir: PathBuf::from("config/prompts"),
        }
    }
}

/// [llm] 段：后端选择、限流与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 两次调用的最小间隔（毫秒），0 表示不限流
    pub min_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            min_interval_ms: 0,
            retry: RetryPolicy::default(),
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 重规划时表示「没有剩余工作」的标记，大小写与标点敏感
    pub done_sentinel: String,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            done_sentinel: crate::react::DEFAULT_DONE_SENTINEL.to_string(),
        }
    }
}

/// [agent] 段：ReAct 执行 agent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_react_steps: usize,
    /// 跨任务保留的历史轮数
    pub history_turns: usize,
    /// Think 时附带的共享上下文条数
    pub context_entries: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_react_steps: crate::react::DEFAULT_MAX_REACT_STEPS,
            history_turns: 20,
            context_entries: 10,
        }
    }
}

/// 主循环模式
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// 规划 -> 批量执行 -> 每批后重规划
    #[default]
    Replan,
    /// 一次性拆解为带依赖的任务图，由调度器跑完
    Dag,
}

/// [orchestrator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 每轮规划周期内的最大任务分发数
    pub max_steps: usize,
    pub batch_width: usize,
    pub enable_critic: bool,
    pub max_critic_rounds: usize,
    pub yield_ms: u64,
    pub idle_ms: u64,
    pub max_idle_polls: usize,
    pub mode: LoopMode,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_steps: 20,
            batch_width: 2,
            enable_critic: true,
            max_critic_rounds: 2,
            yield_ms: 100,
            idle_ms: 1000,
            max_idle_polls: 3,
            mode: LoopMode::Replan,
        }
    }
}

impl OrchestratorSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_width: self.batch_width.max(1),
            yield_interval: Duration::from_millis(self.yield_ms),
            idle_interval: Duration::from_millis(self.idle_ms),
            max_idle_polls: self.max_idle_polls.max(1),
            max_steps: self.max_steps,
        }
    }
}

/// [context] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub max_entries: usize,
    /// 长期记忆保留条数
    pub long_term_max_entries: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_entries: crate::memory::DEFAULT_MAX_ENTRIES,
            long_term_max_entries: 1000,
        }
    }
}

/// [critic] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CriticSection {
    pub approval_sentinel: String,
}

impl Default for CriticSection {
    fn default() -> Self {
        Self {
            approval_sentinel: crate::react::DEFAULT_APPROVAL_SENTINEL.to_string(),
        }
    }
}

/// [tools] 段：超时、重试、各能力开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次能力调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 所有能力的默认重试策略
    pub retry: RetryPolicy,
    pub fetch: FetchSection,
    pub enable_ask_human: bool,
    /// 注册 calculator / search / reasoner 委派能力（use_<name>_agent）
    pub enable_sub_agents: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            retry: RetryPolicy::none(),
            fetch: FetchSection::default(),
            enable_ask_human: false,
            enable_sub_agents: true,
        }
    }
}

/// [tools.fetch] 段：open_url 的超时、最大字符数、域名白名单（空表示不限制）与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKLOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    for name in ["config/default", "../config/default", "default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }
    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }
    builder = builder.add_source(
        config::Environment::with_prefix("TASKLOOP")
            .separator("__")
            .try_parsing(true),
    );
    builder.build()?.try_deserialize()
}

/// 读取 `<dir>/<name>.txt` 作为提示词模板；不存在或为空时使用内置默认
pub fn load_prompt(dir: &Path, name: &str, default: &str) -> String {
    let path = dir.join(format!("{name}.txt"));
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "prompt template loaded");
            text.trim().to_string()
        }
        _ => default.to_string(),
    }
}
