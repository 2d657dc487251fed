//! 编排器构建：按配置装配 LLM、记忆、能力注册表（含 calculator / search / reasoner 子 agent）、执行 agent、Planner、Critic
//!
//! 驱动入口与集成测试共用这一套装配逻辑；测试可通过 with_llm / with_human_input 注入替身。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{load_config, load_prompt, AppConfig};
use crate::core::orchestrator::{create_llm_from_config, Orchestrator};
use crate::llm::{LlmClient, RateLimitedLlmClient, RetryingLlmClient};
use crate::memory::{FactStore, FileLongTerm, InMemoryLongTerm, LongTermMemory, NoopLongTerm, SharedContext};
use crate::react::critic::DEFAULT_CRITIC_PROMPT;
use crate::react::events::LoopEvent;
use crate::react::loop_::DEFAULT_EXECUTOR_PROMPT;
use crate::react::planner::{DEFAULT_DECOMPOSE_PROMPT, DEFAULT_PLAN_PROMPT, DEFAULT_REPLAN_PROMPT};
use crate::react::{Critic, ExecutionAgent, Planner};
use crate::tools::{
    AskHumanTool, CacheReadTool, CacheWriteTool, CalculatorTool, DelegateTool, HumanInput, OpenUrlTool,
    SearchLtmTool, StdinHumanInput, ToolExecutor, ToolRegistry,
};

/// 默认执行 agent 的注册名
pub const EXECUTOR_AGENT: &str = "executor";

const CALCULATOR_AGENT_PROMPT: &str = "You are a calculator agent. Solve the arithmetic task with the calculate_expression action, \
then answer with Action: FINISH and the result in your Thought.";

const SEARCH_AGENT_PROMPT: &str = "You are a search agent. Gather the information the task asks for with open_url or search_ltm, \
then answer with Action: FINISH and a short summary of what you found in your Thought.";

const REASONER_AGENT_PROMPT: &str = "You are a reasoner agent. You have no actions. Draw conclusions only from the shared context \
shown with the task, and answer with Action: FINISH and your conclusion in your Thought.";

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    human: Option<Arc<dyn HumanInput>>,
    events: Option<UnboundedSender<LoopEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            human: None,
            events: None,
        }
    }

    /// 直接指定 LLM（跳过按配置选择后端）；仍会套上重试与限流
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换 ask_human 的输入来源
    pub fn with_human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn prompt(&self, name: &str, default: &str) -> String {
        load_prompt(&self.config.app.prompts_dir, name, default)
    }

    /// LLM：后端 -> 限流（可选）-> 重试
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let mut llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        if self.config.llm.min_interval_ms > 0 {
            llm = Arc::new(RateLimitedLlmClient::new(
                llm,
                Duration::from_millis(self.config.llm.min_interval_ms),
            ));
        }
        Arc::new(RetryingLlmClient::new(llm, self.config.llm.retry.clone()))
    }

    /// 长期记忆：long_term_max_entries 为 0 时关闭；配置了 log_dir 时落盘，打开失败退回进程内实现
    pub fn build_long_term(&self) -> Arc<dyn LongTermMemory> {
        let max_entries = self.config.context.long_term_max_entries;
        if max_entries == 0 {
            return Arc::new(NoopLongTerm);
        }
        match &self.config.app.log_dir {
            Some(dir) => {
                let path = dir.join("memory.log");
                match FileLongTerm::open(&path, max_entries) {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "persisted log unavailable, keeping memory in process");
                        Arc::new(InMemoryLongTerm::new(max_entries))
                    }
                }
            }
            None => Arc::new(InMemoryLongTerm::new(max_entries)),
        }
    }

    fn build_executor(&self, registry: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(registry, self.config.tools.tool_timeout_secs)
            .with_retry_policy(self.config.tools.retry.clone())
            .with_tool_policy("open_url", self.config.tools.fetch.retry.clone())
    }

    fn open_url(&self) -> OpenUrlTool {
        let fetch = &self.config.tools.fetch;
        OpenUrlTool::new(fetch.allowed_domains.clone(), fetch.timeout_secs, fetch.max_result_chars)
    }

    /// 把一个只带 `registry` 能力的子 agent 包装成 use_<name>_agent
    #[allow(clippy::too_many_arguments)]
    fn delegate(
        &self,
        name: &str,
        description: &str,
        system_prompt: String,
        registry: ToolRegistry,
        llm: &Arc<dyn LlmClient>,
        facts: &FactStore,
        context: &SharedContext,
    ) -> DelegateTool {
        let sub = ExecutionAgent::new(name, llm.clone(), Arc::new(self.build_executor(registry)))
            .with_system_prompt(system_prompt)
            .with_max_steps(self.config.agent.max_react_steps)
            .with_context(context.clone(), self.config.agent.context_entries);
        DelegateTool::new(name, description, Arc::new(sub), facts.clone(), context.clone())
    }

    /// 能力注册表；所有接入方式共享同一套能力
    pub fn build_tool_registry(
        &self,
        llm: &Arc<dyn LlmClient>,
        facts: &FactStore,
        context: &SharedContext,
        long_term: Arc<dyn LongTermMemory>,
    ) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let mut tools = ToolRegistry::new();

        tools.register(CalculatorTool);
        if tools_cfg.fetch.enabled {
            tools.register(self.open_url());
        }
        if tools_cfg.enable_ask_human {
            let human = self
                .human
                .clone()
                .unwrap_or_else(|| Arc::new(StdinHumanInput));
            tools.register(AskHumanTool::new(human));
        }
        if long_term.enabled() {
            tools.register(SearchLtmTool::new(long_term.clone()));
        }
        tools.register(CacheWriteTool::new(facts.clone()));
        tools.register(CacheReadTool::new(facts.clone()));

        if tools_cfg.enable_sub_agents {
            let mut calc = ToolRegistry::new();
            calc.register(CalculatorTool);
            tools.register(self.delegate(
                "calculator",
                "Delegate an arithmetic sub-task to the calculator agent. Args: {\"task\": \"...\"}",
                self.prompt("calculator_agent", CALCULATOR_AGENT_PROMPT),
                calc,
                llm,
                facts,
                context,
            ));

            let mut search = ToolRegistry::new();
            if tools_cfg.fetch.enabled {
                search.register(self.open_url());
            }
            if long_term.enabled() {
                search.register(SearchLtmTool::new(long_term));
            }
            // 没有可用的检索能力时不注册
            if !search.is_empty() {
                tools.register(self.delegate(
                    "search",
                    "Delegate an information-gathering sub-task to the search agent (web pages and the persisted log). Args: {\"task\": \"...\"}",
                    self.prompt("search_agent", SEARCH_AGENT_PROMPT),
                    search,
                    llm,
                    facts,
                    context,
                ));
            }

            tools.register(self.delegate(
                "reasoner",
                "Delegate a reasoning sub-task that only needs facts already in the shared context. Args: {\"task\": \"...\"}",
                self.prompt("reasoner_agent", REASONER_AGENT_PROMPT),
                ToolRegistry::new(),
                llm,
                facts,
                context,
            ));
        }

        tools
    }

    pub fn build_planner(&self, llm: Arc<dyn LlmClient>, registry: &ToolRegistry) -> Planner {
        Planner::new(llm)
            .with_prompts(
                self.prompt("plan", DEFAULT_PLAN_PROMPT),
                self.prompt("replan", DEFAULT_REPLAN_PROMPT),
                self.prompt("decompose", DEFAULT_DECOMPOSE_PROMPT),
            )
            .with_done_sentinel(self.config.planner.done_sentinel.clone())
            .with_capabilities(registry.describe_for_prompt())
    }

    pub fn build_critic(&self, llm: Arc<dyn LlmClient>) -> Critic {
        Critic::new(llm)
            .with_prompt(self.prompt("critic", DEFAULT_CRITIC_PROMPT))
            .with_approval_sentinel(self.config.critic.approval_sentinel.clone())
    }

    /// 装配完整编排器
    pub fn build(&self) -> Orchestrator {
        let llm = self.build_llm();
        let long_term = self.build_long_term();
        let context = SharedContext::new(self.config.context.max_entries).with_long_term(long_term.clone());
        let facts = FactStore::new();

        let registry = self.build_tool_registry(&llm, &facts, &context, long_term);
        tracing::info!(tools = ?registry.tool_names(), "capabilities registered");
        let planner = self.build_planner(llm.clone(), &registry);

        let mut agent = ExecutionAgent::new(EXECUTOR_AGENT, llm.clone(), Arc::new(self.build_executor(registry)))
            .with_system_prompt(self.prompt("executor", DEFAULT_EXECUTOR_PROMPT))
            .with_max_steps(self.config.agent.max_react_steps)
            .with_history_turns(self.config.agent.history_turns)
            .with_context(context.clone(), self.config.agent.context_entries);
        if let Some(tx) = &self.events {
            agent = agent.with_events(tx.clone());
        }

        let mut orchestrator = Orchestrator::new(planner, Arc::new(agent), context, facts)
            .with_settings(self.config.orchestrator.clone())
            .with_planning_context(self.config.agent.context_entries)
            .with_critic(self.build_critic(llm));
        if let Some(tx) = &self.events {
            orchestrator = orchestrator.with_events(tx.clone());
        }
        orchestrator
    }
}

/// 便捷函数：加载配置（失败时使用默认值）并创建构建器
pub fn create_orchestrator_builder(config_path: Option<&Path>) -> OrchestratorBuilder {
    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}

/// 持久化日志默认位置
pub fn default_log_path(config: &AppConfig) -> Option<PathBuf> {
    config.app.log_dir.as_ref().map(|dir| dir.join("memory.log"))
}
