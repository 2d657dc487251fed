//! 主控循环：规划 -> 批量执行 -> 重规划 -> 评审
//!
//! replan 模式：初始计划按 batch_width 切批交给调度器并发执行，每批结束后把 (任务, 结果) 交给 Replanner，
//! 收到结束标记即停止；计划为空视为「无事可做」。
//! dag 模式：一次性拆解为带依赖的任务图，由 TaskScheduler::run 跑完或停滞。
//! 两种模式结束后都可由 Critic 复核答案，评审意见折叠进请求后重跑整个周期，重跑次数受 max_critic_rounds 限制。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, LoopMode, OrchestratorSection};
use crate::core::state::{RunOutcome, Termination};
use crate::core::task::{Task, TaskStatus};
use crate::core::{AgentError, TaskAgent, TaskScheduler};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{CompletedWork, FactStore, SharedContext};
use crate::react::events::{emit, LoopEvent};
use crate::react::{Critic, Planner, ReplanOutcome, Verdict};

/// 规划与重规划时附带的共享上下文条数
const DEFAULT_PLANNING_CONTEXT: usize = 10;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek" => match create_deepseek_client(Some(&cfg.llm.model)) {
            Some(client) => {
                tracing::info!(model = %client.model(), "Using DeepSeek LLM");
                Arc::new(client)
            }
            None => {
                tracing::warn!("DEEPSEEK_API_KEY / OPENAI_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        other => match std::env::var("OPENAI_API_KEY") {
            Ok(key) => {
                if other != "openai" {
                    tracing::warn!(provider = %other, "unknown provider, treating as OpenAI compatible");
                }
                tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
                Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, &key))
            }
            Err(_) => {
                tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient)
            }
        },
    }
}

/// 单个规划周期的结果
struct Cycle {
    termination: Termination,
    completed: CompletedWork,
    /// 最后一个成功任务的结果
    answer: Option<String>,
    steps: usize,
    step_limited: Vec<String>,
}

impl Cycle {
    fn ended(termination: Termination) -> Self {
        Self {
            termination,
            completed: CompletedWork::new(),
            answer: None,
            steps: 0,
            step_limited: Vec::new(),
        }
    }

    fn planning_failed(e: AgentError) -> Self {
        tracing::warn!(error = %e, "planning failed");
        Self::ended(Termination::PlanningFailed(e.to_string()))
    }

    fn answer(&self) -> String {
        self.answer
            .clone()
            .or_else(|| self.completed.last_result().map(str::to_string))
            .unwrap_or_default()
    }
}

pub struct Orchestrator {
    planner: Planner,
    agent: Arc<dyn TaskAgent>,
    critic: Option<Critic>,
    context: SharedContext,
    facts: FactStore,
    settings: OrchestratorSection,
    planning_context: usize,
    events: Option<UnboundedSender<LoopEvent>>,
    next_task: AtomicU64,
}

impl Orchestrator {
    pub fn new(planner: Planner, agent: Arc<dyn TaskAgent>, context: SharedContext, facts: FactStore) -> Self {
        Self {
            planner,
            agent,
            critic: None,
            context,
            facts,
            settings: OrchestratorSection::default(),
            planning_context: DEFAULT_PLANNING_CONTEXT,
            events: None,
            next_task: AtomicU64::new(1),
        }
    }

    pub fn with_critic(mut self, critic: Critic) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSection) -> Self {
        self.settings = settings;
        self
    }

    /// 每个规划周期的任务分发上限
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.settings.max_steps = max_steps;
        self
    }

    pub fn with_planning_context(mut self, entries: usize) -> Self {
        self.planning_context = entries;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn settings(&self) -> &OrchestratorSection {
        &self.settings
    }

    fn critic_enabled(&self) -> Option<&Critic> {
        self.critic.as_ref().filter(|_| self.settings.enable_critic)
    }

    fn next_task_id(&self) -> String {
        format!("task-{}", self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    fn new_scheduler(&self) -> TaskScheduler {
        let mut scheduler = TaskScheduler::new(self.facts.clone(), self.settings.scheduler_config());
        if let Some(tx) = &self.events {
            scheduler = scheduler.with_events(tx.clone());
        }
        scheduler.register_agent(self.agent.clone());
        scheduler
    }

    fn recent_context(&self) -> String {
        self.context.get_context(Some(self.planning_context))
    }

    /// 把本批结果写入已完成工作与共享上下文，记录步数用尽的任务，返回最后一个成功任务的结果
    fn absorb(&self, done: &[Task], cycle: &mut Cycle) -> Option<String> {
        let mut last_ok = None;
        for task in done {
            if task.hit_step_limit() {
                cycle.step_limited.push(task.description.clone());
            }
            let result = task.result_text();
            match task.status {
                TaskStatus::Completed => {
                    cycle.completed.push(task.description.clone(), result.clone());
                    self.context.add(format!("{} -> {}", task.description, result));
                    last_ok = Some(result);
                }
                _ => {
                    cycle.completed.push(task.description.clone(), format!("failed: {result}"));
                    self.context.add(format!("{} -> failed: {}", task.description, result));
                }
            }
        }
        last_ok
    }

    /// 运行一次完整请求：若干规划周期 + 可选评审
    pub async fn run(&self, query: &str) -> RunOutcome {
        tracing::info!(query = %query, mode = ?self.settings.mode, "run started");
        self.context.add(format!("User query: {query}"));

        let mut request = query.to_string();
        let mut steps = 0;
        let mut cycles = 0;
        let mut critic_rounds = 0;
        let mut step_limited = Vec::new();

        loop {
            cycles += 1;
            let cycle = match self.settings.mode {
                LoopMode::Replan => self.run_replan_cycle(&request).await,
                LoopMode::Dag => self.run_dag_cycle(&request).await,
            };
            steps += cycle.steps;
            step_limited.extend(cycle.step_limited.iter().cloned());
            let answer = cycle.answer();

            let verdict = match self.critic_enabled() {
                Some(critic) if !answer.is_empty() => match critic.run_critic(&answer).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(error = %e, "critic unavailable, answer left unreviewed");
                        None
                    }
                },
                _ => None,
            };

            if let Some(v) = &verdict {
                let (approved, text) = match v {
                    Verdict::Approved => (true, String::new()),
                    Verdict::Critique(text) => (false, text.clone()),
                };
                emit(self.events.as_ref(), LoopEvent::Critique { approved, text });
            }

            if let Some(Verdict::Critique(feedback)) = &verdict {
                if critic_rounds < self.settings.max_critic_rounds {
                    critic_rounds += 1;
                    tracing::info!(round = critic_rounds, feedback = %feedback, "critique received, replanning");
                    self.context.add(format!("Reviewer feedback: {feedback}"));
                    request = format!("{query}\n\nReviewer feedback on the previous answer: {feedback}");
                    continue;
                }
                tracing::warn!(rounds = critic_rounds, "critic round limit reached, returning last answer");
            }

            tracing::info!(termination = %cycle.termination, steps, cycles, "run finished");
            emit(
                self.events.as_ref(),
                LoopEvent::Finished {
                    answer: answer.clone(),
                    termination: cycle.termination.to_string(),
                },
            );
            return RunOutcome {
                answer,
                termination: cycle.termination,
                verdict,
                completed: cycle.completed.items().to_vec(),
                steps,
                cycles,
                step_limited,
            };
        }
    }

    async fn run_replan_cycle(&self, request: &str) -> Cycle {
        let mut plan = match self.planner.initial_plan(request, &self.recent_context()).await {
            Ok(plan) => plan,
            Err(e) => return Cycle::planning_failed(e),
        };
        emit(self.events.as_ref(), LoopEvent::Planned { tasks: plan.clone() });
        if plan.is_empty() {
            tracing::info!("initial plan is empty, nothing to do");
            return Cycle::ended(Termination::PlanExhausted);
        }

        let mut scheduler = self.new_scheduler();
        let mut cycle = Cycle::ended(Termination::Completed);

        loop {
            let budget = self.settings.max_steps.saturating_sub(cycle.steps);
            if budget == 0 {
                tracing::warn!(max_steps = self.settings.max_steps, "step budget exhausted");
                cycle.termination = Termination::BudgetExhausted;
                return cycle;
            }

            let width = self.settings.batch_width.max(1).min(budget).min(plan.len());
            for (i, description) in plan.drain(..width).enumerate() {
                let task = Task::new(self.next_task_id(), description)
                    .with_priority(i as i64)
                    .assigned_to(self.agent.name());
                scheduler.add_task(task);
            }

            let done = scheduler.run_batch().await;
            if done.is_empty() {
                cycle.termination = Termination::Stalled;
                return cycle;
            }
            cycle.steps += done.len();
            if let Some(result) = self.absorb(&done, &mut cycle) {
                cycle.answer = Some(result);
            }
            tokio::time::sleep(scheduler.config().yield_interval).await;

            let outcome = match self
                .planner
                .replan(request, &cycle.completed, &self.recent_context())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "replanning failed");
                    cycle.termination = Termination::PlanningFailed(e.to_string());
                    return cycle;
                }
            };
            match outcome {
                ReplanOutcome::Done => {
                    emit(
                        self.events.as_ref(),
                        LoopEvent::Replanned {
                            remaining: Vec::new(),
                            done: true,
                        },
                    );
                    cycle.termination = Termination::Completed;
                    return cycle;
                }
                ReplanOutcome::Remaining(next) => {
                    emit(
                        self.events.as_ref(),
                        LoopEvent::Replanned {
                            remaining: next.clone(),
                            done: false,
                        },
                    );
                    plan = next;
                }
                ReplanOutcome::Exhausted => {
                    emit(
                        self.events.as_ref(),
                        LoopEvent::Replanned {
                            remaining: Vec::new(),
                            done: false,
                        },
                    );
                    cycle.termination = Termination::PlanExhausted;
                    return cycle;
                }
            }
        }
    }

    async fn run_dag_cycle(&self, request: &str) -> Cycle {
        let tasks = match self.planner.decompose(request, &self.facts, self.agent.name()).await {
            Ok(tasks) => tasks,
            Err(e) => return Cycle::planning_failed(e),
        };
        emit(
            self.events.as_ref(),
            LoopEvent::Planned {
                tasks: tasks.iter().map(|t| t.description.clone()).collect(),
            },
        );
        if tasks.is_empty() {
            return Cycle::ended(Termination::PlanExhausted);
        }

        let mut scheduler = self.new_scheduler();
        for task in tasks {
            scheduler.add_task(task);
        }
        let report = scheduler.run().await;

        let mut cycle = Cycle::ended(Termination::Completed);
        cycle.steps = report.dispatched;
        // 成功任务在前，answer 取最后一个成功结果
        let finished: Vec<Task> = scheduler
            .completed()
            .iter()
            .chain(scheduler.failed())
            .cloned()
            .collect();
        let answer = self.absorb(&finished, &mut cycle);
        cycle.answer = answer;

        cycle.termination = if !report.stalled.is_empty() {
            Termination::Stalled
        } else if report.budget_exhausted {
            Termination::BudgetExhausted
        } else {
            Termination::Completed
        };
        cycle
    }
}
