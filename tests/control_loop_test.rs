//! 主控循环集成测试：规划 / 批量执行 / 重规划 / 评审 / DAG 调度
//!
//! 所有 LLM 调用都由 ScriptedLlmClient 按顺序应答，不访问网络。

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskloop::config::{AppConfig, LoopMode, OrchestratorSection};
use taskloop::core::{
    AgentError, Orchestrator, OrchestratorBuilder, SchedulerConfig, Task, TaskAgent, TaskScheduler,
    TaskStatus, Termination,
};
use taskloop::llm::{MockLlmClient, ScriptedLlmClient};
use taskloop::memory::{FactStore, SharedContext};
use taskloop::react::{Critic, ExecutionAgent, LoopEvent, Planner, Verdict};
use taskloop::tools::{CalculatorTool, ToolExecutor, ToolRegistry};

fn fast_settings() -> OrchestratorSection {
    OrchestratorSection {
        yield_ms: 0,
        idle_ms: 1,
        max_idle_polls: 2,
        ..OrchestratorSection::default()
    }
}

fn fast_scheduler(batch_width: usize) -> SchedulerConfig {
    SchedulerConfig {
        batch_width,
        yield_interval: Duration::ZERO,
        idle_interval: Duration::from_millis(1),
        max_idle_polls: 2,
        max_steps: 20,
    }
}

/// 结果为 `result <描述>` 的 agent
struct EchoAgent;

#[async_trait]
impl TaskAgent for EchoAgent {
    fn name(&self) -> &str {
        "executor"
    }

    async fn execute(&self, task: &Task, _facts: &FactStore) -> Result<Value, AgentError> {
        Ok(json!({ "final_thought": format!("result {}", task.description) }))
    }
}

/// 记录开始 / 结束顺序与最大并发数；描述为 "a" 的任务最慢
#[derive(Default)]
struct TimedAgent {
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl TimedAgent {
    fn position(&self, entry: &str) -> usize {
        let log = self.log.lock().unwrap();
        log.iter().position(|e| e == entry).unwrap()
    }
}

#[async_trait]
impl TaskAgent for TimedAgent {
    fn name(&self) -> &str {
        "executor"
    }

    async fn execute(&self, task: &Task, _facts: &FactStore) -> Result<Value, AgentError> {
        self.log.lock().unwrap().push(format!("start:{}", task.description));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = if task.description == "a" { 40 } else { 5 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("end:{}", task.description));
        Ok(json!({ "final_thought": format!("result {}", task.description) }))
    }
}

fn orchestrator_with(planner: Arc<ScriptedLlmClient>, agent: Arc<dyn TaskAgent>) -> Orchestrator {
    Orchestrator::new(Planner::new(planner), agent, SharedContext::new(50), FactStore::new())
        .with_settings(fast_settings())
}

#[tokio::test]
async fn test_two_plus_two_end_to_end() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. Compute 2 + 2", "Nothing."]));
    let executor_llm = Arc::new(ScriptedLlmClient::new([
        "Thought: I should compute this\nAction: calculate_expression\nAction Input: {\"expression\": \"2 + 2\"}",
        "Thought: The answer is 4\nAction: FINISH",
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool);
    let agent = ExecutionAgent::new("executor", executor_llm.clone(), Arc::new(ToolExecutor::new(registry, 5)));

    let orch = orchestrator_with(planner, Arc::new(agent));
    let out = orch.run("What is 2 + 2?").await;

    assert_eq!(out.termination, Termination::Completed);
    assert!(out.answer.contains('4'));
    assert_eq!(out.steps, 1);
    assert_eq!(out.cycles, 1);
    assert_eq!(executor_llm.call_count(), 2);
    // 对象结果逐项写入事实库
    assert_eq!(
        orch.facts().get_fact("task-1_final_thought"),
        Some(json!("The answer is 4"))
    );
}

#[tokio::test]
async fn test_batch_of_two_then_third() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. a\n2. b\n3. c", "1. c", "Nothing."]));
    let agent = Arc::new(TimedAgent::default());
    let orch = orchestrator_with(planner, agent.clone());

    let out = orch.run("three independent tasks").await;

    assert_eq!(out.termination, Termination::Completed);
    assert_eq!(agent.peak.load(Ordering::SeqCst), 2);
    // b 先结束，但结果仍按计划顺序汇总
    assert!(agent.position("end:b") < agent.position("end:a"));
    let order: Vec<&str> = out.completed.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    // c 在下一批，a 与 b 都结束后才开始
    assert!(agent.position("start:c") > agent.position("end:a"));
    assert!(agent.position("start:c") > agent.position("end:b"));
    assert_eq!(out.answer, "result c");
}

#[tokio::test]
async fn test_done_sentinel_stops_without_more_work() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. only task", "Nothing.", "1. must not run"]));
    let orch = orchestrator_with(planner.clone(), Arc::new(EchoAgent));

    let out = orch.run("q").await;

    assert_eq!(out.termination, Termination::Completed);
    assert_eq!(out.steps, 1);
    assert_eq!(planner.remaining(), 1);
}

#[tokio::test]
async fn test_sentinel_is_case_sensitive() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. first", "nothing", "Nothing."]));
    let orch = orchestrator_with(planner, Arc::new(EchoAgent));

    let out = orch.run("q").await;

    // "nothing" 被当作一条剩余任务执行
    assert_eq!(out.steps, 2);
    assert_eq!(out.completed[1].0, "nothing");
}

#[tokio::test]
async fn test_critique_triggers_exactly_one_more_cycle() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. draft", "Nothing.", "1. revise", "Nothing."]));
    let critic_llm = Arc::new(ScriptedLlmClient::new(["The answer lacks units.", "  approved "]));
    let orch = orchestrator_with(planner.clone(), Arc::new(EchoAgent)).with_critic(Critic::new(critic_llm.clone()));

    let out = orch.run("How far is it?").await;

    assert_eq!(out.cycles, 2);
    assert_eq!(out.verdict, Some(Verdict::Approved));
    assert_eq!(out.answer, "result revise");
    assert_eq!(planner.call_count(), 4);
    assert_eq!(critic_llm.call_count(), 2);

    let second_plan = &planner.prompts()[2];
    assert!(second_plan[1]
        .content
        .contains("Reviewer feedback on the previous answer: The answer lacks units."));
    assert!(orch
        .context()
        .get_context(None)
        .contains("Reviewer feedback: The answer lacks units."));
}

#[tokio::test]
async fn test_approval_short_circuits() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. draft", "Nothing."]));
    let critic_llm = Arc::new(ScriptedLlmClient::new(["APPROVED"]));
    let orch = orchestrator_with(planner.clone(), Arc::new(EchoAgent)).with_critic(Critic::new(critic_llm));

    let out = orch.run("q").await;

    assert_eq!(out.cycles, 1);
    assert!(out.is_approved());
    assert_eq!(planner.remaining(), 0);
}

#[tokio::test]
async fn test_critic_round_cap() {
    let planner = Arc::new(ScriptedLlmClient::new([
        "1. try", "Nothing.", "1. try again", "Nothing.", "1. last try", "Nothing.",
    ]));
    let critic_llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_fallback("Still wrong."));
    let settings = OrchestratorSection {
        max_critic_rounds: 2,
        ..fast_settings()
    };
    let orch = Orchestrator::new(Planner::new(planner), Arc::new(EchoAgent), SharedContext::new(50), FactStore::new())
        .with_settings(settings)
        .with_critic(Critic::new(critic_llm.clone()));

    let out = orch.run("q").await;

    // 首轮 + 两次重跑
    assert_eq!(out.cycles, 3);
    assert_eq!(out.answer, "result last try");
    assert_eq!(critic_llm.call_count(), 3);
    assert_eq!(out.verdict, Some(Verdict::Critique("Still wrong.".to_string())));
}

#[tokio::test]
async fn test_failed_action_becomes_observation() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. fly to the moon", "Nothing."]));
    let executor_llm = Arc::new(ScriptedLlmClient::new([
        "Thought: try flying\nAction: fly\nAction Input: {\"to\": \"moon\"}",
        "Thought: I cannot fly, the answer is 42\nAction: FINISH",
    ]));
    let agent = ExecutionAgent::new(
        "executor",
        executor_llm.clone(),
        Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)),
    );
    let orch = orchestrator_with(planner, Arc::new(agent));

    let out = orch.run("q").await;

    assert_eq!(out.termination, Termination::Completed);
    assert_eq!(out.answer, "I cannot fly, the answer is 42");
    let second = executor_llm.prompts()[1].clone();
    let last = second.last().unwrap();
    assert!(last.content.starts_with("Observation: Error:"));
    assert!(last.content.contains("fly"));
}

#[tokio::test]
async fn test_step_limit_is_reported() {
    let planner = Arc::new(ScriptedLlmClient::new(["1. loop forever", "Nothing."]));
    let executor_llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_fallback(
        "Thought: keep going\nAction: calculate_expression\nAction Input: {\"expression\": \"1 + 1\"}",
    ));
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = ExecutionAgent::new("executor", executor_llm.clone(), Arc::new(ToolExecutor::new(registry, 5)))
        .with_max_steps(2)
        .with_events(tx);
    let orch = orchestrator_with(planner, Arc::new(agent));

    let out = orch.run("q").await;

    assert_eq!(executor_llm.call_count(), 2);
    assert_eq!(out.step_limited, vec!["loop forever".to_string()]);
    drop(orch);
    let mut limited = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LoopEvent::StepLimitReached { task_id, max_steps } = event {
            limited.push((task_id, max_steps));
        }
    }
    assert_eq!(limited, vec![("task-1".to_string(), 2)]);
}

/// 执行时检查所有依赖都已结束，违反时记录
struct DependencyCheckingAgent {
    finished: Mutex<HashSet<String>>,
    violations: Mutex<Vec<String>>,
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskAgent for DependencyCheckingAgent {
    fn name(&self) -> &str {
        "executor"
    }

    async fn execute(&self, task: &Task, _facts: &FactStore) -> Result<Value, AgentError> {
        {
            let finished = self.finished.lock().unwrap();
            for dep in &task.dependencies {
                if !finished.contains(dep) {
                    self.violations.lock().unwrap().push(format!("{} before {}", task.id, dep));
                }
            }
        }
        self.order.lock().unwrap().push(task.id.clone());
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.finished.lock().unwrap().insert(task.id.clone());
        Ok(json!(format!("ok {}", task.id)))
    }
}

#[tokio::test]
async fn test_dependencies_complete_before_dispatch() {
    let agent = Arc::new(DependencyCheckingAgent {
        finished: Mutex::new(HashSet::new()),
        violations: Mutex::new(Vec::new()),
        order: Mutex::new(Vec::new()),
    });
    let mut scheduler = TaskScheduler::new(FactStore::new(), fast_scheduler(2));
    scheduler.register_agent(agent.clone());

    // 优先级与依赖方向相反
    scheduler.add_task(Task::new("c", "third").with_priority(0).with_dependency("b").assigned_to("executor"));
    scheduler.add_task(Task::new("b", "second").with_priority(1).with_dependency("a").assigned_to("executor"));
    scheduler.add_task(Task::new("a", "first").with_priority(2).assigned_to("executor"));
    scheduler.add_task(Task::new("x", "free").with_priority(3).assigned_to("executor"));

    let report = scheduler.run().await;

    assert!(agent.violations.lock().unwrap().is_empty());
    assert_eq!(report.dispatched, 4);
    assert!(report.stalled.is_empty());
    let order = agent.order.lock().unwrap().clone();
    let pos = |id: &str| order.iter().position(|t| t == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("b") < pos("c"));
    assert!(scheduler.completed().iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn test_dag_mode_runs_task_graph() {
    let decomposition = r#"```json
{"subtasks": [
  {"id": "sum", "description": "add the numbers", "priority": 2, "dependencies": ["fetch"]},
  {"id": "fetch", "description": "collect the numbers", "priority": 1, "dependencies": []}
]}
```"#;
    let planner = Arc::new(ScriptedLlmClient::new([decomposition]));
    let settings = OrchestratorSection {
        mode: LoopMode::Dag,
        ..fast_settings()
    };
    let orch = Orchestrator::new(Planner::new(planner), Arc::new(EchoAgent), SharedContext::new(50), FactStore::new())
        .with_settings(settings);

    let out = orch.run("sum some numbers").await;

    assert_eq!(out.termination, Termination::Completed);
    assert_eq!(out.steps, 2);
    assert_eq!(out.answer, "result add the numbers");
    assert_eq!(out.completed[0].0, "collect the numbers");
}

#[tokio::test]
async fn test_dag_mode_reports_stall() {
    let cyclic = r#"{"subtasks": [
  {"id": "a", "description": "needs b", "dependencies": ["b"]},
  {"id": "b", "description": "needs a", "dependencies": ["a"]}
]}"#;
    let planner = Arc::new(ScriptedLlmClient::new([cyclic]));
    let settings = OrchestratorSection {
        mode: LoopMode::Dag,
        ..fast_settings()
    };
    let orch = Orchestrator::new(Planner::new(planner), Arc::new(EchoAgent), SharedContext::new(50), FactStore::new())
        .with_settings(settings);

    let out = orch.run("impossible").await;

    assert_eq!(out.termination, Termination::Stalled);
    assert_eq!(out.steps, 0);
    assert!(out.completed.iter().all(|(_, r)| r.starts_with("failed: stalled")));
}

#[tokio::test]
async fn test_builder_pipeline_emits_events() {
    let mut cfg = AppConfig::default();
    cfg.orchestrator.yield_ms = 0;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let orch = OrchestratorBuilder::new(cfg)
        .with_llm(Arc::new(MockLlmClient))
        .with_events(tx)
        .build();

    let out = orch.run("say hello").await;
    drop(orch);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(out.is_approved());
    assert!(matches!(events.first(), Some(LoopEvent::Planned { .. })));
    assert!(matches!(events.last(), Some(LoopEvent::Finished { termination, .. }) if termination == "completed"));
    assert!(events
        .iter()
        .any(|e| matches!(e, LoopEvent::Replanned { done: true, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, LoopEvent::Critique { approved: true, .. })));
}
