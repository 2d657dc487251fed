//! 任务调度：优先级队列 + 依赖检查 + 批量并发分发
//!
//! get_next_task 按优先级升序（数值小者优先）扫描队列，跳过依赖未全部 Completed 的任务；
//! 一个任务只有在全部依赖都已完成时才会进入 InProgress。
//! run_batch 一次取出至多 batch_width 个就绪任务并发执行，结果按取出顺序返回；
//! run 反复分发直到队列为空，连续空转 max_idle_polls 次后把剩余任务标记为停滞。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::core::AgentError;
use crate::memory::FactStore;
use crate::react::events::{emit, preview, LoopEvent};

/// 可执行任务的 agent
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// 注册名（Task::assigned_agent 引用它）
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task, facts: &FactStore) -> Result<Value, AgentError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 单批并发任务数
    pub batch_width: usize,
    /// 两次分发之间的让出间隔
    pub yield_interval: Duration,
    /// 无就绪任务时的等待间隔
    pub idle_interval: Duration,
    /// 连续空转多少次判定为停滞
    pub max_idle_polls: usize,
    /// run() 的最大分发数
    pub max_steps: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_width: 2,
            yield_interval: Duration::from_millis(100),
            idle_interval: Duration::from_millis(1000),
            max_idle_polls: 3,
            max_steps: 20,
        }
    }
}

/// run() 的汇总
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dispatched: usize,
    /// 因依赖无法满足而被标记为失败的任务
    pub stalled: Vec<TaskId>,
    pub budget_exhausted: bool,
}

enum Resolution {
    Ready(Task, Arc<dyn TaskAgent>),
    Rejected(Task),
}

fn fail(mut task: Task, reason: impl Into<String>) -> Task {
    task.status = TaskStatus::Failed;
    task.result = Some(Value::String(reason.into()));
    task
}

/// 单任务分发：InProgress -> agent.execute -> Completed / Failed；对象结果逐项写入事实库
async fn dispatch(
    agent: Arc<dyn TaskAgent>,
    mut task: Task,
    facts: FactStore,
    events: Option<UnboundedSender<LoopEvent>>,
) -> Task {
    task.status = TaskStatus::InProgress;
    tracing::info!(task = %task.id, agent = %agent.name(), description = %task.description, "task dispatched");
    emit(
        events.as_ref(),
        LoopEvent::TaskStarted {
            task_id: task.id.clone(),
            description: task.description.clone(),
        },
    );

    match agent.execute(&task, &facts).await {
        Ok(value) => {
            if let Value::Object(map) = &value {
                for (key, v) in map {
                    facts.add_fact(format!("{}_{}", task.id, key), v.clone());
                }
            }
            task.status = TaskStatus::Completed;
            task.result = Some(value);
            tracing::info!(task = %task.id, "task completed");
        }
        Err(e) => {
            tracing::warn!(task = %task.id, error = %e, "task failed");
            task = fail(task, e.to_string());
        }
    }

    emit(
        events.as_ref(),
        LoopEvent::TaskFinished {
            task_id: task.id.clone(),
            ok: task.status == TaskStatus::Completed,
            preview: preview(&task.result_text()),
        },
    );
    task
}

pub struct TaskScheduler {
    queue: VecDeque<Task>,
    completed: Vec<Task>,
    failed: Vec<Task>,
    agents: HashMap<String, Arc<dyn TaskAgent>>,
    facts: FactStore,
    config: SchedulerConfig,
    events: Option<UnboundedSender<LoopEvent>>,
}

impl TaskScheduler {
    pub fn new(facts: FactStore, config: SchedulerConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            agents: HashMap::new(),
            facts,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn register_agent(&mut self, agent: Arc<dyn TaskAgent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn add_task(&mut self, task: Task) {
        tracing::debug!(task = %task.id, priority = task.priority, "task queued");
        self.queue.push_back(task);
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    pub fn failed(&self) -> &[Task] {
        &self.failed
    }

    fn completed_ids(&self) -> HashSet<&str> {
        self.completed.iter().map(|t| t.id.as_str()).collect()
    }

    /// 尚未 Completed 的依赖（有序）
    pub fn unmet_dependencies(&self, task: &Task) -> Vec<TaskId> {
        let done = self.completed_ids();
        task.dependencies
            .iter()
            .filter(|d| !done.contains(d.as_str()))
            .cloned()
            .collect()
    }

    /// 取出优先级最高的就绪任务；全部未就绪时返回 None（队列保持不变）
    pub fn get_next_task(&mut self) -> Option<Task> {
        self.queue
            .make_contiguous()
            .sort_by_key(|t| t.priority);
        for _ in 0..self.queue.len() {
            let task = self.queue.pop_front()?;
            if self.unmet_dependencies(&task).is_empty() {
                return Some(task);
            }
            self.queue.push_back(task);
        }
        None
    }

    fn resolve(&self, task: Task) -> Resolution {
        let Some(name) = task.assigned_agent.clone() else {
            return Resolution::Rejected(fail(task, "No agent assigned to task"));
        };
        match self.agents.get(&name) {
            Some(agent) => Resolution::Ready(task, agent.clone()),
            None => Resolution::Rejected(fail(task, format!("Agent {name} not found"))),
        }
    }

    fn record(&mut self, task: Task) {
        match task.status {
            TaskStatus::Completed => self.completed.push(task),
            _ => self.failed.push(task),
        }
    }

    /// 执行单个任务；依赖未满足时放回队列并返回 DependenciesUnmet
    pub async fn execute_task(&mut self, task: Task) -> Result<Task, AgentError> {
        let missing = self.unmet_dependencies(&task);
        if !missing.is_empty() {
            let task_id = task.id.clone();
            self.queue.push_back(task);
            return Err(AgentError::DependenciesUnmet { task_id, missing });
        }
        let done = match self.resolve(task) {
            Resolution::Ready(task, agent) => {
                dispatch(agent, task, self.facts.clone(), self.events.clone()).await
            }
            Resolution::Rejected(task) => {
                tracing::warn!(task = %task.id, reason = %task.result_text(), "task rejected");
                task
            }
        };
        self.record(done.clone());
        Ok(done)
    }

    async fn run_ready(&mut self, limit: usize) -> Vec<Task> {
        let mut batch = Vec::new();
        while batch.len() < limit {
            match self.get_next_task() {
                Some(task) => batch.push(self.resolve(task)),
                None => break,
            }
        }
        if batch.is_empty() {
            return Vec::new();
        }

        let futures = batch.into_iter().map(|resolution| {
            let facts = self.facts.clone();
            let events = self.events.clone();
            async move {
                match resolution {
                    Resolution::Ready(task, agent) => dispatch(agent, task, facts, events).await,
                    Resolution::Rejected(task) => task,
                }
            }
        });
        // join_all 按输入顺序返回，与完成先后无关
        let done = join_all(futures).await;
        for task in &done {
            self.record(task.clone());
        }
        done
    }

    /// 并发执行一批（至多 batch_width 个）就绪任务；无就绪任务时返回空
    pub async fn run_batch(&mut self) -> Vec<Task> {
        self.run_ready(self.config.batch_width.max(1)).await
    }

    /// 把队列中剩余任务全部标记为停滞失败
    fn stall_remaining(&mut self) -> Vec<TaskId> {
        let remaining: Vec<Task> = self.queue.drain(..).collect();
        let mut ids = Vec::with_capacity(remaining.len());
        for task in remaining {
            let missing = self.unmet_dependencies(&task);
            ids.push(task.id.clone());
            let task = fail(task, format!("stalled: unmet dependencies [{}]", missing.join(", ")));
            self.failed.push(task);
        }
        tracing::warn!(tasks = ?ids, "scheduler stalled, remaining tasks can never become ready");
        emit(
            self.events.as_ref(),
            LoopEvent::Stalled {
                task_ids: ids.clone(),
            },
        );
        ids
    }

    /// 分发直到队列为空、停滞或达到 max_steps
    pub async fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();
        let mut idle_polls = 0;

        while !self.queue.is_empty() {
            let budget = self.config.max_steps.saturating_sub(report.dispatched);
            if budget == 0 {
                tracing::warn!(max_steps = self.config.max_steps, pending = self.queue.len(), "scheduler step budget exhausted");
                report.budget_exhausted = true;
                break;
            }

            let done = self
                .run_ready(self.config.batch_width.max(1).min(budget))
                .await;
            if done.is_empty() {
                idle_polls += 1;
                if idle_polls >= self.config.max_idle_polls.max(1) {
                    report.stalled = self.stall_remaining();
                    break;
                }
                tokio::time::sleep(self.config.idle_interval).await;
                continue;
            }

            idle_polls = 0;
            report.dispatched += done.len();
            tokio::time::sleep(self.config.yield_interval).await;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 记录执行顺序，并在执行时检查依赖是否都已完成
    struct Recorder {
        order: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl TaskAgent for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, task: &Task, facts: &FactStore) -> Result<Value, AgentError> {
            assert_eq!(task.status, TaskStatus::InProgress);
            for dep in &task.dependencies {
                assert!(facts.get_fact(&format!("{dep}_answer")).is_some(), "dependency {dep} not completed");
            }
            self.order.lock().unwrap().push(task.id.clone());
            if self.fail_on.as_deref() == Some(task.id.as_str()) {
                return Err(AgentError::ToolExecutionFailed("boom".into()));
            }
            Ok(json!({"answer": format!("done {}", task.id)}))
        }
    }

    fn recorder(fail_on: Option<&str>) -> Arc<Recorder> {
        Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            fail_on: fail_on.map(String::from),
        })
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            batch_width: 1,
            yield_interval: Duration::from_millis(1),
            idle_interval: Duration::from_millis(1),
            max_idle_polls: 2,
            max_steps: 50,
        }
    }

    #[test]
    fn test_get_next_task_respects_priority_and_dependencies() {
        let mut s = TaskScheduler::new(FactStore::new(), fast_config());
        s.add_task(Task::new("b", "second").with_priority(2));
        s.add_task(Task::new("c", "blocked").with_priority(0).with_dependency("a"));
        s.add_task(Task::new("a", "first").with_priority(1));

        assert_eq!(s.get_next_task().unwrap().id, "a");
        assert_eq!(s.get_next_task().unwrap().id, "b");
        assert!(s.get_next_task().is_none());
        assert_eq!(s.pending(), 1);
    }

    #[tokio::test]
    async fn test_run_follows_dependencies_and_writes_facts() {
        let agent = recorder(None);
        let facts = FactStore::new();
        let mut s = TaskScheduler::new(facts.clone(), fast_config());
        s.register_agent(agent.clone());
        s.add_task(Task::new("summary", "sum").with_priority(0).with_dependencies(["x", "y"]).assigned_to("recorder"));
        s.add_task(Task::new("y", "y").with_priority(2).assigned_to("recorder"));
        s.add_task(Task::new("x", "x").with_priority(1).assigned_to("recorder"));

        let report = s.run().await;
        assert_eq!(report.dispatched, 3);
        assert!(report.stalled.is_empty());
        assert_eq!(*agent.order.lock().unwrap(), vec!["x", "y", "summary"]);
        assert_eq!(facts.get_fact("summary_answer"), Some(json!("done summary")));
        assert_eq!(s.completed().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_agent_and_errors_fail_task() {
        let mut s = TaskScheduler::new(FactStore::new(), fast_config());
        s.register_agent(recorder(Some("bad")));

        let t = s.execute_task(Task::new("u", "unassigned")).await.unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.result_text(), "No agent assigned to task");

        let t = s.execute_task(Task::new("g", "ghost").assigned_to("ghost")).await.unwrap();
        assert_eq!(t.result_text(), "Agent ghost not found");

        let t = s.execute_task(Task::new("bad", "explodes").assigned_to("recorder")).await.unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert!(t.result_text().contains("boom"));
        assert_eq!(s.failed().len(), 3);
    }

    #[tokio::test]
    async fn test_execute_task_refuses_unmet_dependencies() {
        let agent = recorder(None);
        let mut s = TaskScheduler::new(FactStore::new(), fast_config());
        s.register_agent(agent.clone());
        let err = s
            .execute_task(Task::new("late", "x").with_dependency("early").assigned_to("recorder"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DependenciesUnmet { ref missing, .. } if missing == &vec!["early".to_string()]));
        assert!(agent.order.lock().unwrap().is_empty());
        assert_eq!(s.pending(), 1);
    }

    #[tokio::test]
    async fn test_stall_diagnostic_for_unreachable_dependencies() {
        let mut s = TaskScheduler::new(FactStore::new(), fast_config());
        s.register_agent(recorder(Some("root")));
        s.add_task(Task::new("root", "fails").assigned_to("recorder"));
        s.add_task(Task::new("child", "needs root").with_dependency("root").assigned_to("recorder"));
        s.add_task(Task::new("cycle_a", "a").with_dependency("cycle_b").assigned_to("recorder"));
        s.add_task(Task::new("cycle_b", "b").with_dependency("cycle_a").assigned_to("recorder"));

        let report = s.run().await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.stalled.len(), 3);
        assert_eq!(s.pending(), 0);
        let child = s.failed().iter().find(|t| t.id == "child").unwrap();
        assert_eq!(child.result_text(), "stalled: unmet dependencies [root]");
    }

    #[tokio::test]
    async fn test_run_respects_step_budget() {
        let mut cfg = fast_config();
        cfg.max_steps = 2;
        let mut s = TaskScheduler::new(FactStore::new(), cfg);
        s.register_agent(recorder(None));
        for i in 0..4 {
            s.add_task(Task::new(format!("t{i}"), "x").with_priority(i).assigned_to("recorder"));
        }
        let report = s.run().await;
        assert!(report.budget_exhausted);
        assert_eq!(report.dispatched, 2);
        assert_eq!(s.pending(), 2);
    }

    struct Concurrency {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskAgent for Concurrency {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, task: &Task, _facts: &FactStore) -> Result<Value, AgentError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // 先取出的任务睡得更久，验证结果顺序与完成顺序无关
            let delay = if task.id == "t0" { 40 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(task.id))
        }
    }

    #[tokio::test]
    async fn test_run_batch_is_concurrent_and_ordered() {
        let agent = Arc::new(Concurrency {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut cfg = fast_config();
        cfg.batch_width = 2;
        let mut s = TaskScheduler::new(FactStore::new(), cfg);
        s.register_agent(agent.clone());
        for i in 0..3 {
            s.add_task(Task::new(format!("t{i}"), "x").with_priority(i).assigned_to("slow"));
        }

        let first: Vec<String> = s.run_batch().await.into_iter().map(|t| t.id).collect();
        assert_eq!(first, vec!["t0", "t1"]);
        assert_eq!(agent.peak.load(Ordering::SeqCst), 2);

        let second: Vec<String> = s.run_batch().await.into_iter().map(|t| t.id).collect();
        assert_eq!(second, vec!["t2"]);
        assert!(s.run_batch().await.is_empty());
    }
}
