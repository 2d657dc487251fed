//! taskloop 命令行入口
//!
//! 初始化日志、加载配置、装配编排器，运行一次请求并输出答案与评审标注。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use taskloop::config::{load_config, LoopMode};
use taskloop::core::OrchestratorBuilder;
use taskloop::react::LoopEvent;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Replan,
    Dag,
}

#[derive(Debug, Parser)]
#[command(name = "taskloop")]
#[command(about = "Plan, execute, replan and critique a natural-language request", version)]
struct Args {
    /// 每个规划周期的最大任务分发数
    #[arg(long, env = "TASKLOOP_BUDGET")]
    budget: Option<usize>,

    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 覆盖 [orchestrator] mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// 把过程事件以 JSON 行写到 stderr
    #[arg(long)]
    events: bool,

    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskloop::observability::init();

    let args = Args::parse();
    let query = args.query.join(" ");

    let mut config = load_config(args.config.as_deref()).context("Failed to load config")?;
    if let Some(budget) = args.budget {
        config.orchestrator.max_steps = budget;
    }
    if let Some(mode) = args.mode {
        config.orchestrator.mode = match mode {
            Mode::Replan => LoopMode::Replan,
            Mode::Dag => LoopMode::Dag,
        };
    }

    let mut builder = OrchestratorBuilder::new(config);
    let printer = if args.events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<LoopEvent>();
        builder = builder.with_events(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        }))
    } else {
        None
    };

    let orchestrator = builder.build();
    drop(builder);
    let outcome = orchestrator.run(&query).await;
    // 发送端全部释放后打印任务才会退出
    drop(orchestrator);
    if let Some(handle) = printer {
        handle.await.context("event printer failed")?;
    }

    println!("{}", outcome.answer);
    if let Some(verdict) = &outcome.verdict {
        println!("[{}]", verdict.annotation());
    }
    if outcome.termination.as_str() != "completed" {
        eprintln!("terminated: {}", outcome.termination);
    }
    Ok(())
}
