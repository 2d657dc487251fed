//! 运行过程事件：规划、任务调度、能力调用、重规划、评审
//!
//! 通过可选的 mpsc 通道推送，可序列化为 JSON 供上层展示或记录。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单个过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 初始计划
    Planned { tasks: Vec<String> },
    TaskStarted { task_id: String, description: String },
    ToolCall {
        task_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 能力返回（预览，避免过长）
    Observation {
        task_id: String,
        tool: String,
        preview: String,
    },
    TaskFinished {
        task_id: String,
        ok: bool,
        preview: String,
    },
    /// 重规划结果；done 表示收到结束标记
    Replanned { remaining: Vec<String>, done: bool },
    /// 评审意见（approved=false 时会触发新一轮规划）
    Critique { approved: bool, text: String },
    /// 调度停滞：这些任务的依赖无法满足
    Stalled { task_ids: Vec<String> },
    /// ReAct 步数用尽仍未 FINISH
    StepLimitReached { task_id: String, max_steps: usize },
    Finished { answer: String, termination: String },
}

/// 预览最大字符数
pub const PREVIEW_CHARS: usize = 200;

pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 通道可选；接收端关闭时静默丢弃
pub fn emit(tx: Option<&UnboundedSender<LoopEvent>>, event: LoopEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
