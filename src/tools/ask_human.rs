//! 人工输入能力：ask_human
//!
//! 向操作者提问并阻塞等待一行回答；输入来源抽象为 HumanInput，默认实现读 stdin。

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 操作者交互边界
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn ask(&self, question: &str) -> Result<String, String>;
}

/// 终端实现：打印问题到 stdout，读取 stdin 一行
#[derive(Debug, Default)]
pub struct StdinHumanInput;

#[async_trait]
impl HumanInput for StdinHumanInput {
    async fn ask(&self, question: &str) -> Result<String, String> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            write!(stdout, "\n{question}\nInput: ").map_err(|e| e.to_string())?;
            stdout.flush().map_err(|e| e.to_string())?;
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| e.to_string())?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| format!("input task failed: {e}"))?
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct AskHumanArgs {
    /// 需要操作者回答的问题
    pub question: String,
}

pub struct AskHumanTool {
    input: Arc<dyn HumanInput>,
}

impl AskHumanTool {
    pub fn new(input: Arc<dyn HumanInput>) -> Self {
        Self { input }
    }

    pub fn stdin() -> Self {
        Self::new(Arc::new(StdinHumanInput))
    }
}

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the human operator a question and wait for the answer."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<AskHumanArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: AskHumanArgs = parse_args(args)?;
        self.input.ask(&args.question).await.map(Value::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HumanInput for Canned {
        async fn ask(&self, question: &str) -> Result<String, String> {
            self.asked.lock().unwrap().push(question.to_string());
            Ok("blue".to_string())
        }
    }

    #[tokio::test]
    async fn test_ask_human_routes_to_input() {
        let canned = Arc::new(Canned {
            asked: Mutex::new(Vec::new()),
        });
        let tool = AskHumanTool::new(canned.clone());
        let out = tool
            .execute(json!({"question": "Favourite colour?"}))
            .await
            .unwrap();
        assert_eq!(out, json!("blue"));
        assert_eq!(canned.asked.lock().unwrap().as_slice(), ["Favourite colour?"]);
    }
}
