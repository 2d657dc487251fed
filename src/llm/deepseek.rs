//! DeepSeek 端点（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（默认）, deepseek-reasoner

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// Key 取 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`；都没有时返回 None，由调用方回退到 Mock
pub fn create_deepseek_client(model: Option<&str>) -> Option<OpenAiClient> {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())?;
    let model = model.filter(|m| !m.is_empty()).unwrap_or(DEEPSEEK_CHAT);
    Some(OpenAiClient::new(Some(DEEPSEEK_BASE_URL), model, &api_key))
}
