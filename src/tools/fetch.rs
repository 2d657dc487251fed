//! 网页读取能力：open_url
//!
//! GET 请求带超时与 User-Agent，HTML 响应经 html2text 转为可读文本；
//! 可选域名白名单（为空表示不限制），结果超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

#[derive(Deserialize, JsonSchema)]
pub struct OpenUrlArgs {
    /// 以 http:// 或 https:// 开头的完整地址
    pub url: String,
}

pub struct OpenUrlTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head")
}

/// host 部分（去掉端口与路径），不是 http(s) 地址时返回 None
fn extract_domain(url: &str) -> Option<String> {
    let rest = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() > max {
        text.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

impl OpenUrlTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars: max_result_chars.max(1),
        }
    }

    /// 白名单为空时放行；子域名视为同一域
    fn check_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| format!("Invalid URL: {url}"))?;
        if self.allowed_domains.is_empty()
            || self
                .allowed_domains
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {domain}"))
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        self.check_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            html2text::from_read(body.as_bytes(), 120).map_err(|e| format!("HTML to text: {e}"))?
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for OpenUrlTool {
    fn name(&self) -> &str {
        "open_url"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable plain text."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<OpenUrlArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: OpenUrlArgs = parse_args(args)?;
        tracing::info!(url = %args.url, "open_url fetch");
        self.fetch(args.url.trim()).await.map(Value::String)
    }
}
