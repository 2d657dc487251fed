//! 长期记忆：上下文条目的持久化镜像与检索
//!
//! 支持 add(text) 与 search(query, k)；InMemoryLongTerm 为进程内实现，
//! FileLongTerm 追加写入文本日志（每条一个 `## 时间戳` 块），启动时重新加载，按关键词重叠打分检索。

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// 长期记忆 trait：追加写入与相似度检索
pub trait LongTermMemory: Send + Sync {
    /// 追加一段文本
    fn add(&self, text: &str);

    /// 按查询检索最相关的 k 条
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未配置持久化时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermMemory for NoopLongTerm {
    fn add(&self, _text: &str) {}

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}

type Indexed = Vec<(String, HashSet<String>)>;

/// 将文本切分为小写词集合（去掉首尾标点，过滤单字符）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 1)
        .collect()
}

fn push_bounded(store: &mut Indexed, text: &str, max_entries: usize) {
    store.push((text.to_string(), tokenize_lower(text)));
    let n = store.len();
    if n > max_entries {
        store.drain(0..n - max_entries);
    }
}

/// 词重叠 / sqrt(文档词数)，越大越相关；新条目在同分时优先
fn rank(store: &Indexed, query: &str, k: usize) -> Vec<String> {
    let query_tokens = tokenize_lower(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(f64, usize, &String)> = store
        .iter()
        .enumerate()
        .filter_map(|(idx, (text, doc_tokens))| {
            let overlap = query_tokens.intersection(doc_tokens).count();
            if overlap == 0 {
                return None;
            }
            let score = overlap as f64 / (doc_tokens.len().max(1) as f64).sqrt();
            Some((score, idx, text))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.cmp(&a.1))
    });
    scored.into_iter().take(k).map(|(_, _, t)| t.clone()).collect()
}

/// 进程内实现
#[derive(Clone)]
pub struct InMemoryLongTerm {
    store: Arc<RwLock<Indexed>>,
    max_entries: usize,
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries: max_entries.max(1),
        }
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl LongTermMemory for InMemoryLongTerm {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        push_bounded(&mut store, text, self.max_entries);
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        rank(&store, query, k)
    }
}

/// 追加式文本日志：写入只追加，不改写已有内容
#[derive(Clone)]
pub struct FileLongTerm {
    path: PathBuf,
    store: Arc<RwLock<Indexed>>,
    max_entries: usize,
}

/// 按 `## ` 块头切分日志文件；块头行（时间戳）不计入正文
fn split_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        if line.starts_with("## ") {
            if in_block {
                let text = current.join("\n").trim().to_string();
                if !text.is_empty() {
                    blocks.push(text);
                }
            }
            current.clear();
            in_block = true;
        } else if in_block {
            current.push(line);
        }
    }
    if in_block {
        let text = current.join("\n").trim().to_string();
        if !text.is_empty() {
            blocks.push(text);
        }
    }
    blocks
}

impl FileLongTerm {
    /// 打开（或创建）日志文件，并加载已有条目
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut indexed = Vec::new();
        let max_entries = max_entries.max(1);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            for block in split_blocks(&content) {
                push_bounded(&mut indexed, &block, max_entries);
            }
        }
        Ok(Self {
            path,
            store: Arc::new(RwLock::new(indexed)),
            max_entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_to_disk(&self, text: &str) -> std::io::Result<()> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let block = format!("## {}\n{}\n\n", timestamp, text);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(block.as_bytes())
    }
}

impl LongTermMemory for FileLongTerm {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        {
            let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
            push_bounded(&mut store, text, self.max_entries);
        }
        if let Err(e) = self.append_to_disk(text) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append to memory log");
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        rank(&store, query, k)
    }
}
