//! 记忆层：事实库、共享上下文缓冲、agent 历史、已完成工作、长期记忆（追加日志）

pub mod context_buffer;
pub mod conversation;
pub mod facts;
pub mod long_term;
pub mod working;

pub use context_buffer::{ContextEntry, SharedContext, DEFAULT_MAX_ENTRIES};
pub use conversation::{AgentHistory, Message, Role};
pub use facts::FactStore;
pub use long_term::{FileLongTerm, InMemoryLongTerm, LongTermMemory, NoopLongTerm};
pub use working::CompletedWork;
