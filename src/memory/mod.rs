//! 记忆层：按角色划分的只追加消息日志

pub mod conversation;

pub use conversation::{Message, MessageLogs, Role, ToolCall};
