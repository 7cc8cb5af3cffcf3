//! 错误恢复引擎
//!
//! 根据 AgentError 类型与尝试次数返回 RecoveryAction，供节点决定是重试、降级还是终止。
//! 结构化输出格式错误只重试一次（带格式提醒），第二次失败即降级。

use crate::core::{AgentError, RecoveryAction};

/// 每次推理调用允许的重试次数
pub const MAX_RETRIES: usize = 1;

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 重试 / 降级 / 终止）
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempt 从 0 开始计数；超过 MAX_RETRIES 后一律降级
    pub fn handle(&self, err: &AgentError, attempt: usize) -> RecoveryAction {
        match err {
            AgentError::SchemaParseError(raw) if attempt < MAX_RETRIES => {
                RecoveryAction::RetryWithPrompt(format_reminder(raw))
            }
            AgentError::LlmError(_) if attempt < MAX_RETRIES => RecoveryAction::Retry,
            AgentError::SchemaParseError(_) | AgentError::LlmError(_) => {
                RecoveryAction::Degrade(err.to_string())
            }
            AgentError::ToolError(detail) => RecoveryAction::Degrade(detail.clone()),
            AgentError::RoutingError { .. }
            | AgentError::ConfigError(_)
            | AgentError::Checkpoint(_) => RecoveryAction::Abort,
        }
    }
}

fn format_reminder(raw: &str) -> String {
    let preview: String = raw.chars().take(300).collect();
    format!(
        "Your previous reply could not be parsed ({preview}). \
         Reply with exactly one JSON object that matches the required schema. \
         Do not add Markdown, code fences or any other text."
    )
}
