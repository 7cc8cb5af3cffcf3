//! 推理引擎抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：按角色传入消息日志、可用工具与可选输出 schema，
//! 返回一条 AI 消息（可能携带工具调用）。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::{AgentError, AgentRole};
use crate::memory::Message;
use crate::tools::ToolSpec;

/// 期望的结构化输出（JSON Schema）
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

/// 推理引擎调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response contained no message")]
    EmptyResponse,
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::LlmError(e.to_string())
    }
}

/// 推理引擎 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 单次完成；`tools` 为空表示本轮不允许工具调用
    async fn complete(
        &self,
        role: AgentRole,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Result<Message, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
