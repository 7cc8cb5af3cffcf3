//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按角色预置回复队列，依次弹出；队列耗尽时返回 `{}`。每次请求都会被记录，便于断言上下文与工具绑定。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentRole;
use crate::llm::{LlmClient, LlmError, OutputSchema};
use crate::memory::Message;
use crate::tools::ToolSpec;

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub role: AgentRole,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub schema: Option<String>,
}

/// 脚本化回复：Ok 为一条 AI 消息，Err 模拟传输失败
type Scripted = Result<Message, String>;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripts: Mutex<HashMap<AgentRole, VecDeque<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条回复
    pub fn push(&self, role: AgentRole, reply: Message) -> &Self {
        self.enqueue(role, Ok(reply));
        self
    }

    /// 追加一条纯文本 AI 回复
    pub fn push_text(&self, role: AgentRole, content: impl Into<String>) -> &Self {
        self.push(role, Message::ai(content))
    }

    /// 追加一次失败
    pub fn push_error(&self, role: AgentRole, error: impl Into<String>) -> &Self {
        self.enqueue(role, Err(error.into()));
        self
    }

    fn enqueue(&self, role: AgentRole, item: Scripted) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(role).or_default().push_back(item);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, role: AgentRole) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.role == role)
            .collect()
    }

    /// 尚未消费的脚本条数
    pub fn remaining(&self, role: AgentRole) -> usize {
        self.scripts
            .lock()
            .map(|s| s.get(&role).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        role: AgentRole,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Result<Message, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                role,
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                schema: schema.map(|s| s.name.clone()),
            });
        }

        let next = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&role).and_then(VecDeque::pop_front));

        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(LlmError::Request(e)),
            None => Ok(Message::ai("{}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_per_role_in_order() {
        let mock = MockLlmClient::new();
        mock.push_text(AgentRole::Planner, "first")
            .push_text(AgentRole::Planner, "second")
            .push_error(AgentRole::Advisor, "down");

        let a = mock.complete(AgentRole::Planner, &[], &[], None).await.unwrap();
        let b = mock.complete(AgentRole::Planner, &[], &[], None).await.unwrap();
        let c = mock.complete(AgentRole::Planner, &[], &[], None).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(c.content, "{}");
        assert!(mock.complete(AgentRole::Advisor, &[], &[], None).await.is_err());
        assert_eq!(mock.requests_for(AgentRole::Planner).len(), 3);
    }
}
