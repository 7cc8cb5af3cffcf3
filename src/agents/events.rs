//! 工作流过程事件：节点开始 / 结束、工具调用与观察、恢复动作、路由、挂起与结束
//!
//! 通过可选的 mpsc 通道推送给 CLI 等前端；没有订阅者时发送是空操作。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::AgentRole;

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    NodeStarted {
        session_id: String,
        node: AgentRole,
        cycle: u64,
    },
    NodeFinished {
        session_id: String,
        node: AgentRole,
    },
    /// 即将执行的工具调用
    ToolCall {
        node: AgentRole,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        node: AgentRole,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 错误恢复动作（RetryWithPrompt / Retry）
    Recovery {
        node: AgentRole,
        action: String,
        detail: String,
    },
    /// 节点降级或工具阶段被截断
    Warning { node: AgentRole, text: String },
    Routed {
        from: AgentRole,
        label: String,
        to: String,
    },
    Suspended { session_id: String, prompt: String },
    Finished { session_id: String, cycle: u64 },
}

/// 事件出口
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<GraphEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<GraphEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 丢弃所有事件
    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: GraphEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn warn(&self, node: AgentRole, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(node = %node, "{}", text);
        self.emit(GraphEvent::Warning { node, text });
    }
}

/// 截断为预览文本
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
