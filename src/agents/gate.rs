//! Gate（人工审核）：生成状态摘要并挂起；恢复时把回复原样记为 Human 消息并决定是否继续

use async_trait::async_trait;

use crate::agents::summary::render_summary;
use crate::agents::{AgentNode, EventSink, NodeOutcome};
use crate::core::{now_millis, AgentRole, PartialState, SessionState};
use crate::memory::Message;

pub const DEFAULT_STOP_WORDS: &[&str] = &["stop", "quit", "exit", "done", "end"];

pub struct GateNode {
    stop_words: Vec<String>,
}

impl GateNode {
    pub fn new<S: AsRef<str>>(stop_words: &[S]) -> Self {
        Self {
            stop_words: stop_words
                .iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// 空回复或命中停止词（去空白、忽略大小写）即结束
    pub fn wants_stop(&self, reply: &str) -> bool {
        let normalized = reply.trim().to_lowercase();
        normalized.is_empty() || self.stop_words.iter().any(|w| *w == normalized)
    }
}

impl Default for GateNode {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_WORDS)
    }
}

#[async_trait]
impl AgentNode for GateNode {
    fn role(&self) -> AgentRole {
        AgentRole::Gate
    }

    async fn run(&self, state: &SessionState, _events: &EventSink) -> NodeOutcome {
        let summary = render_summary(state);
        let update = PartialState {
            last_update_ts: Some(now_millis()),
            ..PartialState::default()
        }
        .with_messages(AgentRole::Gate, vec![Message::ai(summary.clone())]);
        NodeOutcome::Suspend {
            prompt: summary,
            update,
        }
    }

    async fn resume(&self, state: &SessionState, reply: &str, _events: &EventSink) -> PartialState {
        let to_loop = !self.wants_stop(reply);
        tracing::info!(session = %state.session_id, to_loop, "gate resumed");
        PartialState {
            to_loop: Some(to_loop),
            last_update_ts: Some(now_millis()),
            ..PartialState::default()
        }
        .with_messages(AgentRole::Gate, vec![Message::human(reply)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    #[test]
    fn test_stop_words() {
        let gate = GateNode::default();
        assert!(gate.wants_stop("  STOP "));
        assert!(gate.wants_stop(""));
        assert!(!gate.wants_stop("continue scanning port 80"));
        assert!(!gate.wants_stop("don't stop"));
    }

    #[tokio::test]
    async fn test_suspend_then_resume_appends_reply_verbatim() {
        let gate = GateNode::default();
        let state = SessionState::new("s", "h");
        let NodeOutcome::Suspend { prompt, update } = gate.run(&state, &EventSink::none()).await else {
            panic!("gate must suspend");
        };
        assert!(prompt.contains("AdaptiveFuzz Status"));
        let state = state.merge(update);
        assert_eq!(state.log(AgentRole::Gate)[0].role, Role::Ai);

        let reply = " continue scanning port 80 ";
        let update = gate.resume(&state, reply, &EventSink::none()).await;
        let state = state.merge(update);
        assert!(state.to_loop);
        assert_eq!(state.cycle, 0);
        let last = state.log(AgentRole::Gate).last().unwrap();
        assert_eq!(last.role, Role::Human);
        assert_eq!(last.content, reply);
    }
}
