//! Advisor（策略建议）：基于 findings 与已执行命令给出至多 max_strategies 条下一轮策略，整体替换旧列表

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::agents::structured::{invoke_structured, output_schema};
use crate::agents::{context_message, with_context, AgentNode, EventSink, NodeOutcome};
use crate::core::{now_millis, AgentRole, PartialState, SessionState, Strategy};
use crate::llm::LlmClient;

/// 推理引擎可以只给一句话，也可以给出带理由的对象
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StrategyEntry {
    Text(String),
    Detailed(Strategy),
}

impl From<StrategyEntry> for Strategy {
    fn from(entry: StrategyEntry) -> Self {
        match entry {
            StrategyEntry::Text(text) => Strategy {
                text,
                rationale: String::new(),
            },
            StrategyEntry::Detailed(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AdvisorOutput {
    #[serde(default)]
    pub strategies: Vec<StrategyEntry>,
}

pub struct AdvisorNode {
    llm: Arc<dyn LlmClient>,
    max_strategies: usize,
}

impl AdvisorNode {
    pub fn new(llm: Arc<dyn LlmClient>, max_strategies: usize) -> Self {
        Self { llm, max_strategies }
    }
}

#[async_trait]
impl AgentNode for AdvisorNode {
    fn role(&self) -> AgentRole {
        AgentRole::Advisor
    }

    async fn run(&self, state: &SessionState, events: &EventSink) -> NodeOutcome {
        let role = self.role();
        let context = context_message(json!({
            "target": state.target,
            "findings": state.findings,
            "executed_commands": state.executed_commands,
            "completed_tasks": state.completed_tasks,
            "pending_tasks": state.pending_tasks,
            "max_strategies": self.max_strategies,
        }));
        let history = with_context(state.log(role), &context);

        let schema = output_schema::<AdvisorOutput>("strategy_advisor");
        let reply = invoke_structured::<AdvisorOutput>(self.llm.as_ref(), role, &history, &schema, events).await;

        let mut log = vec![context];
        log.extend(reply.transcript);

        let mut update = PartialState {
            last_update_ts: Some(now_millis()),
            ..PartialState::default()
        }
        .with_messages(role, log);

        if let Some(output) = reply.value {
            let strategies: Vec<Strategy> = output
                .strategies
                .into_iter()
                .map(Strategy::from)
                .filter(|s| !s.text.trim().is_empty())
                .take(self.max_strategies)
                .collect();
            tracing::info!(session = %state.session_id, strategies = strategies.len(), "advisor finished");
            update.strategies = Some(strategies);
        }
        NodeOutcome::Update(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_mixed_entries_truncated_to_limit() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text(
            AgentRole::Advisor,
            r#"{"strategies":["Enumerate HTTP on 80",{"text":"Grab banner","rationale":"identify server"},"Check TLS","Fuzz paths"]}"#,
        );
        let node = AdvisorNode::new(mock, 3);
        let mut state = SessionState::new("s", "h");
        state.strategies = vec![Strategy {
            text: "stale".into(),
            rationale: String::new(),
        }];
        let NodeOutcome::Update(update) = node.run(&state, &EventSink::none()).await else {
            panic!("advisor must not suspend");
        };
        let next = state.merge(update);
        assert_eq!(next.strategies.len(), 3);
        assert_eq!(next.strategies[0].text, "Enumerate HTTP on 80");
        assert_eq!(next.strategies[1].rationale, "identify server");
    }

    #[tokio::test]
    async fn test_degraded_advisor_leaves_strategies() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(AgentRole::Advisor, "503").push_error(AgentRole::Advisor, "503");
        let node = AdvisorNode::new(mock, 3);
        let NodeOutcome::Update(update) = node.run(&SessionState::new("s", "h"), &EventSink::none()).await else {
            panic!("advisor must not suspend");
        };
        assert!(update.strategies.is_none());
        assert_eq!(update.messages.advisor.len(), 1);
    }
}
