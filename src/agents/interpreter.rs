//! Interpreter（结果解读）：可先用分析工具补充证据，再把命令输出归纳为 findings
//!
//! 分析阶段产生的命令同样追加到 executed_commands；findings 只追加本轮新结论。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::agents::structured::{invoke_structured, output_schema, parse_structured};
use crate::agents::tool_loop::{drive_tool_phase, ToolPhase};
use crate::agents::{context_message, with_context, AgentNode, EventSink, NodeOutcome};
use crate::core::{now_millis, AgentRole, Finding, PartialState, SessionState};
use crate::llm::LlmClient;
use crate::tools::ToolExecutor;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InterpreterOutput {
    #[serde(default)]
    pub findings: Vec<Finding>,
}

pub struct InterpreterNode {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    max_tool_rounds: usize,
}

impl InterpreterNode {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolExecutor, max_tool_rounds: usize) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds,
        }
    }
}

#[async_trait]
impl AgentNode for InterpreterNode {
    fn role(&self) -> AgentRole {
        AgentRole::Interpreter
    }

    async fn run(&self, state: &SessionState, events: &EventSink) -> NodeOutcome {
        let role = self.role();
        let context = context_message(json!({
            "target": state.target,
            "executed_commands": state.executed_commands,
            "completed_tasks": state.completed_tasks,
            "pending_tasks": state.pending_tasks,
        }));
        let mut history = with_context(state.log(role), &context);
        let mut log = vec![context];

        let phase = if self.tools.is_empty() {
            ToolPhase::default()
        } else {
            drive_tool_phase(
                self.llm.as_ref(),
                role,
                &history,
                &self.tools,
                self.max_tool_rounds,
                events,
            )
            .await
        };

        // 工具阶段的最终回复若已是合法输出，直接采用
        let early = phase
            .final_reply
            .as_ref()
            .and_then(|m| parse_structured::<InterpreterOutput>(&m.content).ok());
        history.extend(phase.transcript.iter().cloned());
        log.extend(phase.transcript);

        let output = match early {
            Some(output) => Some(output),
            None => {
                let schema = output_schema::<InterpreterOutput>("result_interpreter");
                let reply =
                    invoke_structured::<InterpreterOutput>(self.llm.as_ref(), role, &history, &schema, events)
                        .await;
                log.extend(reply.transcript);
                reply.value
            }
        };

        let findings: Vec<Finding> = output
            .map(|o| o.findings)
            .unwrap_or_default()
            .into_iter()
            .filter(|f| !f.summary.trim().is_empty())
            .collect();
        tracing::info!(session = %state.session_id, findings = findings.len(), "interpreter finished");

        NodeOutcome::Update(
            PartialState {
                findings,
                executed_commands: phase.records,
                last_update_ts: Some(now_millis()),
                ..PartialState::default()
            }
            .with_messages(role, log),
        )
    }
}
