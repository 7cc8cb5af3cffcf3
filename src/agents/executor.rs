//! Executor（侦察执行）：针对 pending 任务让推理引擎提出工具调用，执行后按 task_id 结算任务
//!
//! 某任务只要有一次成功结果即 Completed（result = 输出）；全部失败则 Failed（result = 错误）；
//! 没有 task_id 的调用只记录命令，不影响任务。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::tool_loop::drive_tool_phase;
use crate::agents::{context_message, with_context, AgentNode, EventSink, NodeOutcome};
use crate::core::{
    now_millis, AgentRole, CommandOutcome, CommandRecord, PartialState, SessionState, Task, TaskStatus,
};
use crate::llm::LlmClient;
use crate::tools::ToolExecutor;

pub struct ExecutorNode {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    max_tool_rounds: usize,
}

impl ExecutorNode {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolExecutor, max_tool_rounds: usize) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds,
        }
    }
}

/// 根据本轮命令记录结算 pending 任务，返回移入 completed 集合的任务
pub fn settle_tasks(pending: &[Task], records: &[CommandRecord]) -> Vec<Task> {
    let mut by_task: HashMap<&str, Vec<&CommandOutcome>> = HashMap::new();
    for record in records {
        if let Some(id) = record.task_id.as_deref() {
            by_task.entry(id).or_default().push(&record.outcome);
        }
    }

    pending
        .iter()
        .filter_map(|task| {
            let outcomes = by_task.get(task.id.as_str())?;
            let mut settled = task.clone();
            match outcomes.iter().rev().find(|o| o.is_ok()) {
                Some(ok) => {
                    settled.status = TaskStatus::Completed;
                    settled.result = Some(ok.text().to_string());
                }
                None => {
                    settled.status = TaskStatus::Failed;
                    settled.result = outcomes.last().map(|o| o.text().to_string());
                }
            }
            Some(settled)
        })
        .collect()
}

#[async_trait]
impl AgentNode for ExecutorNode {
    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }

    async fn run(&self, state: &SessionState, events: &EventSink) -> NodeOutcome {
        let role = self.role();
        if state.pending_tasks.is_empty() {
            tracing::info!(session = %state.session_id, "no pending tasks; executor skipped");
            return NodeOutcome::Update(PartialState::touched());
        }

        let context = context_message(json!({
            "target": state.target,
            "pending_tasks": state.pending_tasks,
        }));
        let history = with_context(state.log(role), &context);

        let phase = drive_tool_phase(
            self.llm.as_ref(),
            role,
            &history,
            &self.tools,
            self.max_tool_rounds,
            events,
        )
        .await;

        let settled = settle_tasks(&state.pending_tasks, &phase.records);
        tracing::info!(
            session = %state.session_id,
            commands = phase.records.len(),
            settled = settled.len(),
            "executor finished"
        );

        let mut log = vec![context];
        log.extend(phase.transcript);

        NodeOutcome::Update(
            PartialState {
                completed_tasks: settled,
                executed_commands: phase.records,
                last_update_ts: Some(now_millis()),
                ..PartialState::default()
            }
            .with_messages(role, log),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::{Message, ToolCall};
    use crate::tools::{Tool, ToolRegistry};
    use serde_json::Value;

    fn record(task: Option<&str>, outcome: CommandOutcome) -> CommandRecord {
        CommandRecord {
            tool: "port_scanner".into(),
            args: json!({}),
            task_id: task.map(String::from),
            outcome,
            timestamp: 0,
        }
    }

    #[test]
    fn test_settle_success_failure_and_untouched() {
        let pending = vec![
            Task::pending("t1", "a"),
            Task::pending("t2", "b"),
            Task::pending("t3", "c"),
        ];
        let records = vec![
            record(Some("t1"), CommandOutcome::Error("timeout".into())),
            record(Some("t1"), CommandOutcome::Output("[80]".into())),
            record(Some("t2"), CommandOutcome::Error("refused".into())),
            record(None, CommandOutcome::Output("stray".into())),
            record(Some("t42"), CommandOutcome::Output("unknown task".into())),
        ];
        let settled = settle_tasks(&pending, &records);
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].status, TaskStatus::Completed);
        assert_eq!(settled[0].result.as_deref(), Some("[80]"));
        assert_eq!(settled[1].status, TaskStatus::Failed);
        assert_eq!(settled[1].result.as_deref(), Some("refused"));
    }

    struct Ports;

    #[async_trait]
    impl Tool for Ports {
        fn name(&self) -> &str {
            "port_scanner"
        }
        fn description(&self) -> &str {
            "stub"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("[80]".into())
        }
    }

    #[tokio::test]
    async fn test_no_pending_tasks_means_no_engine_call() {
        let mock = Arc::new(MockLlmClient::new());
        let node = ExecutorNode::new(mock.clone(), ToolExecutor::empty(), 5);
        let outcome = node.run(&SessionState::new("s", "h"), &EventSink::none()).await;
        assert!(matches!(outcome, NodeOutcome::Update(u) if u.executed_commands.is_empty()));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_runs_tools_and_completes_task() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push(
            AgentRole::Executor,
            Message::ai_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "c1".into(),
                    name: "port_scanner".into(),
                    args: json!({"target_ip": "8.8.8.8", "ports": [80, 443], "task_id": "t1"}),
                }],
            ),
        )
        .push_text(AgentRole::Executor, "scan complete");

        let mut registry = ToolRegistry::new();
        registry.register(Ports);
        let node = ExecutorNode::new(mock, ToolExecutor::new(registry, 5), 5);

        let mut state = SessionState::new("s", "8.8.8.8");
        state.pending_tasks = vec![Task::pending("t1", "check reachability")];
        let NodeOutcome::Update(update) = node.run(&state, &EventSink::none()).await else {
            panic!("executor must not suspend");
        };
        let next = state.merge(update);
        assert!(next.pending_tasks.is_empty());
        assert_eq!(next.completed_tasks[0].status, TaskStatus::Completed);
        assert_eq!(next.executed_commands.len(), 1);
        // context, AI(tool call), tool result, AI
        assert_eq!(next.log(AgentRole::Executor).len(), 4);
    }
}
