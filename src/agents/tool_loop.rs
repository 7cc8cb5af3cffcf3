//! 工具调用子循环
//!
//! `run_tool_calls` 顺序执行一批工具调用，单次失败只记录为错误结果，不中断后续调用；
//! `drive_tool_phase` 在每批之后重新询问推理引擎，直到不再提出工具调用或达到轮数上限。

use serde_json::Value;

use crate::agents::events::{preview, EventSink, GraphEvent};
use crate::core::{now_millis, AgentError, AgentRole, CommandOutcome, CommandRecord, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::{Message, ToolCall};
use crate::tools::ToolExecutor;
use crate::workflow::routes::tool_route_for;
use crate::workflow::ToolRoute;

/// 一批工具调用的产物：按调用顺序的命令记录与工具结果消息
#[derive(Debug, Default)]
pub struct ToolBatch {
    pub records: Vec<CommandRecord>,
    pub messages: Vec<Message>,
}

pub async fn run_tool_calls(
    role: AgentRole,
    calls: &[ToolCall],
    tools: &ToolExecutor,
    events: &EventSink,
) -> ToolBatch {
    let mut batch = ToolBatch::default();
    for call in calls {
        events.emit(GraphEvent::ToolCall {
            node: role,
            tool: call.name.clone(),
            args: call.args.clone(),
        });

        let outcome = match tools.execute(&call.name, call.args.clone()).await {
            Ok(output) => CommandOutcome::Output(output),
            Err(AgentError::ToolError(detail)) => CommandOutcome::Error(detail),
            Err(other) => CommandOutcome::Error(other.to_string()),
        };

        events.emit(GraphEvent::Observation {
            node: role,
            tool: call.name.clone(),
            ok: outcome.is_ok(),
            preview: preview(outcome.text(), 200),
        });

        let content = match &outcome {
            CommandOutcome::Output(out) => out.clone(),
            CommandOutcome::Error(err) => format!("Error: {err}"),
        };
        batch.messages.push(Message::tool_result(call.id.clone(), content));
        batch.records.push(CommandRecord {
            tool: call.name.clone(),
            args: strip_task_id(&call.args),
            task_id: call.task_id(),
            outcome,
            timestamp: now_millis(),
        });
    }
    batch
}

/// task_id 单独成字段，不重复出现在 args 中
fn strip_task_id(args: &Value) -> Value {
    match args {
        Value::Object(map) if map.contains_key("task_id") => {
            let mut map = map.clone();
            map.remove("task_id");
            Value::Object(map)
        }
        other => other.clone(),
    }
}

/// 工具阶段的产物；transcript 为应追加到角色日志的消息（AI 回复与工具结果，按时间顺序）
#[derive(Debug, Default)]
pub struct ToolPhase {
    pub records: Vec<CommandRecord>,
    pub transcript: Vec<Message>,
    /// 最后一条不含工具调用的 AI 回复
    pub final_reply: Option<Message>,
}

/// 以 history 为上下文驱动工具阶段，最多执行 max_rounds 批
pub async fn drive_tool_phase(
    llm: &dyn LlmClient,
    role: AgentRole,
    history: &[Message],
    tools: &ToolExecutor,
    max_rounds: usize,
    events: &EventSink,
) -> ToolPhase {
    let specs = tools.specs();
    let recovery = RecoveryEngine::new();
    let mut phase = ToolPhase::default();
    let mut rounds = 0usize;
    let mut attempt = 0usize;

    loop {
        let mut request: Vec<Message> = history.to_vec();
        request.extend(phase.transcript.iter().cloned());

        let reply = match llm.complete(role, &request, &specs, None).await {
            Ok(reply) => reply,
            Err(e) => {
                let err = AgentError::from(e);
                match recovery.handle(&err, attempt) {
                    RecoveryAction::Retry | RecoveryAction::RetryWithPrompt(_) => {
                        events.emit(GraphEvent::Recovery {
                            node: role,
                            action: "retry".into(),
                            detail: err.to_string(),
                        });
                        attempt += 1;
                        continue;
                    }
                    RecoveryAction::Degrade(_) | RecoveryAction::Abort => {
                        events.warn(role, format!("tool phase ended: {err}"));
                        return phase;
                    }
                }
            }
        };
        attempt = 0;
        phase.transcript.push(reply);

        if tool_route_for(&phase.transcript) == ToolRoute::Continue {
            phase.final_reply = phase.transcript.last().cloned();
            return phase;
        }

        let calls = phase
            .transcript
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        if rounds >= max_rounds {
            events.warn(
                role,
                format!("tool round limit ({max_rounds}) reached; {} call(s) skipped", calls.len()),
            );
            // 每个调用仍需一条结果消息，日志才能再次发送给推理引擎
            phase.transcript.extend(
                calls
                    .iter()
                    .map(|c| Message::tool_result(c.id.clone(), "Skipped: tool round limit reached")),
            );
            return phase;
        }

        let batch = run_tool_calls(role, &calls, tools, events).await;
        phase.records.extend(batch.records);
        phase.transcript.extend(batch.messages);
        rounds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct Flaky;

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "fails when asked to"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            if args.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                Err("refused".into())
            } else {
                Ok(format!("ok {}", args["n"]))
            }
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Flaky);
        ToolExecutor::new(registry, 5)
    }

    fn call(id: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "flaky".into(),
            args,
        }
    }

    #[tokio::test]
    async fn test_failure_in_middle_keeps_siblings() {
        let calls = vec![
            call("c1", json!({"n": 1, "task_id": "t1"})),
            call("c2", json!({"n": 2, "fail": true})),
            call("c3", json!({"n": 3})),
        ];
        let batch = run_tool_calls(AgentRole::Executor, &calls, &executor(), &EventSink::none()).await;
        assert_eq!(batch.records.len(), 3);
        assert!(batch.records[0].outcome.is_ok());
        assert_eq!(batch.records[0].task_id.as_deref(), Some("t1"));
        assert!(batch.records[0].args.get("task_id").is_none());
        assert_eq!(batch.records[1].outcome, CommandOutcome::Error("refused".into()));
        assert!(batch.records[2].outcome.is_ok());
        let ids: Vec<_> = batch.messages.iter().map(|m| m.tool_call_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(batch.messages[1].content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recorded_not_fatal() {
        let calls = vec![ToolCall {
            id: "c1".into(),
            name: "nmap".into(),
            args: json!({}),
        }];
        let batch = run_tool_calls(AgentRole::Executor, &calls, &executor(), &EventSink::none()).await;
        assert!(!batch.records[0].outcome.is_ok());
    }

    #[tokio::test]
    async fn test_phase_stops_when_no_more_calls() {
        let mock = MockLlmClient::new();
        mock.push(
            AgentRole::Executor,
            Message::ai_with_tool_calls("", vec![call("c1", json!({"n": 1}))]),
        )
        .push_text(AgentRole::Executor, "done");

        let phase = drive_tool_phase(
            &mock,
            AgentRole::Executor,
            &[Message::system("sys")],
            &executor(),
            5,
            &EventSink::none(),
        )
        .await;
        assert_eq!(phase.records.len(), 1);
        assert_eq!(phase.transcript.len(), 3);
        assert_eq!(phase.final_reply.unwrap().content, "done");
        let second = &mock.requests_for(AgentRole::Executor)[1];
        assert_eq!(second.tool_names, vec!["flaky".to_string()]);
        assert_eq!(second.messages.last().unwrap().content, "ok 1");
    }

    #[tokio::test]
    async fn test_round_limit_ends_phase() {
        let mock = MockLlmClient::new();
        for i in 0..3 {
            mock.push(
                AgentRole::Interpreter,
                Message::ai_with_tool_calls("", vec![call(&format!("c{i}"), json!({"n": i}))]),
            );
        }
        let phase = drive_tool_phase(
            &mock,
            AgentRole::Interpreter,
            &[],
            &executor(),
            2,
            &EventSink::none(),
        )
        .await;
        assert_eq!(phase.records.len(), 2);
        assert!(phase.final_reply.is_none());
        assert_eq!(tool_route_for(&phase.transcript), ToolRoute::Continue);
    }
}
