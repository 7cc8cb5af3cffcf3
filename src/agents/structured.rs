//! 结构化输出：schema 生成、JSON 提取与解析、带恢复策略的推理调用
//!
//! 解析失败时由 RecoveryEngine 决定：第一次追加格式提醒后重试，第二次降级（返回 None 并发出 Warning）。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::agents::events::{EventSink, GraphEvent};
use crate::core::{AgentError, AgentRole, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmClient, OutputSchema};
use crate::memory::Message;

/// 由类型生成期望输出的 JSON Schema
pub fn output_schema<T: JsonSchema>(name: &str) -> OutputSchema {
    let schema = schemars::schema_for!(T);
    OutputSchema {
        name: name.to_string(),
        schema: serde_json::to_value(schema).unwrap_or(serde_json::Value::Null),
    }
}

/// 从回复中取出 JSON：```json 代码块、首尾花括号之间，或原文
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let json = extract_json(text);
    serde_json::from_str(json).map_err(|e| {
        let preview: String = json.chars().take(200).collect();
        AgentError::SchemaParseError(format!("{e}: {preview}"))
    })
}

/// 一次结构化推理的结果；transcript 为本次产生、应追加到角色日志的消息（AI 回复与格式提醒）
#[derive(Debug)]
pub struct StructuredReply<T> {
    pub value: Option<T>,
    pub transcript: Vec<Message>,
}

/// 在 history 之后发起结构化推理；失败按 RecoveryEngine 重试或降级，不向调用方抛错
pub async fn invoke_structured<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    role: AgentRole,
    history: &[Message],
    schema: &OutputSchema,
    events: &EventSink,
) -> StructuredReply<T> {
    let recovery = RecoveryEngine::new();
    let mut transcript: Vec<Message> = Vec::new();
    let mut attempt = 0usize;

    loop {
        let mut request: Vec<Message> = history.to_vec();
        request.extend(transcript.iter().cloned());

        let err = match llm.complete(role, &request, &[], Some(schema)).await {
            Ok(reply) => {
                let parsed = parse_structured::<T>(&reply.content);
                transcript.push(reply);
                match parsed {
                    Ok(value) => {
                        return StructuredReply {
                            value: Some(value),
                            transcript,
                        }
                    }
                    Err(e) => e,
                }
            }
            Err(e) => AgentError::from(e),
        };

        match recovery.handle(&err, attempt) {
            RecoveryAction::RetryWithPrompt(reminder) => {
                events.emit(GraphEvent::Recovery {
                    node: role,
                    action: "retry_with_prompt".into(),
                    detail: err.to_string(),
                });
                transcript.push(Message::human(reminder));
            }
            RecoveryAction::Retry => {
                events.emit(GraphEvent::Recovery {
                    node: role,
                    action: "retry".into(),
                    detail: err.to_string(),
                });
            }
            RecoveryAction::Degrade(detail) => {
                events.warn(role, format!("{} output degraded: {detail}", schema.name));
                return StructuredReply {
                    value: None,
                    transcript,
                };
            }
            RecoveryAction::Abort => {
                events.warn(role, format!("{} aborted: {err}", schema.name));
                return StructuredReply {
                    value: None,
                    transcript,
                };
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Out {
        answer: u32,
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("Sure: {\"a\":1} done"), "{\"a\":1}");
        assert_eq!(extract_json("```\n{\"a\":2}\n```"), "{\"a\":2}");
        assert_eq!(extract_json("plain"), "plain");
    }

    #[test]
    fn test_schema_has_properties() {
        let schema = output_schema::<Out>("out");
        assert_eq!(schema.name, "out");
        assert!(schema.schema["properties"]["answer"].is_object());
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let mock = MockLlmClient::new();
        mock.push_text(AgentRole::Advisor, "not json")
            .push_text(AgentRole::Advisor, "{\"answer\": 42}");
        let reply: StructuredReply<Out> = invoke_structured(
            &mock,
            AgentRole::Advisor,
            &[Message::system("sys")],
            &output_schema::<Out>("out"),
            &EventSink::none(),
        )
        .await;
        assert_eq!(reply.value, Some(Out { answer: 42 }));
        // 错误回复、格式提醒、正确回复
        assert_eq!(reply.transcript.len(), 3);
        let second = &mock.requests_for(AgentRole::Advisor)[1];
        assert!(second.messages.last().unwrap().content.contains("JSON"));
    }

    #[tokio::test]
    async fn test_two_malformed_replies_degrade() {
        let mock = MockLlmClient::new();
        mock.push_text(AgentRole::Planner, "nope")
            .push_text(AgentRole::Planner, "still nope")
            .push_text(AgentRole::Planner, "{\"answer\": 1}");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reply: StructuredReply<Out> = invoke_structured(
            &mock,
            AgentRole::Planner,
            &[],
            &output_schema::<Out>("out"),
            &EventSink::new(tx),
        )
        .await;
        assert!(reply.value.is_none());
        assert_eq!(mock.remaining(AgentRole::Planner), 1);
        let mut saw_warning = false;
        while let Ok(ev) = rx.try_recv() {
            saw_warning |= matches!(ev, GraphEvent::Warning { .. });
        }
        assert!(saw_warning);
    }
}
