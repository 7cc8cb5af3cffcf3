//! 角色消息日志
//!
//! 每个 Agent 角色一条只追加的日志；Message 是带标签的变体 {Role, Content, ToolCalls}。
//! 任何原始载荷（字符串、字典、带角色的对象、OpenAI 回复）都经 `Message::normalize` 转换后才进入日志。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentRole;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

/// 推理引擎提出的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    /// 参数中的 task_id（字符串或数字）
    pub fn task_id(&self) -> Option<String> {
        match self.args.get("task_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool 消息对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Ai, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// 是否为携带待执行工具调用的 AI 消息
    pub fn has_pending_tool_calls(&self) -> bool {
        self.role == Role::Ai && !self.tool_calls.is_empty()
    }

    /// 归一化边界：把任意原始载荷转换为 Message
    pub fn normalize(raw: Value) -> Message {
        match raw {
            Value::String(s) => Message::human(s),
            Value::Object(ref map) => {
                let role = map
                    .get("role")
                    .or_else(|| map.get("type"))
                    .and_then(Value::as_str)
                    .and_then(parse_role);
                let Some(role) = role else {
                    return Message::human(raw.to_string());
                };
                let content = match map.get("content") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                let tool_calls = map
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .map(|calls| {
                        calls
                            .iter()
                            .enumerate()
                            .filter_map(|(i, c)| normalize_tool_call(c, i))
                            .collect()
                    })
                    .unwrap_or_default();
                let tool_call_id = map
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .map(String::from);
                Message {
                    role,
                    content,
                    tool_calls,
                    tool_call_id,
                }
            }
            other => Message::human(other.to_string()),
        }
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s.to_ascii_lowercase().as_str() {
        "system" => Some(Role::System),
        "human" | "user" => Some(Role::Human),
        "ai" | "assistant" => Some(Role::Ai),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

/// 兼容扁平 {name, args, id} 与 OpenAI {id, function: {name, arguments}} 两种形态
fn normalize_tool_call(raw: &Value, index: usize) -> Option<ToolCall> {
    let function = raw.get("function").unwrap_or(raw);
    let name = function.get("name").and_then(Value::as_str)?.to_string();
    let args = match function.get("args").or_else(|| function.get("arguments")) {
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(v) => v.clone(),
        None => Value::Object(Default::default()),
    };
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("call_{index}"));
    Some(ToolCall { id, name, args })
}

/// 五条角色日志，只追加
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageLogs {
    #[serde(default)]
    pub planner: Vec<Message>,
    #[serde(default)]
    pub executor: Vec<Message>,
    #[serde(default)]
    pub interpreter: Vec<Message>,
    #[serde(default)]
    pub advisor: Vec<Message>,
    #[serde(default)]
    pub gate: Vec<Message>,
}

impl MessageLogs {
    pub fn get(&self, role: AgentRole) -> &[Message] {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Executor => &self.executor,
            AgentRole::Interpreter => &self.interpreter,
            AgentRole::Advisor => &self.advisor,
            AgentRole::Gate => &self.gate,
        }
    }

    fn get_mut(&mut self, role: AgentRole) -> &mut Vec<Message> {
        match role {
            AgentRole::Planner => &mut self.planner,
            AgentRole::Executor => &mut self.executor,
            AgentRole::Interpreter => &mut self.interpreter,
            AgentRole::Advisor => &mut self.advisor,
            AgentRole::Gate => &mut self.gate,
        }
    }

    pub fn push(&mut self, role: AgentRole, message: Message) {
        self.get_mut(role).push(message);
    }

    pub fn extend(&mut self, role: AgentRole, messages: impl IntoIterator<Item = Message>) {
        self.get_mut(role).extend(messages);
    }

    /// 按角色把另一组日志追加到末尾（reducer 的 append 策略）
    pub fn append(&mut self, other: MessageLogs) {
        let MessageLogs {
            planner,
            executor,
            interpreter,
            advisor,
            gate,
        } = other;
        self.planner.extend(planner);
        self.executor.extend(executor);
        self.interpreter.extend(interpreter);
        self.advisor.extend(advisor);
        self.gate.extend(gate);
    }

    pub fn total_len(&self) -> usize {
        AgentRole::ALL.iter().map(|r| self.get(*r).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_plain_string_is_human() {
        let msg = Message::normalize(json!("scan 10.0.0.1"));
        assert_eq!(msg.role, Role::Human);
        assert_eq!(msg.content, "scan 10.0.0.1");
    }

    #[test]
    fn test_normalize_openai_assistant_reply() {
        let raw = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": {"name": "port_scanner", "arguments": "{\"target_ip\":\"8.8.8.8\",\"ports\":[80]}"}
            }]
        });
        let msg = Message::normalize(raw);
        assert_eq!(msg.role, Role::Ai);
        assert!(msg.content.is_empty());
        assert!(msg.has_pending_tool_calls());
        assert_eq!(msg.tool_calls[0].id, "call_abc");
        assert_eq!(msg.tool_calls[0].args["ports"], json!([80]));
    }

    #[test]
    fn test_normalize_untyped_dict_becomes_json_human_message() {
        let msg = Message::normalize(json!({"task_id": "t1", "description": "ping sweep"}));
        assert_eq!(msg.role, Role::Human);
        let back: Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(back["task_id"], "t1");
    }

    #[test]
    fn test_normalize_flat_tool_call_without_id() {
        let msg = Message::normalize(json!({
            "type": "ai",
            "content": "scanning",
            "tool_calls": [{"name": "lookup_cve", "args": {"cve_id": "CVE-2021-44228", "task_id": 7}}]
        }));
        assert_eq!(msg.tool_calls[0].id, "call_0");
        assert_eq!(msg.tool_calls[0].task_id().as_deref(), Some("7"));
    }

    #[test]
    fn test_logs_append_per_role() {
        let mut logs = MessageLogs::default();
        logs.push(AgentRole::Gate, Message::human("a"));
        let mut more = MessageLogs::default();
        more.push(AgentRole::Gate, Message::ai("b"));
        more.push(AgentRole::Planner, Message::ai("c"));
        logs.append(more);
        let gate: Vec<&str> = logs.get(AgentRole::Gate).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(gate, vec!["a", "b"]);
        assert_eq!(logs.total_len(), 3);
    }
}
