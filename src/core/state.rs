//! 会话状态与 reducer 合并
//!
//! SessionState 是一次会话唯一的共享状态；节点只产出 PartialState，由 `merge` 按字段策略折叠：
//! - replace：pending_tasks、strategies、is_inappropriate、to_loop、last_update_ts
//! - append：completed_tasks、executed_commands、findings、五个角色的消息日志
//! - advance：cycle 只能 +1

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::{Message, MessageLogs};

/// 五个 Agent 角色，同时也是工作流图中的节点标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Executor,
    Interpreter,
    Advisor,
    Gate,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Planner,
        AgentRole::Executor,
        AgentRole::Interpreter,
        AgentRole::Advisor,
        AgentRole::Gate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
            AgentRole::Interpreter => "interpreter",
            AgentRole::Advisor => "advisor",
            AgentRole::Gate => "gate",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "Pending")]
    Pending,
    #[serde(alias = "Completed")]
    Completed,
    #[serde(alias = "Failed")]
    Failed,
}

/// 侦察任务：同一时刻只存在于 pending 或 completed/failed 其中一个集合
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// 会话内唯一
    #[serde(alias = "task_id")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Task {
    pub fn pending(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
        }
    }
}

/// 工具调用结果：正常输出或错误描述
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum CommandOutcome {
    Output(String),
    Error(String),
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Output(_))
    }

    pub fn text(&self) -> &str {
        match self {
            CommandOutcome::Output(s) | CommandOutcome::Error(s) => s,
        }
    }
}

/// 一次工具调用的记录，写入后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub tool: String,
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub outcome: CommandOutcome,
    /// Unix 毫秒
    pub timestamp: i64,
}

impl CommandRecord {
    /// 人类可读的调用形式，如 `port_scanner({"ports":[80]})`
    pub fn input(&self) -> String {
        format!("{}({})", self.tool, self.args)
    }
}

/// 由命令输出推导出的结论
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub summary: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: BTreeMap::new(),
        }
    }
}

/// 下一轮建议：每次 Advisor 运行整体替换
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Strategy {
    pub text: String,
    #[serde(default)]
    pub rationale: String,
}

/// 会话状态：只能通过 `merge` 修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub target: String,
    pub cycle: u64,
    pub pending_tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub executed_commands: Vec<CommandRecord>,
    pub findings: Vec<Finding>,
    pub strategies: Vec<Strategy>,
    pub messages: MessageLogs,
    pub to_loop: bool,
    pub is_inappropriate: bool,
    /// Unix 毫秒
    pub last_update_ts: Option<i64>,
}

impl SessionState {
    /// 空会话（cycle = 0，所有集合为空）
    pub fn new(session_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            target: target.into(),
            cycle: 0,
            pending_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            executed_commands: Vec::new(),
            findings: Vec::new(),
            strategies: Vec::new(),
            messages: MessageLogs::default(),
            to_loop: false,
            is_inappropriate: false,
            last_update_ts: None,
        }
    }

    /// 会话受理：写入各角色 system prompt，并把初始目标作为 Gate 日志中的 Human 消息
    pub fn intake(
        session_id: impl Into<String>,
        target: impl Into<String>,
        objective: &str,
        system_prompts: &BTreeMap<AgentRole, String>,
    ) -> Self {
        let mut update = PartialState::default();
        for (role, prompt) in system_prompts {
            update.messages.push(*role, Message::system(prompt.clone()));
        }
        update.messages.push(AgentRole::Gate, Message::human(objective));
        update.last_update_ts = Some(now_millis());
        Self::new(session_id, target).merge(update)
    }

    /// 指定角色的消息日志
    pub fn log(&self, role: AgentRole) -> &[Message] {
        self.messages.get(role)
    }

    /// 会话内所有已出现的任务 ID
    pub fn task_ids(&self) -> HashSet<&str> {
        self.pending_tasks
            .iter()
            .chain(self.completed_tasks.iter())
            .map(|t| t.id.as_str())
            .collect()
    }

    /// 按字段策略折叠一次节点输出
    pub fn merge(mut self, update: PartialState) -> SessionState {
        let PartialState {
            pending_tasks,
            completed_tasks,
            executed_commands,
            findings,
            strategies,
            messages,
            to_loop,
            is_inappropriate,
            advance_cycle,
            last_update_ts,
        } = update;

        if !completed_tasks.is_empty() {
            let moved: HashSet<&str> = completed_tasks.iter().map(|t| t.id.as_str()).collect();
            self.pending_tasks.retain(|t| !moved.contains(t.id.as_str()));
            self.completed_tasks.extend(completed_tasks);
        }

        if let Some(pending) = pending_tasks {
            let done: HashSet<String> =
                self.completed_tasks.iter().map(|t| t.id.clone()).collect();
            let (kept, dropped): (Vec<Task>, Vec<Task>) =
                pending.into_iter().partition(|t| !done.contains(&t.id));
            if !dropped.is_empty() {
                tracing::warn!(
                    session = %self.session_id,
                    dropped = dropped.len(),
                    "pending tasks reuse ids of finished tasks; dropped"
                );
            }
            self.pending_tasks = kept;
        }

        self.executed_commands.extend(executed_commands);
        self.findings.extend(findings);
        if let Some(strategies) = strategies {
            self.strategies = strategies;
        }
        self.messages.append(messages);
        if let Some(v) = to_loop {
            self.to_loop = v;
        }
        if let Some(v) = is_inappropriate {
            self.is_inappropriate = v;
        }
        if advance_cycle {
            self.cycle += 1;
        }
        if last_update_ts.is_some() {
            self.last_update_ts = last_update_ts;
        }
        self
    }
}

/// 节点输出的部分更新；未设置的字段在合并时保持不变
#[derive(Clone, Debug, Default)]
pub struct PartialState {
    pub pending_tasks: Option<Vec<Task>>,
    pub completed_tasks: Vec<Task>,
    pub executed_commands: Vec<CommandRecord>,
    pub findings: Vec<Finding>,
    pub strategies: Option<Vec<Strategy>>,
    pub messages: MessageLogs,
    pub to_loop: Option<bool>,
    pub is_inappropriate: Option<bool>,
    pub advance_cycle: bool,
    pub last_update_ts: Option<i64>,
}

impl PartialState {
    /// 仅带时间戳的更新（节点降级时使用）
    pub fn touched() -> Self {
        Self {
            last_update_ts: Some(now_millis()),
            ..Self::default()
        }
    }

    pub fn with_messages(mut self, role: AgentRole, messages: Vec<Message>) -> Self {
        self.messages.extend(role, messages);
        self
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tool: &str, ok: bool) -> CommandRecord {
        CommandRecord {
            tool: tool.to_string(),
            args: serde_json::json!({}),
            task_id: None,
            outcome: if ok {
                CommandOutcome::Output("ok".into())
            } else {
                CommandOutcome::Error("boom".into())
            },
            timestamp: 0,
        }
    }

    #[test]
    fn test_empty_update_leaves_state_untouched() {
        let mut state = SessionState::new("s1", "10.0.0.1");
        state.pending_tasks.push(Task::pending("t1", "scan"));
        let merged = state.clone().merge(PartialState::default());
        assert_eq!(merged.pending_tasks, state.pending_tasks);
        assert_eq!(merged.cycle, 0);
        assert_eq!(merged.last_update_ts, None);
    }

    #[test]
    fn test_replace_and_append_policies() {
        let state = SessionState::new("s1", "10.0.0.1").merge(PartialState {
            pending_tasks: Some(vec![Task::pending("t1", "a"), Task::pending("t2", "b")]),
            strategies: Some(vec![Strategy { text: "old".into(), rationale: String::new() }]),
            executed_commands: vec![record("x", true)],
            findings: vec![Finding::new("f1")],
            ..PartialState::default()
        });

        let state = state.merge(PartialState {
            pending_tasks: Some(vec![Task::pending("t3", "c")]),
            strategies: Some(vec![]),
            executed_commands: vec![record("y", false)],
            findings: vec![Finding::new("f2")],
            ..PartialState::default()
        });

        assert_eq!(state.pending_tasks.len(), 1);
        assert_eq!(state.pending_tasks[0].id, "t3");
        assert!(state.strategies.is_empty());
        assert_eq!(state.executed_commands.len(), 2);
        assert_eq!(state.findings.len(), 2);
    }

    #[test]
    fn test_completed_tasks_leave_pending() {
        let state = SessionState::new("s1", "h").merge(PartialState {
            pending_tasks: Some(vec![Task::pending("t1", "a"), Task::pending("t2", "b")]),
            ..PartialState::default()
        });
        let mut done = Task::pending("t1", "a");
        done.status = TaskStatus::Completed;
        let state = state.merge(PartialState {
            completed_tasks: vec![done],
            ..PartialState::default()
        });
        assert_eq!(state.pending_tasks.len(), 1);
        assert_eq!(state.pending_tasks[0].id, "t2");
        assert_eq!(state.completed_tasks[0].id, "t1");

        // 替换 pending 时不得重新引入已完成任务
        let state = state.merge(PartialState {
            pending_tasks: Some(vec![Task::pending("t1", "again"), Task::pending("t4", "d")]),
            ..PartialState::default()
        });
        let ids: Vec<&str> = state.pending_tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t4"]);
    }

    #[test]
    fn test_cycle_advances_by_one() {
        let state = SessionState::new("s1", "h");
        let state = state.merge(PartialState {
            advance_cycle: true,
            ..PartialState::default()
        });
        assert_eq!(state.cycle, 1);
        let state = state.merge(PartialState::touched());
        assert_eq!(state.cycle, 1);
    }

    #[test]
    fn test_intake_seeds_logs() {
        let mut prompts = BTreeMap::new();
        prompts.insert(AgentRole::Planner, "plan".to_string());
        prompts.insert(AgentRole::Executor, "exec".to_string());
        let state = SessionState::intake("s1", "8.8.8.8", "scan it", &prompts);
        assert_eq!(state.log(AgentRole::Planner).len(), 1);
        assert_eq!(state.log(AgentRole::Interpreter).len(), 0);
        let gate = state.log(AgentRole::Gate);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate[0].content, "scan it");
        assert!(state.last_update_ts.is_some());
    }

    #[test]
    fn test_task_accepts_task_id_alias() {
        let task: Task =
            serde_json::from_str(r#"{"task_id":"t9","description":"ping sweep","status":"pending"}"#)
                .unwrap();
        assert_eq!(task.id, "t9");
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
