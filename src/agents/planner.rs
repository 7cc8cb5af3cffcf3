//! Planner（对话处理）：把人工目标拆解为新的 pending 任务列表，并判定请求是否不当
//!
//! 上下文 = 自身日志 + Gate 日志中的对话（目标与状态摘要） + 当前进度快照。
//! 从 Gate 的 continue 进入时推进 cycle；每次运行都清空 strategies 并复位 to_loop。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::agents::structured::{invoke_structured, output_schema};
use crate::agents::{context_message, conversation_only, AgentNode, EventSink, NodeOutcome};
use crate::core::{now_millis, AgentRole, PartialState, SessionState, Task, TaskStatus};
use crate::llm::LlmClient;

/// Planner 的结构化输出
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlannerOutput {
    #[serde(default)]
    pub pending_tasks: Vec<Task>,
    #[serde(default)]
    pub is_inappropriate: bool,
}

pub struct PlannerNode {
    llm: Arc<dyn LlmClient>,
}

impl PlannerNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// 状态置为 Pending，ID 在已结束任务与本批之间去重（冲突时追加 -1、-2 …）
pub fn normalize_tasks(tasks: Vec<Task>, state: &SessionState) -> Vec<Task> {
    let mut taken: HashSet<String> = state.completed_tasks.iter().map(|t| t.id.clone()).collect();
    tasks
        .into_iter()
        .enumerate()
        .map(|(i, mut task)| {
            task.status = TaskStatus::Pending;
            task.result = None;
            task.id = task.id.trim().to_string();
            if task.id.is_empty() {
                task.id = format!("t{}", i + 1);
            }
            let base = task.id.clone();
            let mut n = 1;
            while taken.contains(&task.id) {
                task.id = format!("{base}-{n}");
                n += 1;
            }
            taken.insert(task.id.clone());
            task
        })
        .collect()
}

#[async_trait]
impl AgentNode for PlannerNode {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    async fn run(&self, state: &SessionState, events: &EventSink) -> NodeOutcome {
        let role = self.role();
        let context = context_message(json!({
            "target": state.target,
            "cycle": state.cycle + u64::from(state.to_loop),
            "completed_tasks": state.completed_tasks,
            "findings": state.findings,
        }));

        let mut history = state.log(role).to_vec();
        history.extend(conversation_only(state.log(AgentRole::Gate)).cloned());
        history.push(context.clone());

        let schema = output_schema::<PlannerOutput>("conversational_handler");
        let reply = invoke_structured::<PlannerOutput>(self.llm.as_ref(), role, &history, &schema, events).await;

        let mut log = vec![context];
        log.extend(reply.transcript);

        let mut update = PartialState {
            strategies: Some(Vec::new()),
            to_loop: Some(false),
            advance_cycle: state.to_loop,
            last_update_ts: Some(now_millis()),
            ..PartialState::default()
        }
        .with_messages(role, log);

        if let Some(output) = reply.value {
            let tasks = normalize_tasks(output.pending_tasks, state);
            tracing::info!(
                session = %state.session_id,
                tasks = tasks.len(),
                inappropriate = output.is_inappropriate,
                "planner produced tasks"
            );
            update.pending_tasks = Some(tasks);
            update.is_inappropriate = Some(output.is_inappropriate);
        }
        NodeOutcome::Update(update)
    }
}
