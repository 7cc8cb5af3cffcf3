//! Agent 节点：五个角色（Planner / Executor / Interpreter / Advisor / Gate）
//!
//! 每个节点是 `SessionState -> PartialState` 的函数，可调用推理引擎与工具子循环；
//! 只有 Gate 会挂起（返回 NodeOutcome::Suspend），其余节点失败时降级而不向调度器抛错。

pub mod advisor;
pub mod events;
pub mod executor;
pub mod gate;
pub mod interpreter;
pub mod planner;
pub mod structured;
pub mod summary;
pub mod tool_loop;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AgentRole, PartialState, SessionState};
use crate::memory::{Message, Role};

pub use advisor::{AdvisorNode, AdvisorOutput, StrategyEntry};
pub use events::{EventSink, GraphEvent};
pub use executor::ExecutorNode;
pub use gate::GateNode;
pub use interpreter::{InterpreterNode, InterpreterOutput};
pub use planner::{PlannerNode, PlannerOutput};
pub use summary::render_summary;
pub use tool_loop::{drive_tool_phase, run_tool_calls, ToolBatch, ToolPhase};

/// 节点一次运行的结果
#[derive(Debug)]
pub enum NodeOutcome {
    Update(PartialState),
    /// 先合并 update，再以 prompt 挂起等待人工回复
    Suspend { prompt: String, update: PartialState },
}

#[async_trait]
pub trait AgentNode: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn run(&self, state: &SessionState, events: &EventSink) -> NodeOutcome;

    /// 挂起后的续行逻辑；只有会挂起的节点需要实现
    async fn resume(&self, _state: &SessionState, _reply: &str, _events: &EventSink) -> PartialState {
        PartialState::default()
    }
}

/// 把状态快照包装成上下文消息（经归一化边界，成为 JSON 内容的 Human 消息）
pub(crate) fn context_message(snapshot: Value) -> Message {
    Message::normalize(snapshot)
}

/// 角色日志 + 本轮上下文
pub(crate) fn with_context(log: &[Message], context: &Message) -> Vec<Message> {
    let mut history = log.to_vec();
    history.push(context.clone());
    history
}

/// 去掉 System 消息，用于把别的角色的日志拼进上下文
pub(crate) fn conversation_only(log: &[Message]) -> impl Iterator<Item = &Message> {
    log.iter().filter(|m| m.role != Role::System)
}
