//! 路由谓词：无副作用，相同状态总是得到相同标签

use crate::core::{AgentRole, SessionState};
use crate::memory::Message;
use crate::workflow::types::{GateRoute, PlannerRoute, ToolRoute};

pub fn route_from_gate(state: &SessionState) -> GateRoute {
    if state.to_loop {
        GateRoute::Continue
    } else {
        GateRoute::Stop
    }
}

pub fn route_from_planner(state: &SessionState) -> PlannerRoute {
    if state.is_inappropriate {
        PlannerRoute::Review
    } else {
        PlannerRoute::Proceed
    }
}

pub fn route_tool_call(state: &SessionState, role: AgentRole) -> ToolRoute {
    tool_route_for(state.log(role))
}

/// 按日志最后一条消息判断：节点内工具阶段直接对进行中的日志调用
pub fn tool_route_for(log: &[Message]) -> ToolRoute {
    match log.last() {
        Some(m) if m.has_pending_tool_calls() => ToolRoute::Tools,
        _ => ToolRoute::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PartialState;
    use crate::memory::ToolCall;

    #[test]
    fn test_gate_and_planner_routes_are_pure() {
        let mut state = SessionState::new("s", "h");
        for _ in 0..3 {
            assert_eq!(route_from_gate(&state), GateRoute::Stop);
            assert_eq!(route_from_planner(&state), PlannerRoute::Proceed);
        }
        state.to_loop = true;
        state.is_inappropriate = true;
        let snapshot = serde_json::to_string(&state).unwrap();
        for _ in 0..3 {
            assert_eq!(route_from_gate(&state), GateRoute::Continue);
            assert_eq!(route_from_planner(&state), PlannerRoute::Review);
        }
        assert_eq!(serde_json::to_string(&state).unwrap(), snapshot);
    }

    #[test]
    fn test_tool_route_follows_last_message() {
        let call = ToolCall {
            id: "c1".into(),
            name: "port_scanner".into(),
            args: serde_json::json!({}),
        };
        let state = SessionState::new("s", "h").merge(
            PartialState::default()
                .with_messages(AgentRole::Executor, vec![Message::ai_with_tool_calls("", vec![call])]),
        );
        assert_eq!(route_tool_call(&state, AgentRole::Executor), ToolRoute::Tools);
        assert_eq!(route_tool_call(&state, AgentRole::Interpreter), ToolRoute::Continue);

        let state = state.merge(
            PartialState::default()
                .with_messages(AgentRole::Executor, vec![Message::tool_result("c1", "[80]")]),
        );
        assert_eq!(route_tool_call(&state, AgentRole::Executor), ToolRoute::Continue);
    }
}
