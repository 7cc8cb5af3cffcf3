//! 工作流类型定义
//!
//! 节点即 AgentRole；边分为直接边与条件边。每个决策点有自己的标签枚举（GateRoute / PlannerRoute / ToolRoute），
//! 统一转换为 RouteLabel 后在条件边的分支表中查找下一个节点。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{AgentError, AgentRole, SessionState};
use crate::workflow::routes::{route_from_gate, route_from_planner, route_tool_call};

/// Gate 之后：继续下一轮或结束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateRoute {
    Continue,
    Stop,
}

/// Planner 之后：请求被判定不当时交由人工审核，否则执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlannerRoute {
    Review,
    Proceed,
}

/// 角色最后一条消息是否携带待执行的工具调用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolRoute {
    Tools,
    Continue,
}

/// 条件边分支表使用的统一标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLabel {
    Continue,
    Stop,
    Review,
    Proceed,
    Tools,
}

impl RouteLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteLabel::Continue => "continue",
            RouteLabel::Stop => "stop",
            RouteLabel::Review => "review",
            RouteLabel::Proceed => "proceed",
            RouteLabel::Tools => "tools",
        }
    }
}

impl fmt::Display for RouteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GateRoute> for RouteLabel {
    fn from(r: GateRoute) -> Self {
        match r {
            GateRoute::Continue => RouteLabel::Continue,
            GateRoute::Stop => RouteLabel::Stop,
        }
    }
}

impl From<PlannerRoute> for RouteLabel {
    fn from(r: PlannerRoute) -> Self {
        match r {
            PlannerRoute::Review => RouteLabel::Review,
            PlannerRoute::Proceed => RouteLabel::Proceed,
        }
    }
}

impl From<ToolRoute> for RouteLabel {
    fn from(r: ToolRoute) -> Self {
        match r {
            ToolRoute::Tools => RouteLabel::Tools,
            ToolRoute::Continue => RouteLabel::Continue,
        }
    }
}

/// 路由谓词：纯函数 f(state) -> label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Router {
    FromGate,
    FromPlanner,
    ToolCall(AgentRole),
}

impl Router {
    /// 该谓词可能产生的全部标签
    pub fn labels(&self) -> &'static [RouteLabel] {
        match self {
            Router::FromGate => &[RouteLabel::Continue, RouteLabel::Stop],
            Router::FromPlanner => &[RouteLabel::Review, RouteLabel::Proceed],
            Router::ToolCall(_) => &[RouteLabel::Tools, RouteLabel::Continue],
        }
    }

    pub fn route(&self, state: &SessionState) -> RouteLabel {
        match self {
            Router::FromGate => route_from_gate(state).into(),
            Router::FromPlanner => route_from_planner(state).into(),
            Router::ToolCall(role) => route_tool_call(state, *role).into(),
        }
    }
}

/// 边的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(AgentRole),
    End,
}

impl fmt::Display for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Node(role) => write!(f, "{role}"),
            Next::End => f.write_str("END"),
        }
    }
}

/// 节点的出边
#[derive(Debug, Clone)]
pub enum Edge {
    Direct(Next),
    Conditional {
        router: Router,
        branches: HashMap<RouteLabel, Next>,
    },
}

impl Edge {
    /// 求下一个节点；标签在分支表中缺失即 RoutingError
    pub fn resolve(&self, from: AgentRole, state: &SessionState) -> Result<(Option<RouteLabel>, Next), AgentError> {
        match self {
            Edge::Direct(next) => Ok((None, *next)),
            Edge::Conditional { router, branches } => {
                let label = router.route(state);
                branches
                    .get(&label)
                    .map(|next| (Some(label), *next))
                    .ok_or_else(|| AgentError::RoutingError {
                        from,
                        label: label.to_string(),
                    })
            }
        }
    }
}

/// 会话对外的终态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    /// 在 Gate 等待人工回复
    Suspended,
    /// Gate 选择了 stop
    Stopped,
    /// 致命错误终止
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_edge_resolves_declared_label() {
        let mut branches = HashMap::new();
        branches.insert(RouteLabel::Continue, Next::Node(AgentRole::Planner));
        branches.insert(RouteLabel::Stop, Next::End);
        let edge = Edge::Conditional {
            router: Router::FromGate,
            branches,
        };
        let mut state = SessionState::new("s", "h");
        assert_eq!(edge.resolve(AgentRole::Gate, &state).unwrap(), (Some(RouteLabel::Stop), Next::End));
        state.to_loop = true;
        assert_eq!(
            edge.resolve(AgentRole::Gate, &state).unwrap().1,
            Next::Node(AgentRole::Planner)
        );
    }

    #[test]
    fn test_missing_branch_is_routing_error() {
        let mut branches = HashMap::new();
        branches.insert(RouteLabel::Proceed, Next::Node(AgentRole::Executor));
        let edge = Edge::Conditional {
            router: Router::FromPlanner,
            branches,
        };
        let mut state = SessionState::new("s", "h");
        state.is_inappropriate = true;
        match edge.resolve(AgentRole::Planner, &state) {
            Err(AgentError::RoutingError { from, label }) => {
                assert_eq!(from, AgentRole::Planner);
                assert_eq!(label, "review");
            }
            other => panic!("expected RoutingError, got {other:?}"),
        }
    }
}
