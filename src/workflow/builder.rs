//! 工作流构建器
//!
//! 提供流畅的 API 注册节点与边；build 时校验入口、节点、出边与条件分支表，任何缺失都是 ConfigError。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::agents::AgentNode;
use crate::core::{AgentError, AgentRole};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{Edge, Next, RouteLabel, Router};

#[derive(Default)]
pub struct WorkflowBuilder {
    nodes: HashMap<AgentRole, Arc<dyn AgentNode>>,
    edges: HashMap<AgentRole, Edge>,
    entry: Option<AgentRole>,
    problems: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点（以 node.role() 为标识）
    pub fn node(mut self, node: Arc<dyn AgentNode>) -> Self {
        let role = node.role();
        if self.nodes.insert(role, node).is_some() {
            self.problems.push(format!("node '{role}' registered twice"));
        }
        self
    }

    pub fn entry(mut self, role: AgentRole) -> Self {
        self.entry = Some(role);
        self
    }

    /// 直接边
    pub fn edge(self, from: AgentRole, to: Next) -> Self {
        self.add_edge(from, Edge::Direct(to))
    }

    /// 条件边：router 的每个标签都必须在 branches 中出现，且不能多出
    pub fn conditional(
        self,
        from: AgentRole,
        router: Router,
        branches: impl IntoIterator<Item = (RouteLabel, Next)>,
    ) -> Self {
        let branches: HashMap<RouteLabel, Next> = branches.into_iter().collect();
        self.add_edge(from, Edge::Conditional { router, branches })
    }

    fn add_edge(mut self, from: AgentRole, edge: Edge) -> Self {
        if self.edges.insert(from, edge).is_some() {
            self.problems.push(format!("node '{from}' has more than one outgoing edge"));
        }
        self
    }

    pub fn build(self) -> Result<WorkflowGraph, AgentError> {
        let mut problems = self.problems;

        let entry = match self.entry {
            Some(e) if self.nodes.contains_key(&e) => Some(e),
            Some(e) => {
                problems.push(format!("entry node '{e}' is not registered"));
                None
            }
            None => {
                problems.push("no entry node".to_string());
                None
            }
        };

        for role in self.nodes.keys() {
            if !self.edges.contains_key(role) {
                problems.push(format!("node '{role}' has no outgoing edge"));
            }
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                problems.push(format!("edge from unregistered node '{from}'"));
            }
            let targets: Vec<Next> = match edge {
                Edge::Direct(next) => vec![*next],
                Edge::Conditional { router, branches } => {
                    let declared: HashSet<RouteLabel> = router.labels().iter().copied().collect();
                    let given: HashSet<RouteLabel> = branches.keys().copied().collect();
                    for missing in declared.difference(&given) {
                        problems.push(format!("conditional edge from '{from}' has no branch for '{missing}'"));
                    }
                    for extra in given.difference(&declared) {
                        problems.push(format!(
                            "conditional edge from '{from}' declares '{extra}', which its router never returns"
                        ));
                    }
                    branches.values().copied().collect()
                }
            };
            for next in targets {
                if let Next::Node(to) = next {
                    if !self.nodes.contains_key(&to) {
                        problems.push(format!("edge '{from}' -> '{to}' targets an unregistered node"));
                    }
                }
            }
        }

        match entry {
            Some(entry) if problems.is_empty() => Ok(WorkflowGraph {
                nodes: self.nodes,
                edges: self.edges,
                entry,
            }),
            _ => {
                problems.sort();
                Err(AgentError::ConfigError(problems.join("; ")))
            }
        }
    }

    /// 固定的侦察循环：
    /// Planner -(review)-> Gate / -(proceed)-> Executor -> Interpreter -> Advisor -> Gate -(continue)-> Planner / -(stop)-> END
    pub fn recon_cycle(
        planner: Arc<dyn AgentNode>,
        executor: Arc<dyn AgentNode>,
        interpreter: Arc<dyn AgentNode>,
        advisor: Arc<dyn AgentNode>,
        gate: Arc<dyn AgentNode>,
    ) -> Result<WorkflowGraph, AgentError> {
        use AgentRole::*;
        Self::new()
            .node(planner)
            .node(executor)
            .node(interpreter)
            .node(advisor)
            .node(gate)
            .entry(Planner)
            .conditional(
                Planner,
                Router::FromPlanner,
                [
                    (RouteLabel::Review, Next::Node(Gate)),
                    (RouteLabel::Proceed, Next::Node(Executor)),
                ],
            )
            .edge(Executor, Next::Node(Interpreter))
            .edge(Interpreter, Next::Node(Advisor))
            .edge(Advisor, Next::Node(Gate))
            .conditional(
                Gate,
                Router::FromGate,
                [
                    (RouteLabel::Continue, Next::Node(Planner)),
                    (RouteLabel::Stop, Next::End),
                ],
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{EventSink, GateNode, NodeOutcome};
    use crate::core::{PartialState, SessionState};
    use async_trait::async_trait;

    struct Noop(AgentRole);

    #[async_trait]
    impl AgentNode for Noop {
        fn role(&self) -> AgentRole {
            self.0
        }
        async fn run(&self, _state: &SessionState, _events: &EventSink) -> NodeOutcome {
            NodeOutcome::Update(PartialState::default())
        }
    }

    fn noop(role: AgentRole) -> Arc<dyn AgentNode> {
        Arc::new(Noop(role))
    }

    #[test]
    fn test_recon_cycle_builds() {
        let graph = WorkflowBuilder::recon_cycle(
            noop(AgentRole::Planner),
            noop(AgentRole::Executor),
            noop(AgentRole::Interpreter),
            noop(AgentRole::Advisor),
            Arc::new(GateNode::default()),
        )
        .unwrap();
        assert_eq!(graph.entry(), AgentRole::Planner);
        assert_eq!(graph.roles().len(), 5);
    }

    #[test]
    fn test_missing_entry_node_and_edge() {
        let err = WorkflowBuilder::new()
            .node(noop(AgentRole::Planner))
            .build()
            .err()
            .unwrap();
        let AgentError::ConfigError(msg) = err else { panic!("expected ConfigError") };
        assert!(msg.contains("no entry node"));
        assert!(msg.contains("no outgoing edge"));
    }

    #[test]
    fn test_edge_to_unregistered_node() {
        let err = WorkflowBuilder::new()
            .node(noop(AgentRole::Executor))
            .entry(AgentRole::Executor)
            .edge(AgentRole::Executor, Next::Node(AgentRole::Interpreter))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ConfigError(msg) if msg.contains("unregistered node")));
    }

    #[test]
    fn test_incomplete_branch_table_rejected() {
        let err = WorkflowBuilder::new()
            .node(noop(AgentRole::Gate))
            .node(noop(AgentRole::Planner))
            .entry(AgentRole::Planner)
            .edge(AgentRole::Planner, Next::Node(AgentRole::Gate))
            .conditional(
                AgentRole::Gate,
                Router::FromGate,
                [
                    (RouteLabel::Continue, Next::Node(AgentRole::Planner)),
                    (RouteLabel::Review, Next::End),
                ],
            )
            .build()
            .err()
            .unwrap();
        let AgentError::ConfigError(msg) = err else { panic!("expected ConfigError") };
        assert!(msg.contains("no branch for 'stop'"));
        assert!(msg.contains("'review'"));
    }
}
