//! 已校验的工作流图：节点表、每个节点唯一的出边、入口节点

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::AgentNode;
use crate::core::{AgentError, AgentRole};
use crate::workflow::types::Edge;

/// 只能由 WorkflowBuilder::build 构造
pub struct WorkflowGraph {
    pub(crate) nodes: HashMap<AgentRole, Arc<dyn AgentNode>>,
    pub(crate) edges: HashMap<AgentRole, Edge>,
    pub(crate) entry: AgentRole,
}

impl WorkflowGraph {
    pub fn entry(&self) -> AgentRole {
        self.entry
    }

    pub fn node(&self, role: AgentRole) -> Result<&Arc<dyn AgentNode>, AgentError> {
        self.nodes
            .get(&role)
            .ok_or_else(|| AgentError::ConfigError(format!("node '{role}' is not part of the graph")))
    }

    pub fn edge(&self, from: AgentRole) -> Result<&Edge, AgentError> {
        self.edges
            .get(&from)
            .ok_or_else(|| AgentError::ConfigError(format!("node '{from}' has no outgoing edge")))
    }

    /// 按角色顺序
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.nodes.keys().copied().collect();
        roles.sort();
        roles
    }
}
