//! 工作流：图定义、构建校验、路由谓词与单游标调度引擎

pub mod builder;
pub mod engine;
pub mod graph;
pub mod routes;
pub mod types;

pub use builder::WorkflowBuilder;
pub use engine::{RunOutcome, StepOutcome, WorkflowEngine};
pub use graph::WorkflowGraph;
pub use routes::{route_from_gate, route_from_planner, route_tool_call, tool_route_for};
pub use types::*;
