//! 工作流引擎
//!
//! 单游标调度：一次只执行一个节点，合并其 PartialState，再沿出边路由。
//! 两阶段 API：`step` / `run` 执行到挂起或结束；`resume` 以恢复令牌领取检查点，从 Gate 的续行逻辑继续。
//! 致命错误中止运行时，出错前的最后状态归档为 Failed 检查点，再把错误返回给调用方。

use std::sync::Arc;

use crate::agents::{EventSink, GraphEvent, NodeOutcome};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, ResumeToken, Suspension};
use crate::core::{AgentError, AgentRole, SessionState};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::Next;

/// 单步结果
#[derive(Debug)]
pub enum StepOutcome {
    Continue { state: SessionState, next: AgentRole },
    Suspended(Suspension),
    Finished(SessionState),
}

/// 一次 run / resume 的结果
#[derive(Debug)]
pub enum RunOutcome {
    Suspended(Suspension),
    Finished(SessionState),
}

pub struct WorkflowEngine {
    graph: WorkflowGraph,
    store: Arc<dyn CheckpointStore>,
    events: EventSink,
}

impl WorkflowEngine {
    pub fn new(graph: WorkflowGraph, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            store,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// 执行 cursor 指向的节点并路由到下一个
    pub async fn step(&self, state: SessionState, cursor: AgentRole) -> Result<StepOutcome, AgentError> {
        let node = self.graph.node(cursor)?;
        tracing::info!(session = %state.session_id, node = %cursor, cycle = state.cycle, "node started");
        self.events.emit(GraphEvent::NodeStarted {
            session_id: state.session_id.clone(),
            node: cursor,
            cycle: state.cycle,
        });

        match node.run(&state, &self.events).await {
            NodeOutcome::Update(update) => {
                let state = state.merge(update);
                self.events.emit(GraphEvent::NodeFinished {
                    session_id: state.session_id.clone(),
                    node: cursor,
                });
                self.advance(cursor, state).await
            }
            NodeOutcome::Suspend { prompt, update } => {
                let state = state.merge(update);
                let checkpoint = Checkpoint::new(state, cursor, prompt.clone());
                let token = checkpoint.resume_token();
                self.store.save(checkpoint).await?;
                tracing::info!(session = %token.session_id, node = %cursor, "session suspended");
                self.events.emit(GraphEvent::Suspended {
                    session_id: token.session_id.clone(),
                    prompt: prompt.clone(),
                });
                Ok(StepOutcome::Suspended(Suspension {
                    session_id: token.session_id.clone(),
                    prompt,
                    token,
                }))
            }
        }
    }

    /// 从入口节点开始运行，直到挂起或结束
    pub async fn run(&self, state: SessionState) -> Result<RunOutcome, AgentError> {
        self.run_from(state, self.graph.entry()).await
    }

    pub async fn run_from(&self, mut state: SessionState, mut cursor: AgentRole) -> Result<RunOutcome, AgentError> {
        loop {
            let last = state.clone();
            match self.step(state, cursor).await {
                Ok(StepOutcome::Continue { state: next_state, next }) => {
                    state = next_state;
                    cursor = next;
                }
                Ok(StepOutcome::Suspended(s)) => return Ok(RunOutcome::Suspended(s)),
                Ok(StepOutcome::Finished(s)) => return Ok(RunOutcome::Finished(s)),
                Err(e) => return Err(self.abort(&last, cursor, e).await),
            }
        }
    }

    /// 领取检查点（同一挂起只能成功一次），执行挂起节点的续行逻辑后继续运行
    pub async fn resume(&self, token: &ResumeToken, reply: &str) -> Result<RunOutcome, AgentError> {
        let checkpoint = self.store.claim(token).await?;
        let cursor = checkpoint.cursor;
        let node = match self.graph.node(cursor) {
            Ok(node) => node,
            Err(e) => return Err(self.abort(&checkpoint.state, cursor, e).await),
        };
        tracing::info!(session = %token.session_id, node = %cursor, "session resumed");

        let update = node.resume(&checkpoint.state, reply, &self.events).await;
        let state = checkpoint.state.merge(update);
        let last = state.clone();
        match self.advance(cursor, state).await {
            Ok(StepOutcome::Continue { state, next }) => self.run_from(state, next).await,
            Ok(StepOutcome::Suspended(s)) => Ok(RunOutcome::Suspended(s)),
            Ok(StepOutcome::Finished(s)) => Ok(RunOutcome::Finished(s)),
            Err(e) => Err(self.abort(&last, cursor, e).await),
        }
    }

    /// 以会话 ID 查出最新挂起的令牌后恢复
    pub async fn resume_session(&self, session_id: &str, reply: &str) -> Result<RunOutcome, AgentError> {
        let checkpoint = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;
        self.resume(&checkpoint.resume_token(), reply).await
    }

    async fn advance(&self, from: AgentRole, state: SessionState) -> Result<StepOutcome, AgentError> {
        let (label, next) = self.graph.edge(from)?.resolve(from, &state)?;
        let label = label.map(|l| l.to_string()).unwrap_or_else(|| "direct".to_string());
        tracing::debug!(session = %state.session_id, from = %from, label = %label, to = %next, "routed");
        self.events.emit(GraphEvent::Routed {
            from,
            label,
            to: next.to_string(),
        });

        match next {
            Next::Node(role) => Ok(StepOutcome::Continue { state, next: role }),
            Next::End => {
                self.archive(&state, from).await?;
                tracing::info!(session = %state.session_id, cycle = state.cycle, "session finished");
                self.events.emit(GraphEvent::Finished {
                    session_id: state.session_id.clone(),
                    cycle: state.cycle,
                });
                Ok(StepOutcome::Finished(state))
            }
        }
    }

    /// 结束时把最终状态写回该会话的检查点
    async fn archive(&self, state: &SessionState, from: AgentRole) -> Result<(), AgentError> {
        let mut checkpoint = match self.store.load(&state.session_id).await? {
            Some(cp) => cp,
            None => Checkpoint::new(state.clone(), from, ""),
        };
        checkpoint.finish(state.clone(), from);
        self.store.save(checkpoint).await?;
        Ok(())
    }

    /// 致命错误：把最后状态归档为 Failed，返回原错误；归档本身失败只记日志
    async fn abort(&self, state: &SessionState, cursor: AgentRole, error: AgentError) -> AgentError {
        tracing::error!(session = %state.session_id, node = %cursor, error = %error, "run aborted");
        let archived = match self.store.load(&state.session_id).await {
            Ok(existing) => {
                let mut checkpoint = existing.unwrap_or_else(|| Checkpoint::new(state.clone(), cursor, ""));
                checkpoint.fail(state.clone(), cursor, error.to_string());
                self.store.save(checkpoint).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = archived {
            tracing::warn!(session = %state.session_id, error = %e, "failed to archive aborted session");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentNode, GateNode};
    use crate::checkpoint::{CheckpointStatus, InMemoryCheckpointStore};
    use crate::core::{PartialState, Task};
    use crate::workflow::types::{Edge, Router};
    use crate::workflow::{Next, RouteLabel, WorkflowBuilder};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// 每次运行都写入一条固定任务
    struct Scripted(AgentRole);

    #[async_trait]
    impl AgentNode for Scripted {
        fn role(&self) -> AgentRole {
            self.0
        }
        async fn run(&self, state: &SessionState, _events: &EventSink) -> NodeOutcome {
            let mut update = PartialState::default();
            if self.0 == AgentRole::Planner {
                update.pending_tasks = Some(vec![Task::pending(format!("t{}", state.cycle), "x")]);
                update.to_loop = Some(false);
                update.advance_cycle = state.to_loop;
            }
            NodeOutcome::Update(update)
        }
    }

    fn engine(store: Arc<InMemoryCheckpointStore>) -> WorkflowEngine {
        let graph = WorkflowBuilder::recon_cycle(
            Arc::new(Scripted(AgentRole::Planner)),
            Arc::new(Scripted(AgentRole::Executor)),
            Arc::new(Scripted(AgentRole::Interpreter)),
            Arc::new(Scripted(AgentRole::Advisor)),
            Arc::new(GateNode::default()),
        )
        .unwrap();
        WorkflowEngine::new(graph, store)
    }

    #[tokio::test]
    async fn test_step_walks_the_cycle_and_suspends_at_gate() {
        let engine = engine(Arc::new(InMemoryCheckpointStore::new()));
        let mut state = SessionState::new("s1", "h");
        let mut cursor = AgentRole::Planner;
        let mut visited = vec![];
        loop {
            visited.push(cursor);
            match engine.step(state, cursor).await.unwrap() {
                StepOutcome::Continue { state: s, next } => {
                    state = s;
                    cursor = next;
                }
                StepOutcome::Suspended(s) => {
                    assert_eq!(s.session_id, "s1");
                    break;
                }
                StepOutcome::Finished(_) => panic!("should suspend first"),
            }
        }
        assert_eq!(
            visited,
            vec![
                AgentRole::Planner,
                AgentRole::Executor,
                AgentRole::Interpreter,
                AgentRole::Advisor,
                AgentRole::Gate
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_continue_then_stop() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store.clone());

        let RunOutcome::Suspended(first) = engine.run(SessionState::new("s1", "h")).await.unwrap() else {
            panic!("expected suspension");
        };
        let RunOutcome::Suspended(second) = engine.resume(&first.token, "go on").await.unwrap() else {
            panic!("expected second suspension");
        };
        assert_ne!(first.token.token, second.token.token);
        let cp = store.load("s1").await.unwrap().unwrap();
        assert_eq!(cp.state.cycle, 1);

        // 旧令牌已过期
        assert!(matches!(
            engine.resume(&first.token, "again").await,
            Err(AgentError::Checkpoint(CheckpointError::StaleToken(_)))
        ));

        let RunOutcome::Finished(done) = engine.resume_session("s1", "stop").await.unwrap() else {
            panic!("expected finish");
        };
        assert_eq!(done.cycle, 1);
        assert!(!done.to_loop);
        let cp = store.load("s1").await.unwrap().unwrap();
        assert_eq!(cp.status, CheckpointStatus::Finished);
        assert!(matches!(
            engine.resume(&second.token, "stop").await,
            Err(AgentError::Checkpoint(CheckpointError::AlreadyResumed(_)))
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_archives_failed_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut engine = engine(store.clone());
        // Gate 只剩 continue 分支，回复 stop 时路由失败
        engine.graph.edges.insert(
            AgentRole::Gate,
            Edge::Conditional {
                router: Router::FromGate,
                branches: HashMap::from([(RouteLabel::Continue, Next::Node(AgentRole::Planner))]),
            },
        );

        let RunOutcome::Suspended(first) = engine.run(SessionState::new("s1", "h")).await.unwrap() else {
            panic!("expected suspension");
        };
        let err = engine.resume(&first.token, "stop").await.unwrap_err();
        assert!(matches!(err, AgentError::RoutingError { from: AgentRole::Gate, .. }));

        let cp = store.load("s1").await.unwrap().unwrap();
        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.cursor, AgentRole::Gate);
        assert!(cp.error.as_deref().unwrap_or_default().contains("stop"));
        assert!(store.suspended_sessions().await.unwrap().is_empty());
        assert!(matches!(
            engine.resume(&first.token, "continue").await,
            Err(AgentError::Checkpoint(CheckpointError::AlreadyResumed(_)))
        ));
    }
}
