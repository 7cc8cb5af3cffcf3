//! Headless 会话运行时
//!
//! 供 CLI 或其他前端调用：按配置构建推理后端、工具集与五个角色节点，
//! start_session 受理目标与初始目的并运行到第一次挂起，resume / resume_session 以人工回复继续。
//! 运行结果统一折算为 SessionStatus；调度过程中的致命错误记为 Failed(reason)。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agents::{AdvisorNode, EventSink, ExecutorNode, GateNode, InterpreterNode, PlannerNode};
use crate::checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, ResumeToken, Suspension};
use crate::config::AppConfig;
use crate::core::{AgentError, AgentRole, SessionState};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::tools::{
    AllowedCommandsTool, CveLookupTool, ExecutorHistoryTool, ExploitSearchTool, HttpRequestTool,
    PortScannerTool, SecureShellTool, SecurityHeadersTool, TechDetectTool, ToolExecutor, ToolRegistry,
    WebSearchTool,
};
use crate::workflow::{RunOutcome, SessionStatus, WorkflowBuilder, WorkflowEngine};

/// 一次 start / resume 的结果
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    /// status 为 Suspended 时给出摘要与恢复令牌
    pub suspension: Option<Suspension>,
    /// 正常结束时的最终状态
    pub state: Option<SessionState>,
}

/// 根据配置选择推理后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// 所选后端缺少 API Key 时退回 Mock 并记录 warning；未知 provider 为配置错误。
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.llm.provider.trim().to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    match provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmClient::new())),
        "deepseek" => {
            if std::env::var("DEEPSEEK_API_KEY").is_err() && std::env::var("OPENAI_API_KEY").is_err() {
                tracing::warn!("No DEEPSEEK_API_KEY / OPENAI_API_KEY set, using Mock LLM");
                return Ok(Arc::new(MockLlmClient::new()));
            }
            let client = create_deepseek_client(cfg.llm.model.as_deref(), cfg.llm.base_url.as_deref(), timeout);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Ok(Arc::new(client))
        }
        "openai" => {
            let Ok(key) = std::env::var("OPENAI_API_KEY") else {
                tracing::warn!("No OPENAI_API_KEY set, using Mock LLM");
                return Ok(Arc::new(MockLlmClient::new()));
            };
            let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                Some(key.as_str()),
                timeout,
            )))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider '{other}' (expected deepseek, openai or mock)"
        ))),
    }
}

/// 注册全部内置工具；角色只能从中按名绑定
pub fn build_tool_registry(cfg: &AppConfig) -> Result<ToolRegistry, AgentError> {
    let tools = &cfg.tools;
    let shell = SecureShellTool::new(
        &tools.shell.blacklist_patterns,
        tools.shell.allowlist.clone(),
        tools.shell.command_timeout_secs,
    )
    .map_err(|e| AgentError::ConfigError(format!("invalid shell blacklist pattern: {e}")))?;

    let mut registry = ToolRegistry::new();
    registry.register(PortScannerTool::new(tools.port_scan.connect_timeout_ms));
    registry.register(HttpRequestTool::new(tools.http.timeout_secs));
    registry.register(SecurityHeadersTool::new(
        tools.security_headers.clone(),
        tools.http.timeout_secs,
    ));
    registry.register(TechDetectTool::new(tools.http.timeout_secs));
    registry.register(ExecutorHistoryTool::new(shell.history()));
    registry.register(AllowedCommandsTool::new(&shell));
    registry.register(shell);
    registry.register(ExploitSearchTool::new(
        tools.exploitdb.binary.clone(),
        tools.exploitdb.timeout_secs,
    ));
    registry.register(CveLookupTool::new(tools.cve.endpoint.as_deref(), tools.cve.timeout_secs));
    registry.register(WebSearchTool::new(
        tools.web_search.endpoint.as_deref(),
        &tools.web_search.api_key_env,
        &tools.web_search.engine_id_env,
        tools.web_search.timeout_secs,
    ));
    Ok(registry)
}

/// 各角色的 system prompt，会话受理时写入对应日志
pub fn render_system_prompts(cfg: &AppConfig) -> Result<BTreeMap<AgentRole, String>, AgentError> {
    AgentRole::ALL
        .iter()
        .map(|role| Ok((*role, cfg.agents.get(*role).system_prompt(role.as_str())?)))
        .collect()
}

/// 会话运行时：持有调度引擎与每个会话共用的 system prompt
pub struct AgentRuntime {
    engine: WorkflowEngine,
    llm: Arc<dyn LlmClient>,
    system_prompts: BTreeMap<AgentRole, String>,
}

impl AgentRuntime {
    /// 完全按配置构建：检查点写入 `[app].checkpoint_dir`
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let llm = create_llm_from_config(cfg)?;
        let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(&cfg.app.checkpoint_dir));
        Self::with_parts(cfg, llm, store, build_tool_registry(cfg)?)
    }

    /// 注入推理后端、检查点存储与工具集（测试与嵌入场景）
    pub fn with_parts(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn CheckpointStore>,
        registry: ToolRegistry,
    ) -> Result<Self, AgentError> {
        let timeout = cfg.tools.tool_timeout_secs;
        let rounds = cfg.workflow.max_tool_rounds;
        let recon = registry.subset(&cfg.agents.executor.tools)?;
        let analysis = registry.subset(&cfg.agents.interpreter.tools)?;
        for role in [AgentRole::Planner, AgentRole::Advisor, AgentRole::Gate] {
            if !cfg.agents.get(role).tools.is_empty() {
                return Err(AgentError::ConfigError(format!("role {role} does not accept tool bindings")));
            }
        }
        if recon.is_empty() {
            return Err(AgentError::ConfigError("executor has no recon tools bound".to_string()));
        }
        tracing::info!(
            recon = ?recon.tool_names(),
            analysis = ?analysis.tool_names(),
            "tool bindings resolved"
        );

        let graph = WorkflowBuilder::recon_cycle(
            Arc::new(PlannerNode::new(llm.clone())),
            Arc::new(ExecutorNode::new(llm.clone(), ToolExecutor::new(recon, timeout), rounds)),
            Arc::new(InterpreterNode::new(llm.clone(), ToolExecutor::new(analysis, timeout), rounds)),
            Arc::new(AdvisorNode::new(llm.clone(), cfg.workflow.max_strategies)),
            Arc::new(GateNode::new(&cfg.workflow.stop_words)),
        )?;

        Ok(Self {
            engine: WorkflowEngine::new(graph, store),
            llm,
            system_prompts: render_system_prompts(cfg)?,
        })
    }

    /// 过程事件推送到给定出口
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.engine = self.engine.with_events(events);
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// 累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 受理新会话并运行到第一次挂起（或结束）
    pub async fn start_session(&self, target: &str, objective: &str) -> SessionReport {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session = %session_id, target, "session started");
        let state = SessionState::intake(session_id.clone(), target, objective, &self.system_prompts);
        let result = self.engine.run(state).await;
        settle(&session_id, result)
    }

    /// 以令牌恢复；令牌无效或已使用时返回错误，其余致命错误记为 Failed
    pub async fn resume(&self, token: &ResumeToken, reply: &str) -> Result<SessionReport, AgentError> {
        let result = self.engine.resume(token, reply).await;
        reject_caller_errors(result).map(|r| settle(&token.session_id, r))
    }

    /// 以会话 ID 恢复其最新挂起
    pub async fn resume_session(&self, session_id: &str, reply: &str) -> Result<SessionReport, AgentError> {
        let result = self.engine.resume_session(session_id, reply).await;
        reject_caller_errors(result).map(|r| settle(session_id, r))
    }

    /// 仍在等待人工回复的会话
    pub async fn suspended_sessions(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.engine.store().suspended_sessions().await?)
    }
}

/// 领取检查点失败属于调用方错误，直接返回给调用方
fn reject_caller_errors(
    result: Result<RunOutcome, AgentError>,
) -> Result<Result<RunOutcome, AgentError>, AgentError> {
    match result {
        Err(AgentError::Checkpoint(
            e @ (CheckpointError::NotFound(_) | CheckpointError::AlreadyResumed(_) | CheckpointError::StaleToken(_)),
        )) => Err(AgentError::Checkpoint(e)),
        other => Ok(other),
    }
}

fn settle(session_id: &str, result: Result<RunOutcome, AgentError>) -> SessionReport {
    match result {
        Ok(RunOutcome::Suspended(suspension)) => SessionReport {
            session_id: session_id.to_string(),
            status: SessionStatus::Suspended,
            suspension: Some(suspension),
            state: None,
        },
        Ok(RunOutcome::Finished(state)) => SessionReport {
            session_id: session_id.to_string(),
            status: SessionStatus::Stopped,
            suspension: None,
            state: Some(state),
        },
        Err(e) => {
            tracing::error!(session = %session_id, error = %e, "session failed");
            SessionReport {
                session_id: session_id.to_string(),
                status: SessionStatus::Failed(e.to_string()),
                suspension: None,
                state: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;

    fn mock_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "watson".to_string();
        assert!(matches!(create_llm_from_config(&cfg), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_registry_holds_recon_and_analysis_tools() {
        let registry = build_tool_registry(&AppConfig::default()).unwrap();
        for name in [
            "port_scanner",
            "make_http_request",
            "check_security_headers",
            "detect_technologies",
            "secure_executor",
            "get_executor_history",
            "get_allowed_commands",
            "search_exploitdb",
            "lookup_cve",
            "web_search",
        ] {
            assert!(registry.get(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_unknown_tool_binding_rejected() {
        let mut cfg = mock_config();
        cfg.agents.executor.tools.push("nmap_everything".to_string());
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let registry = build_tool_registry(&cfg).unwrap();
        let result = AgentRuntime::with_parts(&cfg, llm, Arc::new(InMemoryCheckpointStore::new()), registry);
        assert!(matches!(result, Err(AgentError::ConfigError(msg)) if msg.contains("nmap_everything")));
    }

    #[test]
    fn test_prompts_rendered_for_every_role() {
        let prompts = render_system_prompts(&AppConfig::default()).unwrap();
        assert_eq!(prompts.len(), 5);
        assert!(prompts[&AgentRole::Executor].starts_with("Agent: executor"));
    }

    #[tokio::test]
    async fn test_session_suspends_then_stops() {
        let cfg = mock_config();
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let runtime =
            AgentRuntime::with_parts(&cfg, llm, store.clone(), build_tool_registry(&cfg).unwrap()).unwrap();

        let report = runtime.start_session("127.0.0.1", "look around").await;
        assert_eq!(report.status, SessionStatus::Suspended);
        assert_eq!(runtime.suspended_sessions().await.unwrap(), vec![report.session_id.clone()]);

        let token = report.suspension.unwrap().token;
        let done = runtime.resume(&token, "stop").await.unwrap();
        assert_eq!(done.status, SessionStatus::Stopped);
        assert!(runtime.suspended_sessions().await.unwrap().is_empty());
        assert!(matches!(
            runtime.resume(&token, "stop").await,
            Err(AgentError::Checkpoint(CheckpointError::AlreadyResumed(_)))
        ));
    }
}
