//! 工具执行器
//!
//! 持有角色能力集与单次调用超时，execute(tool_name, args) 在超时内调用工具，
//! 未知工具、超时或失败统一转为 AgentError::ToolError；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolRegistry, ToolSpec};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 未绑定任何工具的执行器（该角色不进入工具阶段）
    pub fn empty() -> Self {
        Self::new(ToolRegistry::new(), 1)
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            Some(tool) => match timeout(self.timeout, tool.execute(args)).await {
                Ok(Ok(content)) => Ok(content),
                Ok(Err(e)) => Err(("error", e)),
                Err(_) => Err((
                    "timeout",
                    format!("{tool_name} timed out after {}s", self.timeout.as_secs()),
                )),
            },
            None => Err(("unknown", format!("Unknown tool: {tool_name}"))),
        };

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err((kind, _)) => (false, *kind),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        result.map_err(|(_, detail)| AgentError::ToolError(detail))
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
