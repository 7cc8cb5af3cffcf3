//! ExploitDB 检索（调用本地 searchsploit）

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

pub struct ExploitSearchTool {
    binary: String,
    timeout_secs: u64,
}

impl ExploitSearchTool {
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs: timeout_secs.max(1),
        }
    }

    /// 由参数拼出 searchsploit 命令行参数
    pub fn build_args(args: &Value) -> Result<Vec<String>, String> {
        let flag = |key: &str| args.get(key).and_then(Value::as_bool).unwrap_or(false);
        let text = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let mut out = Vec::new();
        if let Some(cve) = text("cve") {
            out.push("--cve".to_string());
            out.push(cve.to_string());
        } else {
            let query = text("query").ok_or("Either 'query' or 'cve' is required")?;
            for (key, switch) in [
                ("case_sensitive", "-c"),
                ("exact_match", "-e"),
                ("strict", "-s"),
                ("title_only", "-t"),
            ] {
                if flag(key) {
                    out.push(switch.to_string());
                }
            }
            out.extend(query.split_whitespace().map(String::from));
        }
        if let Some(exclude) = text("exclude") {
            out.push(format!("--exclude={exclude}"));
        }
        if flag("json_output") {
            out.push("-j".to_string());
        }
        if flag("show_url") {
            out.push("-w".to_string());
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for ExploitSearchTool {
    fn name(&self) -> &str {
        "search_exploitdb"
    }

    fn description(&self) -> &str {
        "Searches the Exploit Database (searchsploit) for public exploits by software/version or CVE id."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Software and version, e.g. Apache 2.4.49" },
                "cve": { "type": "string", "description": "Search by CVE id instead of query" },
                "case_sensitive": { "type": "boolean" },
                "exact_match": { "type": "boolean" },
                "strict": { "type": "boolean" },
                "title_only": { "type": "boolean" },
                "exclude": { "type": "string", "description": "Pipe-separated terms to exclude" },
                "json_output": { "type": "boolean" },
                "show_url": { "type": "boolean" },
                "task_id": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let argv = Self::build_args(&args)?;
        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.binary).args(&argv).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| "Search timed out".to_string())?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                format!("{} not installed (apt install exploitdb)", self.binary)
            }
            _ => format!("Execution failed: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if stdout.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            stdout.to_string()
        };
        Ok(if text.trim().is_empty() {
            "No results found".to_string()
        } else {
            text
        })
    }
}
