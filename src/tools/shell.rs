//! 受策略约束的 Shell 执行器
//!
//! 命令先匹配黑名单正则（忽略大小写），再检查白名单（首词，白名单为空表示不限）；
//! 被拦截的命令返回明确的 BLOCKED 结果而不是错误。执行通过 sh -c / cmd /C，带超时与 tracing 审计。
//! 每次调用（含被拦截的）都写入共享的执行历史，供 get_executor_history 查询；get_allowed_commands 返回当前策略。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

pub const BLOCKED_MARKER: &str = "🚫 COMMAND BLOCKED";

/// 未配置时使用的黑名单
pub const DEFAULT_BLACKLIST: &[&str] = &[
    r"rm\s+-[a-z]*r[a-z]*f",
    r"rm\s+-[a-z]*f[a-z]*r",
    r"\bmkfs",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"chmod\s+(777|\+s)",
    r"curl[^|]*\|\s*(ba)?sh",
    r"wget[^|]*\|\s*(ba)?sh",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
    r"\b(shutdown|reboot|halt)\b",
];

/// 白名单生效时拒绝的 shell 控制符
const CONTROL_OPERATORS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n", "\r"];

/// 一条执行历史；被拦截、超时或启动失败时 return_code 为 -1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShellHistoryEntry {
    pub command: String,
    pub output: String,
    pub return_code: i32,
    pub blocked: bool,
}

/// 执行历史，SecureShellTool 与 ExecutorHistoryTool 共享
#[derive(Debug, Clone, Default)]
pub struct ShellHistory(Arc<Mutex<Vec<ShellHistoryEntry>>>);

impl ShellHistory {
    fn record(&self, command: &str, output: &str, return_code: i32, blocked: bool) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(ShellHistoryEntry {
                command: command.to_string(),
                output: output.to_string(),
                return_code,
                blocked,
            });
        }
    }

    pub fn entries(&self) -> Vec<ShellHistoryEntry> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

pub struct SecureShellTool {
    blacklist: Vec<Regex>,
    allowlist: HashSet<String>,
    timeout_secs: u64,
    history: ShellHistory,
}

impl SecureShellTool {
    /// 黑名单中任一正则非法时返回错误
    pub fn new<S: AsRef<str>>(
        blacklist: &[S],
        allowlist: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Self, regex::Error> {
        let blacklist = blacklist
            .iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            blacklist,
            allowlist: allowlist.into_iter().map(|s| s.to_lowercase()).collect(),
            timeout_secs: timeout_secs.max(1),
            history: ShellHistory::default(),
        })
    }

    pub fn history(&self) -> ShellHistory {
        self.history.clone()
    }

    /// 当前策略：白名单（排序）与黑名单正则
    pub fn policy(&self) -> Value {
        let mut allowed: Vec<&str> = self.allowlist.iter().map(String::as_str).collect();
        allowed.sort_unstable();
        let patterns: Vec<&str> = self.blacklist.iter().map(Regex::as_str).collect();
        serde_json::json!({
            "allowed_commands": allowed,
            "unrestricted": allowed.is_empty(),
            "blacklist_patterns": patterns,
            "note": "An empty allowlist permits any command that matches no blacklist pattern",
        })
    }

    /// Some(原因) 表示拦截
    fn check(&self, command: &str) -> Option<String> {
        if let Some(re) = self.blacklist.iter().find(|re| re.is_match(command)) {
            return Some(format!("Command matched blacklist pattern: {}", re.as_str()));
        }
        if self.allowlist.is_empty() {
            return None;
        }
        // 白名单只校验首个命令名，因此不允许串接、替换与重定向
        if let Some(op) = CONTROL_OPERATORS.iter().find(|op| command.contains(**op)) {
            return Some(format!(
                "Shell control operator '{}' is not allowed while an allowlist is active",
                op.escape_debug()
            ));
        }
        let name = command
            .split_whitespace()
            .next()
            .unwrap_or("")
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if self.allowlist.contains(&name) {
            None
        } else {
            Some(format!("Command '{name}' is not in the allowlist"))
        }
    }
}

#[async_trait]
impl Tool for SecureShellTool {
    fn name(&self) -> &str {
        "secure_executor"
    }

    fn description(&self) -> &str {
        "Executes a shell command under a security policy and returns stdout (plus a [STDERR] section). Blacklisted commands are refused."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute, e.g. whoami" },
                "task_id": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if command.is_empty() {
            return Err("Empty command".to_string());
        }
        if let Some(reason) = self.check(command) {
            tracing::warn!(command = %command, reason = %reason, "shell command blocked");
            let blocked = format!(
                "{BLOCKED_MARKER}\n\n{reason}\n\nThis command is not allowed for security reasons."
            );
            self.history.record(command, &blocked, -1, true);
            return Ok(blocked);
        }

        tracing::info!(command = %command, "secure_executor execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let err = format!("Execution failed: {e}");
                self.history.record(command, &err, -1, false);
                return Err(err);
            }
            Err(_) => {
                let err = format!("Command exceeded {}s", self.timeout_secs);
                self.history.record(command, &err, -1, false);
                return Err(err);
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str("\n[STDERR]\n");
            text.push_str(&stderr);
        }
        self.history
            .record(command, &text, output.status.code().unwrap_or(-1), false);
        if text.is_empty() {
            text = "Command executed successfully (no output)".to_string();
        }
        Ok(text)
    }
}

/// 查询本会话进程内 secure_executor 的全部执行历史
pub struct ExecutorHistoryTool {
    history: ShellHistory,
}

impl ExecutorHistoryTool {
    pub fn new(history: ShellHistory) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Tool for ExecutorHistoryTool {
    fn name(&self) -> &str {
        "get_executor_history"
    }

    fn description(&self) -> &str {
        "Returns every command previously run through secure_executor with its output, return code and whether it was blocked."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        serde_json::to_string_pretty(&self.history.entries()).map_err(|e| e.to_string())
    }
}

/// 返回 secure_executor 的命令策略（白名单与黑名单）
pub struct AllowedCommandsTool {
    policy: Value,
}

impl AllowedCommandsTool {
    pub fn new(shell: &SecureShellTool) -> Self {
        Self { policy: shell.policy() }
    }
}

#[async_trait]
impl Tool for AllowedCommandsTool {
    fn name(&self) -> &str {
        "get_allowed_commands"
    }

    fn description(&self) -> &str {
        "Lists the commands secure_executor accepts and the blacklist patterns it refuses."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        serde_json::to_string_pretty(&self.policy).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(allow: &[&str]) -> SecureShellTool {
        SecureShellTool::new(
            DEFAULT_BLACKLIST,
            allow.iter().map(|s| s.to_string()).collect(),
            5,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_blacklisted_command_is_blocked_not_error() {
        let out = tool(&[]).execute(json!({"command": "RM -RF /tmp/x"})).await.unwrap();
        assert!(out.starts_with(BLOCKED_MARKER));
        assert!(out.contains("blacklist"));
    }

    #[tokio::test]
    async fn test_allowlist_miss_is_blocked() {
        let out = tool(&["whoami"]).execute(json!({"command": "nc -l 4444"})).await.unwrap();
        assert!(out.contains("not in the allowlist"));
    }

    #[tokio::test]
    async fn test_allowlist_rejects_chained_commands() {
        let allowed = tool(&["echo"]);
        for command in [
            "echo ok; id -un",
            "echo ok && id -un",
            "echo ok || id",
            "echo ok | sh",
            "echo `id`",
            "echo $(id)",
            "echo ok > /tmp/x",
            "echo ok\nid",
        ] {
            let out = allowed.execute(json!({ "command": command })).await.unwrap();
            assert!(out.starts_with(BLOCKED_MARKER), "{command}: {out}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_allowlisted_command_runs() {
        let out = tool(&["echo"]).execute(json!({"command": "echo ok"})).await.unwrap();
        assert_eq!(out.trim(), "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_and_captures_stderr() {
        let out = tool(&[])
            .execute(json!({"command": "echo hi; echo oops 1>&2"}))
            .await
            .unwrap();
        assert!(out.starts_with("hi"));
        assert!(out.contains("[STDERR]\noops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_history_records_runs_and_blocks() {
        let shell = tool(&[]);
        let history = ExecutorHistoryTool::new(shell.history());
        shell.execute(json!({"command": "echo one"})).await.unwrap();
        shell.execute(json!({"command": "rm -rf /tmp/nothing"})).await.unwrap();
        shell.execute(json!({"command": "exit 3"})).await.unwrap();

        let entries: Vec<Value> = serde_json::from_str(&history.execute(json!({})).await.unwrap()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["output"], "one\n");
        assert_eq!(entries[0]["return_code"], 0);
        assert_eq!(entries[1]["blocked"], true);
        assert_eq!(entries[1]["return_code"], -1);
        assert_eq!(entries[2]["return_code"], 3);
    }

    #[tokio::test]
    async fn test_allowed_commands_lists_policy() {
        let shell = tool(&["whoami", "curl"]);
        let out = AllowedCommandsTool::new(&shell).execute(json!({})).await.unwrap();
        let policy: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(policy["allowed_commands"], json!(["curl", "whoami"]));
        assert_eq!(policy["unrestricted"], false);
        assert_eq!(
            policy["blacklist_patterns"].as_array().unwrap().len(),
            DEFAULT_BLACKLIST.len()
        );
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(SecureShellTool::new(&["("], vec![], 5).is_err());
    }
}
