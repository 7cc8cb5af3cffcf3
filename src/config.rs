//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ADAPTIVEFUZZ__*` 覆盖（双下划线表示嵌套，如 `ADAPTIVEFUZZ__LLM__PROVIDER=openai`）。
//! 每个角色的 system prompt 由 `[agents.<role>.prompt]` 的分段按固定顺序拼接，或直接读取 `prompt_file`。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::agents::gate::DEFAULT_STOP_WORDS;
use crate::core::{AgentError, AgentRole};
use crate::tools::DEFAULT_BLACKLIST;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub agents: AgentsSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、检查点目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub checkpoint_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            checkpoint_dir: PathBuf::from(".adaptivefuzz/checkpoints"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [workflow] 段：工具轮数上限、策略条数上限、Gate 停止词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub max_tool_rounds: usize,
    pub max_strategies: usize,
    pub stop_words: Vec<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            max_strategies: 3,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 结构化 prompt 分段；未列出的键按字母序追加在末尾
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PromptSections {
    pub role: Option<String>,
    pub context: Option<String>,
    pub instruction: Option<String>,
    pub rules: Option<String>,
    pub examples: Option<String>,
    pub output_format: Option<String>,
    pub output_constraints: Option<String>,
    pub style_or_tone: Option<String>,
    pub goal: Option<String>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl PromptSections {
    /// 拼接为 system prompt：`Agent: <name>` 之后依次是各非空分段
    pub fn render(&self, agent: &str) -> String {
        let ordered = [
            ("Role", &self.role),
            ("Context", &self.context),
            ("Instruction", &self.instruction),
            ("Rules", &self.rules),
            ("Examples", &self.examples),
            ("Output Format", &self.output_format),
            ("Output Constraints", &self.output_constraints),
            ("Style / Tone", &self.style_or_tone),
            ("Goal", &self.goal),
            ("Notes", &self.notes),
        ];
        let mut parts = vec![format!("Agent: {agent}")];
        for (label, value) in ordered {
            if let Some(text) = value.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                parts.push(format!("{label}:\n{text}"));
            }
        }
        for (key, value) in &self.extra {
            let text = value.trim();
            if !text.is_empty() {
                parts.push(format!("{}:\n{text}", title_case(key)));
            }
        }
        parts.join("\n\n")
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// [agents.<role>] 段：prompt 与工具绑定
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentSection {
    pub prompt: PromptSections,
    /// 设置后直接使用该文件内容作为 system prompt
    pub prompt_file: Option<PathBuf>,
    pub tools: Vec<String>,
}

impl AgentSection {
    fn with(role: &str, instruction: &str, output_format: &str, tools: &[&str]) -> Self {
        Self {
            prompt: PromptSections {
                role: Some(role.to_string()),
                instruction: Some(instruction.to_string()),
                output_format: Some(output_format.to_string()),
                rules: Some(
                    "Only act against the target named in the context. Never invent tool output."
                        .to_string(),
                ),
                ..PromptSections::default()
            },
            prompt_file: None,
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// system prompt：prompt_file 优先，否则渲染分段
    pub fn system_prompt(&self, agent: &str) -> Result<String, AgentError> {
        match &self.prompt_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                AgentError::ConfigError(format!("cannot read prompt file {}: {e}", path.display()))
            }),
            None => Ok(self.prompt.render(agent)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub planner: AgentSection,
    pub executor: AgentSection,
    pub interpreter: AgentSection,
    pub advisor: AgentSection,
    pub gate: AgentSection,
}

impl AgentsSection {
    pub fn get(&self, role: AgentRole) -> &AgentSection {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Executor => &self.executor,
            AgentRole::Interpreter => &self.interpreter,
            AgentRole::Advisor => &self.advisor,
            AgentRole::Gate => &self.gate,
        }
    }
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            planner: AgentSection::with(
                "You are the conversational handler of a reconnaissance team.",
                "Break the operator's latest objective into small, concrete reconnaissance tasks. \
                 Flag the request as inappropriate if it is out of scope or harmful.",
                r#"{"pending_tasks":[{"id":"t1","description":"...","status":"pending"}],"is_inappropriate":false}"#,
                &[],
            ),
            executor: AgentSection::with(
                "You are the recon executor.",
                "For each pending task call the available tools against the target. \
                 Always pass the task's id as the task_id argument of every tool call.",
                "Tool calls; reply with a short plain-text note once every task has been attempted.",
                &[
                    "port_scanner",
                    "make_http_request",
                    "check_security_headers",
                    "detect_technologies",
                    "secure_executor",
                    "get_executor_history",
                    "get_allowed_commands",
                ],
            ),
            interpreter: AgentSection::with(
                "You are the result interpreter.",
                "Turn executed command outputs into concise findings. You may look up exploits or CVEs first.",
                r#"{"findings":[{"summary":"...","details":{"key":"value"}}]}"#,
                &["search_exploitdb", "lookup_cve", "web_search"],
            ),
            advisor: AgentSection::with(
                "You are the strategy advisor.",
                "Recommend the most promising next steps for the following cycle.",
                r#"{"strategies":[{"text":"...","rationale":"..."}]}"#,
                &[],
            ),
            gate: AgentSection::with(
                "Human-in-the-loop checkpoint.",
                "Summaries are shown to the operator, whose replies steer the next cycle.",
                "Plain text.",
                &[],
            ),
        }
    }
}

/// [tools] 段：工具超时与各工具参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub port_scan: PortScanSection,
    pub http: HttpSection,
    pub shell: ShellSection,
    pub security_headers: Vec<String>,
    pub exploitdb: ExploitDbSection,
    pub cve: CveSection,
    pub web_search: WebSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            port_scan: PortScanSection::default(),
            http: HttpSection::default(),
            shell: ShellSection::default(),
            security_headers: [
                "Strict-Transport-Security",
                "Content-Security-Policy",
                "X-Frame-Options",
                "X-Content-Type-Options",
                "Referrer-Policy",
                "Permissions-Policy",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exploitdb: ExploitDbSection::default(),
            cve: CveSection::default(),
            web_search: WebSearchSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortScanSection {
    pub connect_timeout_ms: u64,
}

impl Default for PortScanSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// [tools.shell] 段：黑名单正则、白名单命令名（空表示不限）、命令超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub blacklist_patterns: Vec<String>,
    pub allowlist: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            blacklist_patterns: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
            allowlist: Vec::new(),
            command_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExploitDbSection {
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for ExploitDbSection {
    fn default() -> Self {
        Self {
            binary: "searchsploit".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CveSection {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CveSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

/// [tools.web_search] 段：凭据所在的环境变量名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub engine_id_env: String,
    pub timeout_secs: u64,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: "GOOGLE_SEARCH_API".to_string(),
            engine_id_env: "SEARCH_ENGINE_ID".to_string(),
            timeout_secs: 15,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ADAPTIVEFUZZ__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ADAPTIVEFUZZ__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found; ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ADAPTIVEFUZZ")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("workflow.stop_words")
            .with_list_parse_key("tools.shell.allowlist")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
