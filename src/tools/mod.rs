//! 工具层：Tool trait、注册表、带超时与审计的执行器，以及内置的侦察 / 分析工具

pub mod cve;
pub mod executor;
pub mod exploit_search;
pub mod http;
pub mod port_scan;
pub mod registry;
pub mod shell;
pub mod tech_detect;
pub mod web_search;

pub use cve::CveLookupTool;
pub use executor::ToolExecutor;
pub use exploit_search::ExploitSearchTool;
pub use http::{HttpRequestTool, SecurityHeadersTool};
pub use port_scan::PortScannerTool;
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use shell::{
    AllowedCommandsTool, ExecutorHistoryTool, SecureShellTool, ShellHistory, ShellHistoryEntry, BLOCKED_MARKER,
    DEFAULT_BLACKLIST,
};
pub use tech_detect::TechDetectTool;
pub use web_search::WebSearchTool;
