//! AdaptiveFuzz - Rust 多角色侦察编排系统
//!
//! 模块划分：
//! - **agent**: 会话运行时（受理目标、挂起 / 恢复、终态折算）
//! - **agents**: 五个角色节点（Planner / Executor / Interpreter / Advisor / Gate）、工具子循环、结构化输出
//! - **checkpoint**: Gate 挂起时的检查点与恢复令牌（内存 / JSON 文件）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态与 reducer、错误类型、恢复策略
//! - **llm**: 推理引擎抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 分角色消息日志与消息归一化
//! - **observability**: tracing 初始化
//! - **tools**: 侦察与分析工具（端口扫描、HTTP、安全头、受限 Shell、ExploitDB、CVE）与执行器
//! - **workflow**: 图构建与校验、路由谓词、单游标调度引擎

pub mod agent;
pub mod agents;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use agent::{AgentRuntime, SessionReport};
pub use workflow::{SessionStatus, WorkflowEngine};
