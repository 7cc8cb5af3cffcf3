//! AdaptiveFuzz CLI
//!
//! 入口：初始化日志、加载配置、构建会话运行时。
//! - `run`：受理目标与目的，在终端里充当 Gate（读 stdin 回复），直到 stop
//! - `resume`：以会话 ID 和一次回复恢复挂起的会话（可跨进程）
//! - `sessions`：列出等待回复的会话

use std::path::PathBuf;

use adaptivefuzz::agent::{AgentRuntime, SessionReport};
use adaptivefuzz::agents::{EventSink, GraphEvent};
use adaptivefuzz::config::load_config;
use adaptivefuzz::workflow::SessionStatus;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "adaptivefuzz", version, about = "Multi-role reconnaissance orchestration with human review")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and review each cycle interactively
    Run {
        #[arg(long)]
        target: String,
        #[arg(long)]
        objective: String,
    },
    /// Resume a suspended session with one reply
    Resume {
        #[arg(long)]
        session: String,
        #[arg(long)]
        reply: String,
    },
    /// List sessions waiting for a reply
    Sessions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adaptivefuzz::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<GraphEvent>();
    let runtime = AgentRuntime::from_config(&cfg)
        .context("Failed to build session runtime")?
        .with_events(EventSink::new(event_tx));

    // 过程事件打印到 stderr，Gate 摘要走 stdout
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let result = match cli.command {
        Commands::Run { target, objective } => run_interactive(&runtime, &target, &objective).await,
        Commands::Resume { session, reply } => {
            let report = runtime
                .resume_session(&session, &reply)
                .await
                .with_context(|| format!("Failed to resume session {session}"))?;
            show(&report);
            Ok(())
        }
        Commands::Sessions => {
            let sessions = runtime
                .suspended_sessions()
                .await
                .context("Failed to list suspended sessions")?;
            if sessions.is_empty() {
                println!("No suspended sessions.");
            }
            for id in sessions {
                println!("{id}");
            }
            Ok(())
        }
    };

    let (prompt, completion, total) = runtime.token_usage();
    if total > 0 {
        tracing::info!(prompt, completion, total, "token usage");
    }
    drop(runtime);
    let _ = printer.await;
    result
}

async fn run_interactive(runtime: &AgentRuntime, target: &str, objective: &str) -> anyhow::Result<()> {
    let mut report = runtime.start_session(target, objective).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        show(&report);
        let Some(suspension) = report.suspension.take() else {
            break;
        };
        println!("\nReply (empty or 'stop' to finish):");
        let reply = lines
            .next_line()
            .await
            .context("Failed to read reply from stdin")?
            .unwrap_or_default();
        report = runtime
            .resume(&suspension.token, &reply)
            .await
            .with_context(|| format!("Failed to resume session {}", suspension.session_id))?;
    }

    match report.status {
        SessionStatus::Failed(reason) => anyhow::bail!("session {} failed: {reason}", report.session_id),
        _ => Ok(()),
    }
}

fn show(report: &SessionReport) {
    match &report.status {
        SessionStatus::Suspended => {
            if let Some(s) = &report.suspension {
                println!("{}", s.prompt);
                println!("(session {})", s.session_id);
            }
        }
        SessionStatus::Stopped => {
            let cycle = report.state.as_ref().map(|s| s.cycle).unwrap_or_default();
            println!("Session {} stopped after cycle {cycle}.", report.session_id);
        }
        SessionStatus::Failed(reason) => {
            eprintln!("Session {} failed: {reason}", report.session_id);
        }
    }
}

fn print_event(event: &GraphEvent) {
    match event {
        GraphEvent::NodeStarted { node, cycle, .. } => eprintln!("▶ {node} (cycle {cycle})"),
        GraphEvent::ToolCall { tool, args, .. } => eprintln!("  🔧 {tool} {args}"),
        GraphEvent::Observation { tool, ok, preview, .. } => {
            let mark = if *ok { "✓" } else { "✗" };
            eprintln!("  {mark} {tool}: {preview}");
        }
        GraphEvent::Recovery { node, action, detail } => eprintln!("  ↻ {node} {action}: {detail}"),
        GraphEvent::Warning { node, text } => eprintln!("  ⚠️ {node}: {text}"),
        GraphEvent::NodeFinished { .. }
        | GraphEvent::Routed { .. }
        | GraphEvent::Suspended { .. }
        | GraphEvent::Finished { .. } => {}
    }
}
