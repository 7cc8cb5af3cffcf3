//! Gate 状态摘要（即使所有集合为空也总会生成）

use std::fmt::Write;

use crate::core::{SessionState, TaskStatus};

const RULE: &str = "--------------------";

pub fn render_summary(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "AdaptiveFuzz Status | target {} | cycle {}", state.target, state.cycle);
    let _ = writeln!(out, "{RULE}");

    let (done, failed): (Vec<_>, Vec<_>) = state
        .completed_tasks
        .iter()
        .partition(|t| t.status != TaskStatus::Failed);

    if !done.is_empty() {
        let _ = writeln!(out, "Completed Tasks:");
        for task in done {
            let _ = writeln!(out, "- [{}] {} (completed)", task.id, task.description);
        }
    }
    if !failed.is_empty() {
        let _ = writeln!(out, "Failed Tasks:");
        for task in failed {
            let reason = task.result.as_deref().unwrap_or("unknown error");
            let _ = writeln!(out, "- [{}] {} (failed: {})", task.id, task.description, first_line(reason));
        }
    }
    // 被拒绝的请求不会执行，它的任务不算待办
    if !state.pending_tasks.is_empty() && !state.is_inappropriate {
        let _ = writeln!(out, "Pending Tasks:");
        for task in &state.pending_tasks {
            let _ = writeln!(out, "- [{}] {} (pending)", task.id, task.description);
        }
    }
    if !state.findings.is_empty() {
        let _ = writeln!(out, "Findings:");
        for finding in &state.findings {
            let _ = writeln!(out, "- {}", finding.summary);
            for (k, v) in &finding.details {
                let _ = writeln!(out, "    {k}: {v}");
            }
        }
    }
    if state.is_inappropriate {
        let _ = writeln!(out, "⚠️  The last request was flagged as inappropriate; nothing was executed.");
    }

    let _ = writeln!(out, "\n💡  Next Possible Strategies, choice is yours!!");
    if state.strategies.is_empty() {
        let _ = writeln!(out, "- (none yet)");
    }
    for strategy in &state.strategies {
        if strategy.rationale.is_empty() {
            let _ = writeln!(out, "- {}", strategy.text);
        } else {
            let _ = writeln!(out, "- {} ({})", strategy.text, strategy.rationale);
        }
    }
    out.trim_end().to_string()
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Finding, Strategy, Task};

    #[test]
    fn test_empty_state_still_renders() {
        let summary = render_summary(&SessionState::new("s", "10.0.0.1"));
        assert!(summary.contains("AdaptiveFuzz Status"));
        assert!(summary.contains("Next Possible Strategies"));
        assert!(summary.contains("(none yet)"));
    }

    #[test]
    fn test_sections_for_tasks_findings_strategies() {
        let mut state = SessionState::new("s", "8.8.8.8");
        let mut ok = Task::pending("t1", "check reachability");
        ok.status = TaskStatus::Completed;
        let mut bad = Task::pending("t2", "grab banner");
        bad.status = TaskStatus::Failed;
        bad.result = Some("connection refused\ntrace".into());
        state.completed_tasks = vec![ok, bad];
        state.pending_tasks = vec![Task::pending("t3", "enumerate dirs")];
        state.findings = vec![Finding::new("Port 80 open on 8.8.8.8")];
        state.strategies = vec![Strategy {
            text: "Enumerate HTTP".into(),
            rationale: String::new(),
        }];

        let summary = render_summary(&state);
        assert!(summary.contains("- [t1] check reachability (completed)"));
        assert!(summary.contains("(failed: connection refused)"));
        assert!(summary.contains("- [t3] enumerate dirs (pending)"));
        assert!(summary.contains("Port 80 open"));
        assert!(summary.contains("- Enumerate HTTP"));
        assert!(!summary.contains("(none yet)"));
    }

    #[test]
    fn test_flagged_request_hides_its_pending_tasks() {
        let mut state = SessionState::new("s", "8.8.8.8");
        state.pending_tasks = vec![Task::pending("t1", "wipe the target disk")];
        state.is_inappropriate = true;

        let summary = render_summary(&state);
        assert!(summary.contains("flagged as inappropriate"));
        assert!(!summary.contains("Pending Tasks"));
        assert!(!summary.contains("wipe the target disk"));
    }
}
