//! Plain-text rendering of a [`DashboardSnapshot`].

use std::fmt::Write;

use monitor_core::formatting::{format_memory, format_model_name, format_tokens};
use monitor_data::log_view::EventLine;
use monitor_runtime::orchestrator::DashboardSnapshot;

/// Counters shown in the one-line activity summary.
const SUMMARY_LABELS: &[&str] = &["sessions", "tools", "reads", "agents", "finished", "compacts"];

const SESSION_RULE_WIDTH: usize = 60;

/// Full multi-section report, as printed by `--once`.
pub fn render_report(snap: &DashboardSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Claude dashboard  {}  range: {}  records: {}",
        snap.generated_at, snap.range, snap.record_count
    );

    let _ = writeln!(out, "\nActivity");
    let _ = writeln!(out, "  {}", activity_line(snap));

    if !snap.events.is_empty() {
        let _ = writeln!(out, "\nEvents");
        out.push_str(&render_events(&snap.events));
    }

    let _ = writeln!(
        out,
        "\nInstances ({} active, {} projects, {} total)",
        snap.active_instances,
        snap.project_instances.len(),
        format_memory(snap.total_mem_mb)
    );
    if snap.instances.is_empty() {
        let _ = writeln!(out, "  none detected");
    }
    for view in &snap.instances {
        let inst = &view.instance;
        let status = if inst.is_active { "active" } else { "idle" };
        let _ = write!(
            out,
            "  {:<20} pid {:<7} {:>5.1}% {:>7} up {:<7} {}",
            inst.project_name,
            inst.pid,
            inst.cpu_percent,
            format_memory(inst.mem_mb),
            inst.uptime_display,
            status
        );
        if let Some(model) = &view.session_model {
            let _ = write!(out, "  [{}]", format_model_name(model));
        }
        if let Some(version) = &inst.runtime_version {
            let _ = write!(out, "  v{version}");
        }
        if inst.mcp_server_count > 0 {
            let _ = write!(out, "  mcp:{}", inst.mcp_server_count);
        }
        let _ = writeln!(out);
        if let Some(cmd) = &inst.shell_command {
            let _ = writeln!(out, "      $ {cmd}");
        }
        for agent in &view.running_agents {
            let _ = writeln!(out, "      > {} ({})", agent.agent_type, agent.agent_id);
        }
    }

    let _ = writeln!(out, "\nSessions ({} active)", snap.active_sessions);
    for session in snap.sessions.iter().rev().take(10) {
        let state = if session.is_active { "open" } else { "closed" };
        let model = session
            .model
            .as_deref()
            .map(format_model_name)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<20} {:<8} {:<10} {:<6} agents: {}",
            session.project,
            session.start_time,
            model,
            state,
            session.agents.len()
        );
    }

    let _ = writeln!(
        out,
        "\nTokens ({}): {} total, {} in, {} out, {} cache read, {} cache write",
        snap.range,
        format_tokens(snap.token_totals.total),
        format_tokens(snap.token_totals.input),
        format_tokens(snap.token_totals.output),
        format_tokens(snap.token_totals.cache_read),
        format_tokens(snap.token_totals.cache_write),
    );
    for (model, bucket) in &snap.tokens_by_model {
        let _ = writeln!(
            out,
            "  {:<20} {}",
            format_model_name(model),
            format_tokens(bucket.total)
        );
    }
    let mut projects: Vec<_> = snap.tokens_by_project.iter().collect();
    projects.sort_by(|a, b| b.1.total.cmp(&a.1.total));
    for (project, bucket) in projects.into_iter().take(10) {
        let _ = writeln!(out, "  {:<20} {}", project, format_tokens(bucket.total));
    }

    if !snap.daily_usage.is_empty() {
        let _ = writeln!(out, "\nDaily usage");
        for day in &snap.daily_usage {
            let models = day
                .by_model
                .iter()
                .filter(|(_, total)| **total > 0)
                .map(|(model, total)| format!("{} {}", format_model_name(model), format_tokens(*total)))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "  {}  {:>7}  msgs {:>5}  sessions {:>3}  {}",
                day.date,
                format_tokens(day.total),
                count_or_dash(day.messages),
                count_or_dash(day.sessions),
                models
            );
        }
    }

    if snap.stats.total_sessions > 0 || snap.stats.total_messages > 0 {
        let _ = writeln!(
            out,
            "\nAll time: {} sessions, {} messages",
            snap.stats.total_sessions, snap.stats.total_messages
        );
    }
    out
}

/// Single line used between live snapshots.
pub fn render_compact(snap: &DashboardSnapshot) -> String {
    format!(
        "[{}] {} | instances {}/{} in {} projects | sessions {} | tokens {}",
        snap.range,
        activity_line(snap),
        snap.active_instances,
        snap.instances.len(),
        snap.project_instances.len(),
        snap.active_sessions,
        format_tokens(snap.token_totals.total)
    )
}

/// Indented event lines, with a rule before each session start that does
/// not open the block.
pub fn render_events(lines: &[EventLine]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 && line.is_session_start() {
            let _ = writeln!(out, "  {}", "─".repeat(SESSION_RULE_WIDTH));
        }
        let _ = writeln!(out, "  {}", format_event_line(line));
    }
    out
}

/// `timestamp │ project │ branch │ event`, or `marker base (xN)` for a
/// compacted run.
pub fn format_event_line(line: &EventLine) -> String {
    let mut out = line.timestamp.clone();
    if !line.project.is_empty() {
        let branch = if line.branch.is_empty() { "-" } else { line.branch.as_str() };
        let _ = write!(out, " │ {} │ {}", line.project, branch);
    }
    out.push_str(" │ ");
    if line.count > 1 {
        let stripped = line.event.replace(&line.marker, "");
        let base = stripped.split(':').next().unwrap_or_default().trim();
        let _ = write!(out, "{} {} (x{})", line.marker, base, line.count);
    } else {
        out.push_str(&display_event(&line.event));
    }
    out
}

fn display_event(event: &str) -> String {
    let event = event
        .replace("📋 Task created", "📋 Todo created")
        .replace("📋 Task completed", "📋 Todo completed");
    shorten_model_tag(&event)
}

/// `[claude-opus-4-6]` becomes `[Opus 4.6]`.
fn shorten_model_tag(event: &str) -> String {
    let Some(start) = event.find("[claude-") else {
        return event.to_string();
    };
    let Some(len) = event[start..].find(']') else {
        return event.to_string();
    };
    let model = &event[start + 1..start + len];
    format!(
        "{}[{}]{}",
        &event[..start],
        format_model_name(model),
        &event[start + len + 1..]
    )
}

fn count_or_dash(n: u64) -> String {
    if n == 0 {
        "-".to_string()
    } else {
        n.to_string()
    }
}

fn activity_line(snap: &DashboardSnapshot) -> String {
    SUMMARY_LABELS
        .iter()
        .map(|label| format!("{label} {}", snap.event_counts.get(label)))
        .collect::<Vec<_>>()
        .join("  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::models::{ProcessInstance, SessionNode, TokenBucket};
    use monitor_data::counter::EventCounts;
    use monitor_data::stats_files::StatsCache;
    use monitor_runtime::correlation::InstanceView;
    use monitor_runtime::orchestrator::DailyUsage;
    use std::collections::BTreeMap;

    fn event(seq: usize, event: &str, marker: &str, count: usize) -> EventLine {
        EventLine {
            seq,
            timestamp: "09:00 AM".to_string(),
            project: "demo".to_string(),
            branch: String::new(),
            event: event.to_string(),
            marker: marker.to_string(),
            count,
        }
    }

    fn instance(pid: u32, cpu: f64) -> InstanceView {
        InstanceView {
            instance: ProcessInstance {
                pid,
                project_name: "demo".to_string(),
                cpu_percent: cpu,
                mem_mb: 128.0,
                uptime_display: "7m".to_string(),
                is_active: cpu > 1.0,
                shell_command: Some("cargo test".to_string()),
                ..Default::default()
            },
            session_model: Some("claude-opus-4-6".to_string()),
            running_agents: Vec::new(),
        }
    }

    fn snapshot() -> DashboardSnapshot {
        let mut session = SessionNode::new("demo", "09:00 AM", Some("claude-opus-4-6".to_string()));
        session.is_active = true;
        let mut totals = TokenBucket::default();
        totals.add_usage(1_500, 500, 0, 0);
        DashboardSnapshot {
            generated_at: "2026-03-10T09:05:00+00:00".to_string(),
            range: "today".to_string(),
            record_count: 3,
            projects: vec!["demo".to_string()],
            event_counts: EventCounts::zeroed(),
            events: vec![
                event(0, "🟢 Session started [claude-opus-4-6]", "🟢", 1),
                event(3, "🔧 Bash: cargo test", "🔧", 3),
                event(4, "🟢 Session started", "🟢", 1),
            ],
            sessions: vec![session],
            active_sessions: 1,
            instances: vec![instance(42, 5.0), instance(43, 0.2)],
            project_instances: vec![instance(42, 5.0)],
            active_instances: 1,
            total_mem_mb: 256.0,
            generation: 4,
            token_totals: totals,
            tokens_by_model: BTreeMap::from([("claude-opus-4-6".to_string(), totals)]),
            tokens_by_project: BTreeMap::from([("demo".to_string(), totals)]),
            daily_usage: vec![DailyUsage {
                date: "2026-03-10".to_string(),
                by_model: BTreeMap::from([("claude-opus-4-6".to_string(), 2_000)]),
                total: 2_000,
                messages: 12,
                sessions: 0,
            }],
            token_stats: None,
            model_stats: Vec::new(),
            stats: StatsCache::default(),
        }
    }

    #[test]
    fn test_render_report_sections() {
        let text = render_report(&snapshot());
        assert!(text.contains("Instances (1 active, 1 projects, 256MB total)"));
        assert!(text.contains("pid 42"));
        assert!(text.contains("pid 43"));
        assert!(text.contains("[Opus 4.6]"));
        assert!(text.contains("$ cargo test"));
        assert!(text.contains("Sessions (1 active)"));
        assert!(text.contains("2K total"));
        assert!(text.contains("2026-03-10"));
        assert!(text.contains("Opus 4.6 2K"));
        assert!(!text.contains("All time"));
    }

    #[test]
    fn test_event_lines_format() {
        let start = event(0, "🟢 Session started [claude-opus-4-6]", "🟢", 1);
        assert_eq!(
            format_event_line(&start),
            "09:00 AM │ demo │ - │ 🟢 Session started [Opus 4.6]"
        );

        let run = event(3, "🔧 Bash: cargo test", "🔧", 3);
        assert_eq!(format_event_line(&run), "09:00 AM │ demo │ - │ 🔧 Bash (x3)");

        let mut todo = event(5, "📋 Task created: docs", "📋", 1);
        todo.project.clear();
        assert_eq!(format_event_line(&todo), "09:00 AM │ 📋 Todo created: docs");
    }

    #[test]
    fn test_render_events_rules_between_sessions() {
        let text = render_events(&snapshot().events);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("Session started"));
        assert!(lines[2].trim().starts_with('─'));
    }

    #[test]
    fn test_render_compact_is_one_line() {
        let line = render_compact(&snapshot());
        assert!(!line.contains('\n'));
        assert!(line.starts_with("[today]"));
        assert!(line.contains("instances 1/2 in 1 projects"));
    }
}
