//! Event-log line parsing.
//!
//! Lines look like `<timestamp> │ <project> │ <branch> │ <marker> <text>`,
//! optionally wrapped in terminal colour escapes. Shorter lines degrade to
//! `<timestamp> │ <text>` or bare `<text>`; parsing never fails.

use std::sync::OnceLock;

use monitor_core::models::EventRecord;
use regex::Regex;

/// Field delimiter written by the logging hook.
pub const FIELD_DELIMITER: char = '│';

/// Markers in priority order, each with its display style.
pub const MARKER_STYLES: &[(&str, &str)] = &[
    ("👋", "bold #ff87d7"),
    ("🔐", "bold #ff87d7"),
    ("💭", "bold #ff87d7"),
    ("❓", "bold #ff87d7"),
    ("🏁", "bold #00ff00"),
    ("🛬", "bold #00ff00"),
    ("✅", "bold #00ff00"),
    ("⚠️", "bold #d75f5f"),
    ("⚡", "bold #5fafff"),
    ("🔌", "bold #af87ff"),
    ("📐", "bold #2e8b57"),
    ("🚀", "bold #5fd7d7"),
    ("🤖", "bold #5fd7d7"),
    ("👥", "bold #5fd7d7"),
];

/// Markers consulted only when none of [`MARKER_STYLES`] is present.
pub const FALLBACK_MARKERS: &[&str] = &["🔧", "📖", "🔍", "📋", "🟢", "🔴", "📐"];

/// Literal that outranks every marker when choosing a style.
const PLAN_TASK_LITERAL: &str = "Task (Plan)";
const PLAN_TASK_STYLE: &str = "bold #00875f";

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("regex is valid"))
}

/// Remove SGR colour escapes.
pub fn strip_ansi(text: &str) -> String {
    ansi_re().replace_all(text, "").into_owned()
}

/// Style for an already-cleaned line, or `""` when nothing matches.
pub fn style_for_line(clean: &str) -> &'static str {
    if clean.contains(PLAN_TASK_LITERAL) {
        return PLAN_TASK_STYLE;
    }
    MARKER_STYLES
        .iter()
        .find(|(marker, _)| clean.contains(marker))
        .map(|(_, style)| *style)
        .unwrap_or("")
}

/// First known marker in an event body, or `""`.
pub fn detect_marker(event: &str) -> &'static str {
    MARKER_STYLES
        .iter()
        .map(|(marker, _)| *marker)
        .find(|m| event.contains(m))
        .or_else(|| FALLBACK_MARKERS.iter().copied().find(|m| event.contains(m)))
        .unwrap_or("")
}

/// Parse one raw log line into an [`EventRecord`].
pub fn parse_log_line(raw_line: &str) -> EventRecord {
    let clean = strip_ansi(raw_line);
    let style = style_for_line(&clean);

    let parts: Vec<&str> = clean.split(FIELD_DELIMITER).collect();
    let delimiter = FIELD_DELIMITER.to_string();
    let rejoin = |from: usize| parts[from..].join(delimiter.as_str());

    let (timestamp, project, branch, event) = match parts.len() {
        n if n >= 4 => (
            parts[0].trim().to_string(),
            parts[1].trim().to_string(),
            parts[2].trim().to_string(),
            rejoin(3).trim().to_string(),
        ),
        2 | 3 => (
            parts[0].trim().to_string(),
            String::new(),
            String::new(),
            rejoin(1).trim().to_string(),
        ),
        _ => (String::new(), String::new(), String::new(), clean.trim().to_string()),
    };

    let marker = detect_marker(&event).to_string();

    EventRecord {
        raw: clean,
        timestamp,
        project,
        branch,
        event,
        marker,
        style: style.to_string(),
    }
}

// ── Compaction ────────────────────────────────────────────────────────────────

/// A run of consecutive records sharing marker and project.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactGroup<'a> {
    /// First record of the run.
    pub sample: &'a EventRecord,
    pub count: usize,
}

/// Collapse consecutive records with the same non-empty marker and project.
///
/// Records without a marker are never merged.
pub fn compact_records<'a, I>(records: I) -> Vec<CompactGroup<'a>>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut groups: Vec<CompactGroup<'a>> = Vec::new();
    for record in records {
        if let Some(last) = groups.last_mut() {
            if !record.marker.is_empty()
                && last.sample.marker == record.marker
                && last.sample.project == record.project
            {
                last.count += 1;
                continue;
            }
        }
        groups.push(CompactGroup {
            sample: record,
            count: 1,
        });
    }
    groups
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_four_segments() {
        let r = parse_log_line("09:00 AM │ demo │ main │ 🟢 Session started [claude-opus-4-6]");
        assert_eq!(r.timestamp, "09:00 AM");
        assert_eq!(r.project, "demo");
        assert_eq!(r.branch, "main");
        assert_eq!(r.event, "🟢 Session started [claude-opus-4-6]");
        assert_eq!(r.marker, "🟢");
        assert_eq!(r.style, "");
    }

    #[test]
    fn test_parse_strips_ansi_everywhere() {
        let raw = "\x1b[2m09:00 AM\x1b[0m │ \x1b[36mdemo\x1b[0m │ main │ \x1b[1;32m🏁 Finished responding\x1b[0m";
        let r = parse_log_line(raw);
        assert_eq!(r.timestamp, "09:00 AM");
        assert_eq!(r.project, "demo");
        assert_eq!(r.event, "🏁 Finished responding");
        assert!(!r.raw.contains('\x1b'));
        assert_eq!(r.style, "bold #00ff00");
    }

    #[test]
    fn test_parse_extra_delimiters_stay_in_body() {
        let r = parse_log_line("09:00 AM │ demo │ main │ 🔧 Bash: echo a │ b");
        assert_eq!(r.event, "🔧 Bash: echo a │ b");
    }

    #[test]
    fn test_parse_two_segments() {
        let r = parse_log_line("09:00 AM │ 📖 Read notes.md");
        assert_eq!(r.timestamp, "09:00 AM");
        assert_eq!(r.project, "");
        assert_eq!(r.branch, "");
        assert_eq!(r.event, "📖 Read notes.md");
        assert_eq!(r.marker, "📖");
    }

    #[test]
    fn test_parse_three_segments_degrade_to_two() {
        let r = parse_log_line("09:00 AM │ demo │ 🔍 Grep foo");
        assert_eq!(r.timestamp, "09:00 AM");
        assert_eq!(r.project, "");
        assert_eq!(r.event, "demo │ 🔍 Grep foo");
    }

    #[test]
    fn test_parse_single_segment() {
        let r = parse_log_line("   just some text  ");
        assert_eq!(r.timestamp, "");
        assert_eq!(r.event, "just some text");
        assert_eq!(r.marker, "");
    }

    #[test]
    fn test_marker_priority_primary_before_fallback() {
        // 🔧 is a fallback marker, 🚀 is primary.
        assert_eq!(detect_marker("🔧 Task 🚀 Spawned agent"), "🚀");
        assert_eq!(detect_marker("🔧 Bash"), "🔧");
        assert_eq!(detect_marker("plain"), "");
    }

    #[test]
    fn test_marker_priority_follows_table_order() {
        // 👋 precedes 🏁 in the primary table.
        assert_eq!(detect_marker("🏁 done 👋 waiting"), "👋");
    }

    #[test]
    fn test_plan_literal_outranks_markers() {
        assert_eq!(style_for_line("🚀 Spawned agent Task (Plan)"), PLAN_TASK_STYLE);
        assert_eq!(style_for_line("🚀 Spawned agent Explore"), "bold #5fd7d7");
    }

    #[test]
    fn test_compact_records_groups_runs() {
        let lines = [
            "09:00 AM │ a │ main │ 🔧 Bash",
            "09:01 AM │ a │ main │ 🔧 Edit",
            "09:02 AM │ b │ main │ 🔧 Bash",
            "09:03 AM │ b │ main │ plain",
            "09:04 AM │ b │ main │ plain",
        ];
        let records: Vec<EventRecord> = lines.iter().map(|l| parse_log_line(l)).collect();
        let groups = compact_records(&records);
        let counts: Vec<usize> = groups.iter().map(|g| g.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 1]);
        assert_eq!(groups[0].sample.event, "🔧 Bash");
    }
}
