//! Marker tallies over a batch of records.

use monitor_core::models::EventRecord;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One tracked counter: a label, the symbol it looks for and, optionally, a
/// phrase that must also be present.
#[derive(Debug, Clone, Copy)]
pub struct CounterRule {
    pub label: &'static str,
    pub symbol: &'static str,
    pub requires: Option<&'static str>,
}

const fn rule(label: &'static str, symbol: &'static str) -> CounterRule {
    CounterRule {
        label,
        symbol,
        requires: None,
    }
}

/// Counters in display order.
pub const COUNTER_RULES: &[CounterRule] = &[
    rule("tools", "🔧"),
    rule("reads", "📖"),
    rule("searches", "🔍"),
    rule("fetches", "🌐"),
    rule("mcp", "🔌"),
    rule("skills", "⚡"),
    rule("agents", "🚀"),
    rule("subagents", "🤖"),
    rule("landed", "🛬"),
    rule("finished", "🏁"),
    rule("plans", "📐"),
    // 📋 alone also marks todo completions; only creations count here.
    CounterRule {
        label: "tasks",
        symbol: "📋",
        requires: Some("📋 Task created"),
    },
    rule("sessions", "🟢"),
    rule("ended", "🔴"),
    rule("input", "👋"),
    rule("permission", "🔐"),
    rule("questions", "❓"),
    rule("completed", "✅"),
    rule("compacts", "⚠️"),
];

/// Label → count, in [`COUNTER_RULES`] order. Every label is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCounts {
    counts: Vec<(&'static str, u64)>,
}

impl EventCounts {
    /// All labels at zero.
    pub fn zeroed() -> Self {
        Self {
            counts: COUNTER_RULES.iter().map(|r| (r.label, 0)).collect(),
        }
    }

    /// Count for `label`, or `0` for an unknown label.
    pub fn get(&self, label: &str) -> u64 {
        self.counts
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Sum over every label. A record matching two labels counts twice.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, c)| c).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counts.iter().copied()
    }
}

/// Serializes as a `{label: count}` object in rule order.
impl Serialize for EventCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (label, count) in &self.counts {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

impl Default for EventCounts {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Tally `records` by marker.
///
/// Membership is not exclusive: a record whose text carries several tracked
/// symbols increments each of their labels.
pub fn count_events<'a, I>(records: I) -> EventCounts
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut counts = EventCounts::zeroed();
    for record in records {
        for (slot, rule) in counts.counts.iter_mut().zip(COUNTER_RULES) {
            let needle = rule.requires.unwrap_or(rule.symbol);
            if record.raw.contains(rule.symbol) && record.raw.contains(needle) {
                slot.1 += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_log_line;

    fn records(lines: &[&str]) -> Vec<EventRecord> {
        lines.iter().map(|l| parse_log_line(l)).collect()
    }

    #[test]
    fn test_empty_batch_all_zero() {
        let c = count_events(&Vec::<EventRecord>::new());
        assert_eq!(c.total(), 0);
        assert_eq!(c.iter().count(), COUNTER_RULES.len());
    }

    #[test]
    fn test_basic_counts() {
        let rs = records(&[
            "09:00 AM │ demo │ main │ 🟢 Session started",
            "09:01 AM │ demo │ main │ 🔧 Bash",
            "09:02 AM │ demo │ main │ 🔧 Edit",
            "09:03 AM │ demo │ main │ 🔴 Session ended",
        ]);
        let c = count_events(&rs);
        assert_eq!(c.get("tools"), 2);
        assert_eq!(c.get("sessions"), 1);
        assert_eq!(c.get("ended"), 1);
        assert_eq!(c.total(), 4);
    }

    #[test]
    fn test_multiple_symbols_count_for_each_label() {
        let rs = records(&["09:00 AM │ demo │ main │ 🚀 Spawned agent 🤖 Explore"]);
        let c = count_events(&rs);
        assert_eq!(c.get("agents"), 1);
        assert_eq!(c.get("subagents"), 1);
        assert_eq!(c.total(), 2);
    }

    #[test]
    fn test_tasks_requires_creation_phrase() {
        let rs = records(&[
            "09:00 AM │ demo │ main │ 📋 Task created: write docs",
            "09:01 AM │ demo │ main │ 📋 Task completed: write docs",
        ]);
        let c = count_events(&rs);
        assert_eq!(c.get("tasks"), 1);
    }

    #[test]
    fn test_serializes_as_label_map() {
        let rs = records(&["09:00 AM │ demo │ main │ 🔧 Bash"]);
        let json = serde_json::to_value(count_events(&rs)).unwrap();
        assert_eq!(json["tools"], 1);
        assert_eq!(json["reads"], 0);
        assert_eq!(json.as_object().unwrap().len(), COUNTER_RULES.len());

        let text = serde_json::to_string(&EventCounts::zeroed()).unwrap();
        assert!(text.starts_with(r#"{"tools":0,"reads":0,"#));
    }

    #[test]
    fn test_unknown_label_is_zero() {
        assert_eq!(EventCounts::default().get("bogus"), 0);
    }
}
