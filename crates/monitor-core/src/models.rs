use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event-type labels accepted by the record filter, mapped to the marker
/// that identifies them in an event body.
pub const EVENT_TYPE_MARKERS: &[(&str, &str)] = &[
    ("tools", "🔧"),
    ("reads", "📖"),
    ("searches", "🔍"),
    ("skills", "⚡"),
    ("mcp", "🔌"),
    ("agents", "🚀"),
    ("tasks", "📋"),
    ("sessions", "🟢"),
    ("finished", "🏁"),
    ("permission", "🔐"),
    ("attention", "👋"),
];

/// Look up the marker for an event-type filter label.
pub fn event_type_marker(label: &str) -> Option<&'static str> {
    EVENT_TYPE_MARKERS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, marker)| *marker)
}

/// One parsed line of the event log. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The line with terminal escape sequences removed.
    pub raw: String,
    /// Clock string as written by the hook, e.g. `"02/14 09:05 AM"`.
    pub timestamp: String,
    pub project: String,
    pub branch: String,
    /// Free-text body, normally starting with a marker symbol.
    pub event: String,
    /// First known marker found in `event`, or empty.
    pub marker: String,
    /// Display style tag, or empty.
    pub style: String,
}

impl EventRecord {
    /// `true` when the record passes every non-empty filter.
    ///
    /// * `text` – case-insensitive substring of the raw line.
    /// * `project` – exact project name.
    /// * `event_type` – a label from [`EVENT_TYPE_MARKERS`]; unknown labels
    ///   do not filter anything out.
    pub fn matches_filter(&self, text: &str, project: &str, event_type: &str) -> bool {
        if !text.is_empty() && !self.raw.to_lowercase().contains(&text.to_lowercase()) {
            return false;
        }
        if !project.is_empty() && self.project != project {
            return false;
        }
        if !event_type.is_empty() {
            if let Some(marker) = event_type_marker(event_type) {
                if !self.event.contains(marker) {
                    return false;
                }
            }
        }
        true
    }
}

/// A sub-agent spawned within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    /// Type label such as `"Explore"` or `"Plan"`; `"Agent"` when the log
    /// line carries none.
    pub agent_type: String,
    pub agent_id: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration_minutes: f64,
    pub is_running: bool,
    /// Always empty: agents are attached flat to their session.
    #[serde(default)]
    pub children: Vec<AgentNode>,
}

impl AgentNode {
    pub fn new(agent_type: impl Into<String>, agent_id: impl Into<String>, start_time: &str) -> Self {
        Self {
            agent_type: agent_type.into(),
            agent_id: agent_id.into(),
            start_time: start_time.to_string(),
            end_time: None,
            duration_minutes: 0.0,
            is_running: true,
            children: Vec::new(),
        }
    }
}

/// One run of the monitored tool for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNode {
    pub project: String,
    pub start_time: String,
    /// Model id taken from the bracketed token of the start line.
    #[serde(default)]
    pub model: Option<String>,
    /// `true` when no end marker was seen before the end of the stream.
    pub is_active: bool,
    pub last_event_time: String,
    /// Agents in spawn order.
    #[serde(default)]
    pub agents: Vec<AgentNode>,
}

impl SessionNode {
    pub fn new(project: &str, start_time: &str, model: Option<String>) -> Self {
        Self {
            project: project.to_string(),
            start_time: start_time.to_string(),
            model,
            is_active: false,
            last_event_time: start_time.to_string(),
            agents: Vec::new(),
        }
    }

    /// Agents that have not finished or expired.
    pub fn running_agents(&self) -> impl Iterator<Item = &AgentNode> {
        self.agents.iter().filter(|a| a.is_running)
    }
}

/// A running process of the monitored executable, as seen by one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub pid: u32,
    pub tty: String,
    pub cpu_percent: f64,
    /// Resident memory in MB, one decimal place.
    pub mem_mb: f64,
    /// Elapsed time exactly as reported by `ps`.
    pub uptime_raw: String,
    pub uptime_display: String,
    /// Empty when the working directory could not be resolved.
    pub cwd: String,
    pub project_name: String,
    pub is_active: bool,
    /// Version of the embedded runtime child, e.g. `"2.1.39"`.
    #[serde(default)]
    pub runtime_version: Option<String>,
    /// Number of MCP bridge children.
    #[serde(default)]
    pub mcp_server_count: u32,
    #[serde(default)]
    pub has_shell: bool,
    /// Command running inside the shell child, shortened for display.
    #[serde(default)]
    pub shell_command: Option<String>,
    #[serde(default)]
    pub has_keep_awake: bool,
}

/// Token counters for one (file, date, model) or any re-keyed aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
    /// Sum of the four counters, kept in step by [`TokenBucket::add_usage`].
    #[serde(default)]
    pub total: u64,
}

impl TokenBucket {
    /// Accumulate one usage record.
    pub fn add_usage(&mut self, input: u64, output: u64, cache_read: u64, cache_write: u64) {
        self.input += input;
        self.output += output;
        self.cache_read += cache_read;
        self.cache_write += cache_write;
        self.total += input + output + cache_read + cache_write;
    }

    /// Accumulate another bucket.
    pub fn merge(&mut self, other: &TokenBucket) {
        self.add_usage(other.input, other.output, other.cache_read, other.cache_write);
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Date (`YYYY-MM-DD`) → model id → bucket.
pub type DailyModelTokens = BTreeMap<String, BTreeMap<String, TokenBucket>>;

/// Cached parse result of one usage file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileScanRecord {
    pub project: String,
    #[serde(default)]
    pub dates: DailyModelTokens,
}
