use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::time_utils::TimeRange;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Live dashboard for Claude Code sessions, agents and processes
#[derive(Parser, Debug, Clone)]
#[command(
    name = "claude-dashboard",
    about = "Live dashboard for Claude Code sessions, agents and processes",
    version
)]
pub struct Settings {
    /// Claude data directory (defaults to ~/.claude)
    #[arg(long, env = "CLAUDE_DIR")]
    pub claude_dir: Option<PathBuf>,

    /// Executable name of the monitored tool as reported by ps
    #[arg(long, env = "CLAUDE_DASHBOARD_PROCESS", default_value = "claude")]
    pub process_name: String,

    /// Event log poll interval in milliseconds
    #[arg(long, default_value = "500", value_parser = clap::value_parser!(u64).range(100..=10_000))]
    pub log_poll_ms: u64,

    /// Process table rescan interval in seconds (1-60)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..=60))]
    pub process_interval_secs: u64,

    /// Usage file rescan interval in seconds
    #[arg(long, default_value = "15", value_parser = clap::value_parser!(u64).range(1..=600))]
    pub usage_interval_secs: u64,

    /// Stats cache reload interval in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub stats_interval_secs: u64,

    /// Time range for counts and token totals
    #[arg(long, default_value = "today", value_parser = ["today", "7d", "all"])]
    pub range: String,

    /// Only list events whose line contains this text (case-insensitive)
    #[arg(long)]
    pub filter: Option<String>,

    /// Only list events and count tokens for this project
    #[arg(long)]
    pub project: Option<String>,

    /// Only list events of this type
    #[arg(long, value_parser = [
        "tools", "reads", "searches", "skills", "mcp", "agents",
        "tasks", "sessions", "finished", "permission", "attention",
    ])]
    pub event_type: Option<String>,

    /// Fold consecutive same-type events of a project into one line
    #[arg(long)]
    pub compact: bool,

    /// Number of recent events to list (0 hides the listing)
    #[arg(long, default_value = "20")]
    pub tail: usize,

    /// Refresh once, print a report and exit
    #[arg(long)]
    pub once: bool,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Logging level
    #[arg(long, default_value = "WARNING", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

// ── Derived paths ──────────────────────────────────────────────────────────────

/// Every file location the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPaths {
    pub event_log: PathBuf,
    pub token_stats: PathBuf,
    pub model_stats: PathBuf,
    pub stats_cache: PathBuf,
    pub usage_dir: PathBuf,
    pub token_scan_cache: PathBuf,
}

impl MonitorPaths {
    /// Lay out paths under a Claude directory and a dashboard state directory.
    pub fn new(claude_dir: &std::path::Path, state_dir: &std::path::Path) -> Self {
        Self {
            event_log: claude_dir.join("events.log"),
            token_stats: claude_dir.join("token-stats"),
            model_stats: claude_dir.join("model-stats"),
            stats_cache: claude_dir.join("stats-cache.json"),
            usage_dir: claude_dir.join("projects"),
            token_scan_cache: state_dir.join("cache").join("token-scan.json"),
        }
    }
}

/// `~/.claude-dashboard`, the dashboard's own state directory.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude-dashboard")
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse from the process arguments, applying `--debug`.
    pub fn load() -> Self {
        Self::from_args(std::env::args_os())
    }

    /// Parse from an explicit argument list (first item is the binary name).
    pub fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// The Claude data directory, defaulting to `~/.claude`.
    pub fn claude_dir(&self) -> PathBuf {
        self.claude_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude")
        })
    }

    pub fn paths(&self) -> MonitorPaths {
        MonitorPaths::new(&self.claude_dir(), &state_dir())
    }

    pub fn time_range(&self) -> TimeRange {
        self.range.parse().unwrap_or_default()
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }

    pub fn usage_interval(&self) -> Duration {
        Duration::from_secs(self.usage_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
