//! Discovery of running monitored-tool processes.
//!
//! Each [`ProcessScanner::scan`] rebuilds the instance list from scratch out
//! of four queries issued through a [`ProcessSource`]: the process table,
//! working directories, the parent/child table and full argument strings.
//! Only the first query is authoritative; when it fails the previous list is
//! kept.

use std::collections::HashMap;
use std::sync::OnceLock;

use monitor_core::formatting::truncate_display;
use monitor_core::models::ProcessInstance;
use monitor_core::project::ProjectNameResolver;
use monitor_core::time_utils::format_uptime;
use regex::Regex;
use tracing::debug;

use crate::process_source::ProcessSource;

/// CPU percentage above which an instance counts as active.
pub const ACTIVE_CPU_THRESHOLD: f64 = 1.0;

/// Display width for a resolved shell command.
pub const SHELL_COMMAND_WIDTH: usize = 25;

const SHELL_NAMES: &[&str] = &["zsh", "bash", "sh"];
const MCP_BRIDGE: &str = "npm";
const KEEP_AWAKE: &str = "caffeinate";
const DEFUNCT: &str = "<defunct>";
const RUNTIME_MARKER: &str = "versions/";

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"versions/(\d+(?:\.\d+)+)").expect("regex is valid"))
}

// ── Table parsing ─────────────────────────────────────────────────────────────

/// One matching row of the `pid tty pcpu rss etime comm` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRow {
    pub pid: u32,
    pub tty: String,
    pub cpu_percent: f64,
    pub rss_kb: u64,
    pub etime: String,
}

/// Rows whose command name equals `process_name`. The header and malformed
/// rows are skipped.
pub fn parse_process_table(table: &str, process_name: &str) -> Vec<ProcessRow> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 || parts.last() != Some(&process_name) {
                return None;
            }
            Some(ProcessRow {
                pid: parts[0].parse().ok()?,
                tty: parts[1].to_string(),
                cpu_percent: parts[2].parse().ok()?,
                rss_kb: parts[3].parse().ok()?,
                etime: parts[4].to_string(),
            })
        })
        .collect()
}

/// Parent pid → `(child pid, command name)` from a `pid ppid comm` table.
pub fn parse_parent_table(table: &str) -> HashMap<u32, Vec<(u32, String)>> {
    let mut children: HashMap<u32, Vec<(u32, String)>> = HashMap::new();
    for line in table.lines().skip(1) {
        let mut parts = line.split_whitespace();
        let (Some(pid), Some(ppid)) = (parts.next(), parts.next()) else {
            continue;
        };
        let comm = parts.collect::<Vec<_>>().join(" ");
        if comm.is_empty() {
            continue;
        }
        if let (Ok(pid), Ok(ppid)) = (pid.parse(), ppid.parse()) {
            children.entry(ppid).or_default().push((pid, comm));
        }
    }
    children
}

/// Pid → full argument string from a `pid args` table.
pub fn parse_args_table(table: &str) -> HashMap<u32, String> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (pid, args) = line.trim().split_once(char::is_whitespace)?;
            let args = args.trim();
            if args.is_empty() {
                return None;
            }
            Some((pid.parse().ok()?, args.to_string()))
        })
        .collect()
}

// ── Child classification ──────────────────────────────────────────────────────

/// What the immediate children of one instance say about it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildSummary {
    pub runtime_version: Option<String>,
    pub mcp_server_count: u32,
    pub shell_pids: Vec<u32>,
    pub has_keep_awake: bool,
}

fn basename(command: &str) -> &str {
    command.rsplit('/').next().unwrap_or(command)
}

fn is_shell(command: &str) -> bool {
    SHELL_NAMES.contains(&basename(command))
}

/// Classify immediate children by command name.
pub fn classify_children(children: &[(u32, String)]) -> ChildSummary {
    let mut summary = ChildSummary::default();
    for (pid, command) in children {
        if command == DEFUNCT {
            continue;
        }
        if command.contains(RUNTIME_MARKER) {
            if let Some(caps) = version_re().captures(command) {
                summary.runtime_version = Some(caps[1].to_string());
            }
        } else if command == MCP_BRIDGE {
            summary.mcp_server_count += 1;
        } else if is_shell(command) {
            summary.shell_pids.push(*pid);
        } else if command == KEEP_AWAKE {
            summary.has_keep_awake = true;
        }
    }
    summary
}

/// Replace every path-like argument with its last component.
fn shorten_paths(args: &str) -> String {
    args.split_whitespace()
        .map(|part| {
            if part.contains('/') {
                match basename(part) {
                    "" => part,
                    base => base,
                }
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-shell command running under any of `shell_pids`.
pub fn resolve_shell_command(
    shell_pids: &[u32],
    all_children: &HashMap<u32, Vec<(u32, String)>>,
    args: &HashMap<u32, String>,
) -> Option<String> {
    shell_pids
        .iter()
        .filter_map(|pid| all_children.get(pid))
        .flatten()
        .find(|(_, command)| command != DEFUNCT && !is_shell(command))
        .map(|(pid, command)| match args.get(pid) {
            Some(full) => truncate_display(&shorten_paths(full), SHELL_COMMAND_WIDTH),
            None => basename(command).to_string(),
        })
}

/// Active first, then CPU descending, then project name case-insensitively,
/// then pid.
pub fn sort_instances(instances: &mut [ProcessInstance]) {
    instances.sort_by(|a, b| {
        b.is_active
            .cmp(&a.is_active)
            .then_with(|| b.cpu_percent.total_cmp(&a.cpu_percent))
            .then_with(|| {
                a.project_name
                    .to_lowercase()
                    .cmp(&b.project_name.to_lowercase())
            })
            .then_with(|| a.pid.cmp(&b.pid))
    });
}

// ── ProcessScanner ────────────────────────────────────────────────────────────

/// Owns the latest instance list and the scan generation counter.
pub struct ProcessScanner<S> {
    source: S,
    process_name: String,
    resolver: ProjectNameResolver,
    instances: Vec<ProcessInstance>,
    generation: u64,
}

impl<S: ProcessSource> ProcessScanner<S> {
    pub fn new(source: S, process_name: impl Into<String>) -> Self {
        Self {
            source,
            process_name: process_name.into(),
            resolver: ProjectNameResolver::new(),
            instances: Vec::new(),
            generation: 0,
        }
    }

    /// Rescan. Returns the instance list and the new generation.
    pub async fn scan(&mut self) -> (&[ProcessInstance], u64) {
        self.generation += 1;

        let Some(table) = self.source.process_table().await else {
            debug!(generation = self.generation, "process table unavailable; keeping previous instances");
            return (&self.instances, self.generation);
        };

        let rows = parse_process_table(&table, &self.process_name);
        if rows.is_empty() {
            self.instances.clear();
            return (&self.instances, self.generation);
        }

        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        let cwds = self.source.working_dirs(&pids).await;
        let all_children = self
            .source
            .parent_table()
            .await
            .map(|t| parse_parent_table(&t))
            .unwrap_or_default();
        let args = self
            .source
            .args_table()
            .await
            .map(|t| parse_args_table(&t))
            .unwrap_or_default();

        let mut instances: Vec<ProcessInstance> = rows
            .into_iter()
            .map(|row| self.build_instance(row, &cwds, &all_children, &args))
            .collect();
        sort_instances(&mut instances);

        debug!(
            generation = self.generation,
            instances = instances.len(),
            "process scan complete"
        );
        self.instances = instances;
        (&self.instances, self.generation)
    }

    fn build_instance(
        &mut self,
        row: ProcessRow,
        cwds: &HashMap<u32, String>,
        all_children: &HashMap<u32, Vec<(u32, String)>>,
        args: &HashMap<u32, String>,
    ) -> ProcessInstance {
        let cwd = cwds.get(&row.pid).cloned().unwrap_or_default();
        let project_name = self.resolver.resolve(&cwd);
        let children = all_children
            .get(&row.pid)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let summary = classify_children(children);
        let shell_command = resolve_shell_command(&summary.shell_pids, all_children, args);
        let mem_mb = (row.rss_kb as f64 / 1024.0 * 10.0).round() / 10.0;

        ProcessInstance {
            pid: row.pid,
            tty: row.tty,
            cpu_percent: row.cpu_percent,
            mem_mb,
            uptime_display: format_uptime(&row.etime),
            uptime_raw: row.etime,
            cwd,
            project_name,
            is_active: row.cpu_percent > ACTIVE_CPU_THRESHOLD || summary.has_keep_awake,
            runtime_version: summary.runtime_version,
            mcp_server_count: summary.mcp_server_count,
            has_shell: !summary.shell_pids.is_empty(),
            shell_command,
            has_keep_awake: summary.has_keep_awake,
        }
    }

    pub fn instances(&self) -> &[ProcessInstance] {
        &self.instances
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_active).count()
    }

    /// Sum of resident memory across instances, in MB.
    pub fn total_mem_mb(&self) -> f64 {
        self.instances.iter().map(|i| i.mem_mb).sum()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
