//! Where process-table text comes from.
//!
//! [`ProcessScanner`](crate::process_scanner::ProcessScanner) only parses;
//! the queries themselves go through a [`ProcessSource`]. The production
//! source shells out to `ps` and `lsof` with a bounded timeout. Tests use
//! [`FakeProcessSource`], whose tables are set by hand.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use monitor_core::error::{MonitorError, Result};
use tokio::process::Command;
use tracing::debug;

/// Upper bound for any single external query.
pub const CMD_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw process-table queries.
///
/// Each method returns `None` (or an empty map) when the query failed,
/// timed out or exited non-zero. Tables include their header line.
pub trait ProcessSource: Send + Sync {
    /// `pid tty pcpu rss etime comm` for every process.
    fn process_table(&self) -> impl Future<Output = Option<String>> + Send;

    /// Working directory per pid for the given pids.
    fn working_dirs(&self, pids: &[u32]) -> impl Future<Output = HashMap<u32, String>> + Send;

    /// `pid ppid comm` for every process.
    fn parent_table(&self) -> impl Future<Output = Option<String>> + Send;

    /// `pid args` for every process.
    fn args_table(&self) -> impl Future<Output = Option<String>> + Send;
}

// ── System source ─────────────────────────────────────────────────────────────

/// Queries the live system with `ps` and `lsof`.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessSource {
    timeout: Option<Duration>,
}

impl SystemProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(CMD_TIMEOUT)
    }

    /// Run a command with the timeout, returning stdout on success.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.run_raw(program, args).await?;
        if !output.status.success() {
            return Err(MonitorError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_raw(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        match tokio::time::timeout(self.timeout(), cmd.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(MonitorError::CommandTimeout {
                program: program.to_string(),
                secs: self.timeout().as_secs(),
            }),
        }
    }

    /// Stdout of a command, or `None` when it failed or timed out.
    async fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        match self.run(program, args).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, program, "process query failed");
                None
            }
        }
    }

    async fn table(&self, format: &str) -> Option<String> {
        self.query("ps", &["-eo", format]).await
    }
}

impl ProcessSource for SystemProcessSource {
    async fn process_table(&self) -> Option<String> {
        self.table("pid,tty,pcpu,rss,etime,comm").await
    }

    async fn working_dirs(&self, pids: &[u32]) -> HashMap<u32, String> {
        if pids.is_empty() {
            return HashMap::new();
        }
        let csv = pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        // lsof exits non-zero when any pid vanished, but still reports the rest.
        let mut cwds = match self.run_raw("lsof", &["-a", "-d", "cwd", "-p", csv.as_str(), "-Fn"]).await {
            Ok(output) => parse_lsof_cwds(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(error = %e, "lsof cwd query failed");
                HashMap::new()
            }
        };

        for pid in pids {
            if cwds.contains_key(pid) {
                continue;
            }
            if let Ok(path) = tokio::fs::read_link(format!("/proc/{pid}/cwd")).await {
                cwds.insert(*pid, path.to_string_lossy().into_owned());
            }
        }
        cwds
    }

    async fn parent_table(&self) -> Option<String> {
        self.table("pid,ppid,comm").await
    }

    async fn args_table(&self) -> Option<String> {
        self.table("pid,args").await
    }
}

/// Parse `lsof -Fn` output: `p<pid>` lines followed by `n<path>` lines.
pub fn parse_lsof_cwds(output: &str) -> HashMap<u32, String> {
    let mut cwds = HashMap::new();
    let mut current: Option<u32> = None;
    for line in output.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current = pid.trim().parse().ok();
        } else if let (Some(path), Some(pid)) = (line.strip_prefix('n'), current) {
            cwds.insert(pid, path.to_string());
        }
    }
    cwds
}

// ── Fake source ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct FakeTables {
    process: Option<String>,
    cwds: HashMap<u32, String>,
    parents: Option<String>,
    args: Option<String>,
}

/// Deterministic source with hand-written tables.
///
/// Tables can be swapped between scans through `&self`, so one instance can
/// be shared with a running orchestrator.
#[derive(Debug, Default)]
pub struct FakeProcessSource {
    tables: Mutex<FakeTables>,
}

impl FakeProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeTables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set the `pid tty pcpu rss etime comm` table; `None` simulates failure.
    pub fn set_process_table(&self, table: Option<&str>) {
        self.lock().process = table.map(str::to_string);
    }

    pub fn set_cwd(&self, pid: u32, cwd: &str) {
        self.lock().cwds.insert(pid, cwd.to_string());
    }

    pub fn set_parent_table(&self, table: Option<&str>) {
        self.lock().parents = table.map(str::to_string);
    }

    pub fn set_args_table(&self, table: Option<&str>) {
        self.lock().args = table.map(str::to_string);
    }
}

impl ProcessSource for FakeProcessSource {
    async fn process_table(&self) -> Option<String> {
        self.lock().process.clone()
    }

    async fn working_dirs(&self, pids: &[u32]) -> HashMap<u32, String> {
        let tables = self.lock();
        pids.iter()
            .filter_map(|pid| tables.cwds.get(pid).map(|c| (*pid, c.clone())))
            .collect()
    }

    async fn parent_table(&self) -> Option<String> {
        self.lock().parents.clone()
    }

    async fn args_table(&self) -> Option<String> {
        self.lock().args.clone()
    }
}

impl<S: ProcessSource> ProcessSource for std::sync::Arc<S> {
    fn process_table(&self) -> impl Future<Output = Option<String>> + Send {
        (**self).process_table()
    }

    fn working_dirs(&self, pids: &[u32]) -> impl Future<Output = HashMap<u32, String>> + Send {
        (**self).working_dirs(pids)
    }

    fn parent_table(&self) -> impl Future<Output = Option<String>> + Send {
        (**self).parent_table()
    }

    fn args_table(&self) -> impl Future<Output = Option<String>> + Send {
        (**self).args_table()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsof_cwds() {
        let out = "p101\nfcwd\nn/home/me/projects/demo\np202\nfcwd\nn/tmp/other dir\n";
        let cwds = parse_lsof_cwds(out);
        assert_eq!(cwds.len(), 2);
        assert_eq!(cwds[&101], "/home/me/projects/demo");
        assert_eq!(cwds[&202], "/tmp/other dir");
    }

    #[test]
    fn test_parse_lsof_ignores_orphan_names() {
        let cwds = parse_lsof_cwds("n/nowhere\npbad\nn/also-nowhere\n");
        assert!(cwds.is_empty());
    }

    #[tokio::test]
    async fn test_fake_source_returns_configured_tables() {
        let fake = FakeProcessSource::new();
        assert!(fake.process_table().await.is_none());

        fake.set_process_table(Some("PID TT %CPU RSS ELAPSED COMM\n1 ?? 0.0 1024 01:00 claude\n"));
        fake.set_cwd(1, "/work/demo");
        assert!(fake.process_table().await.unwrap().contains("claude"));
        let cwds = fake.working_dirs(&[1, 2]).await;
        assert_eq!(cwds.len(), 1);
        assert_eq!(cwds[&1], "/work/demo");
    }

    #[tokio::test]
    async fn test_system_source_missing_binary_is_io_error() {
        let source = SystemProcessSource::with_timeout(Duration::from_secs(1));
        let err = source
            .run("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Io(_)));
    }

    #[tokio::test]
    async fn test_system_source_slow_command_times_out() {
        let source = SystemProcessSource::with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = source.run("sleep", &["5"]).await.unwrap_err();
        assert!(
            matches!(err, MonitorError::CommandTimeout { ref program, .. } if program == "sleep"),
            "unexpected error: {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(4));

        assert!(source.query("sleep", &["5"]).await.is_none());
    }

    #[tokio::test]
    async fn test_system_source_nonzero_exit_is_absent() {
        let source = SystemProcessSource::with_timeout(Duration::from_secs(2));
        let err = source.run("false", &[]).await.unwrap_err();
        assert!(matches!(err, MonitorError::CommandFailed { .. }));
        assert!(source.query("false", &[]).await.is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_system_source_proc_cwd_fallback() {
        let source = SystemProcessSource::with_timeout(Duration::from_secs(2));
        let pid = std::process::id();
        let cwds = source.working_dirs(&[pid]).await;
        let expected = std::env::current_dir().unwrap();
        assert_eq!(cwds.get(&pid).map(String::as_str), expected.to_str());
    }
}
