//! Incremental reader for the append-only event log.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use monitor_core::error::{MonitorError, Result};
use monitor_core::models::EventRecord;
use tracing::{debug, info};

use crate::parser::parse_log_line;

/// Tracks a byte offset into the log and accumulates every parsed record.
///
/// Only bytes appended since the previous poll are read. A file that shrank
/// below the offset is treated as rotated: history is dropped and the file
/// is re-read from the start.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    records: Vec<EventRecord>,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            records: Vec::new(),
        }
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Read and parse everything appended since the last poll.
    ///
    /// Returns only the new records. Missing files and I/O failures yield an
    /// empty batch.
    pub fn poll(&mut self) -> Vec<EventRecord> {
        if !self.path.exists() {
            return Vec::new();
        }
        match self.try_poll() {
            Ok(batch) => batch,
            Err(e) => {
                debug!(error = %e, "event log poll failed");
                Vec::new()
            }
        }
    }

    /// Initial full read at startup.
    pub fn load_existing(&mut self) -> usize {
        self.offset = 0;
        self.records.clear();
        let loaded = self.poll().len();
        info!(path = %self.path.display(), records = loaded, "event log loaded");
        loaded
    }

    /// Every record accumulated since startup or the last rotation.
    pub fn all_records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Cheap change signal for derived views.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted, de-duplicated non-empty project names seen so far.
    pub fn projects(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !r.project.is_empty())
            .map(|r| r.project.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn try_poll(&mut self) -> Result<Vec<EventRecord>> {
        let read_err = |source: std::io::Error| MonitorError::FileRead {
            path: self.path.clone(),
            source,
        };

        let size = std::fs::metadata(&self.path).map_err(read_err)?.len();

        if size < self.offset {
            info!(
                path = %self.path.display(),
                old_offset = self.offset,
                size,
                "event log shrank; re-reading from start"
            );
            self.offset = 0;
            self.records.clear();
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).map_err(read_err)?;
        file.seek(SeekFrom::Start(self.offset)).map_err(read_err)?;
        let mut bytes = Vec::with_capacity((size - self.offset) as usize);
        file.take(size - self.offset)
            .read_to_end(&mut bytes)
            .map_err(read_err)?;
        self.offset += bytes.len() as u64;

        let text = String::from_utf8_lossy(&bytes);
        let batch: Vec<EventRecord> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(parse_log_line)
            .collect();

        self.records.extend(batch.iter().cloned());
        debug!(new = batch.len(), offset = self.offset, "event log polled");
        Ok(batch)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, lines: &[&str]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for l in lines {
            writeln!(f, "{}", l).unwrap();
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut t = LogTailer::new(dir.path().join("events.log"));
        assert!(t.poll().is_empty());
        assert_eq!(t.load_existing(), 0);
        assert_eq!(t.offset(), 0);
    }

    #[test]
    fn test_load_existing_then_incremental() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(&path, &["09:00 AM │ demo │ main │ 🔧 Bash", "", "09:01 AM │ demo │ main │ 📖 Read"]);

        let mut t = LogTailer::new(&path);
        assert_eq!(t.load_existing(), 2);

        append(&path, &["09:02 AM │ other │ dev │ 🔍 Grep"]);
        let batch = t.poll();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].project, "other");
        assert_eq!(t.record_count(), 3);
        assert_eq!(t.offset(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_poll_without_new_bytes_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(&path, &["09:00 AM │ demo │ main │ 🔧 Bash"]);

        let mut t = LogTailer::new(&path);
        assert_eq!(t.poll().len(), 1);
        let offset = t.offset();
        let snapshot = t.all_records().to_vec();

        assert!(t.poll().is_empty());
        assert!(t.poll().is_empty());
        assert_eq!(t.offset(), offset);
        assert_eq!(t.all_records(), snapshot.as_slice());
    }

    #[test]
    fn test_rotation_resets_and_rereads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(
            &path,
            &[
                "09:00 AM │ demo │ main │ 🔧 Bash with a fairly long body",
                "09:01 AM │ demo │ main │ 📖 Read another long-ish line",
            ],
        );
        let mut t = LogTailer::new(&path);
        t.load_existing();
        assert_eq!(t.record_count(), 2);

        std::fs::write(&path, "10:00 AM │ fresh │ main │ 🟢 Session started\n").unwrap();
        let batch = t.poll();
        assert_eq!(batch.len(), 1);
        assert_eq!(t.record_count(), 1);
        assert_eq!(t.all_records()[0].project, "fresh");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        let mut bytes = b"09:00 AM \xe2\x94\x82 demo \xe2\x94\x82 main \xe2\x94\x82 bad \xff byte\n".to_vec();
        bytes.extend_from_slice("09:01 AM │ demo │ main │ 🔧 Bash\n".as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut t = LogTailer::new(&path);
        let batch = t.poll();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].event.contains('\u{FFFD}'));
        assert_eq!(batch[0].project, "demo");
    }

    #[test]
    fn test_projects_sorted_unique() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(
            &path,
            &[
                "09:00 AM │ zeta │ main │ 🔧 Bash",
                "09:01 AM │ alpha │ main │ 🔧 Bash",
                "09:02 AM │ zeta │ main │ 🔧 Bash",
                "09:03 AM │ no project line",
            ],
        );
        let mut t = LogTailer::new(&path);
        t.load_existing();
        assert_eq!(t.projects(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
