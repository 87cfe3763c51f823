//! Incremental token accounting over the per-session usage files under
//! `~/.claude/projects/`.
//!
//! Each `.jsonl` file is parsed at most once per modification time. Results
//! are kept per file in a [`TokenScanCache`] persisted between runs, then
//! re-keyed by project, date and model at query time.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Local};
use monitor_core::error::{MonitorError, Result};
use monitor_core::models::{DailyModelTokens, FileScanRecord, TokenBucket};
use monitor_core::project::{derive_project_name, project_name_from_encoded_dir};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Substring a line must contain before it is worth decoding.
const USAGE_MARKER: &str = "\"usage\"";

/// Model label for records that carry none.
const UNKNOWN_MODEL: &str = "unknown";

/// Mtimes round-trip through JSON as floats; closer than this is equal.
const MTIME_EPSILON: f64 = 1e-6;

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Persisted scan state, keyed by file path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenScanCache {
    #[serde(default)]
    pub files: BTreeMap<String, FileScanRecord>,
    /// Modification time in seconds since the epoch, per file.
    #[serde(default)]
    pub mtimes: BTreeMap<String, f64>,
}

impl TokenScanCache {
    /// Load a cache file. Missing or unreadable files give an empty cache.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::try_load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "token scan cache unusable; starting empty");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| MonitorError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| MonitorError::CorruptCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write to a temp file then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ── Query filter ──────────────────────────────────────────────────────────────

/// Restricts aggregate queries. `None` means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub dates: Option<BTreeSet<String>>,
    pub projects: Option<BTreeSet<String>>,
}

impl TokenFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_dates(mut self, dates: Option<BTreeSet<String>>) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_projects<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projects = Some(projects.into_iter().map(Into::into).collect());
        self
    }

    fn allows_date(&self, date: &str) -> bool {
        self.dates.as_ref().map_or(true, |d| d.contains(date))
    }

    fn allows_project(&self, project: &str) -> bool {
        self.projects.as_ref().map_or(true, |p| p.contains(project))
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Owns the usage-file cache and answers token aggregate queries.
#[derive(Debug)]
pub struct ProjectTokenScanner {
    projects_dir: PathBuf,
    cache_path: Option<PathBuf>,
    cache: TokenScanCache,
    /// Set when the cache started empty so the first scan always persists.
    needs_save: bool,
}

impl ProjectTokenScanner {
    /// Create a scanner over `projects_dir`, loading `cache_path` if given.
    pub fn new(projects_dir: impl Into<PathBuf>, cache_path: Option<PathBuf>) -> Self {
        let cache = cache_path
            .as_deref()
            .map(TokenScanCache::load)
            .unwrap_or_default();
        let needs_save = cache.is_empty();
        Self {
            projects_dir: projects_dir.into(),
            cache_path,
            cache,
            needs_save,
        }
    }

    pub fn cache(&self) -> &TokenScanCache {
        &self.cache
    }

    pub fn file_count(&self) -> usize {
        self.cache.files.len()
    }

    /// Re-parse new or modified files and evict deleted ones.
    ///
    /// Returns `true` when the cache changed. The cache is persisted after
    /// any change; a failed save is logged and does not affect the result.
    pub fn scan_incremental(&mut self) -> bool {
        let files = find_usage_files(&self.projects_dir);
        let present: HashSet<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let before = self.cache.files.len();
        self.cache.files.retain(|k, _| present.contains(k));
        self.cache.mtimes.retain(|k, _| present.contains(k));
        let evicted = before - self.cache.files.len();
        let mut changed = evicted > 0;

        let mut reparsed = 0usize;
        for path in &files {
            let key = path.to_string_lossy().into_owned();
            let Some(mtime) = file_mtime(path) else {
                continue;
            };
            let unchanged = self
                .cache
                .mtimes
                .get(&key)
                .is_some_and(|cached| (cached - mtime).abs() < MTIME_EPSILON);
            if unchanged && self.cache.files.contains_key(&key) {
                continue;
            }
            let record = parse_usage_file(path);
            self.cache.files.insert(key.clone(), record);
            self.cache.mtimes.insert(key, mtime);
            reparsed += 1;
            changed = true;
        }

        if changed {
            debug!(reparsed, evicted, files = files.len(), "usage files rescanned");
        }
        if changed || self.needs_save {
            self.persist();
        }
        changed
    }

    fn persist(&mut self) {
        let Some(path) = self.cache_path.as_deref() else {
            return;
        };
        match self.cache.save(path) {
            Ok(()) => self.needs_save = false,
            Err(e) => warn!(error = %e, path = %path.display(), "failed to save token scan cache"),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    fn for_each_bucket<F>(&self, filter: &TokenFilter, mut f: F)
    where
        F: FnMut(&str, &str, &str, &TokenBucket),
    {
        for record in self.cache.files.values() {
            if !filter.allows_project(&record.project) {
                continue;
            }
            for (date, models) in &record.dates {
                if !filter.allows_date(date) {
                    continue;
                }
                for (model, bucket) in models {
                    f(&record.project, date, model, bucket);
                }
            }
        }
    }

    /// Project → summed bucket.
    pub fn project_totals(&self, filter: &TokenFilter) -> BTreeMap<String, TokenBucket> {
        let mut out: BTreeMap<String, TokenBucket> = BTreeMap::new();
        self.for_each_bucket(filter, |project, _, _, b| {
            out.entry(project.to_string()).or_default().merge(b);
        });
        out
    }

    /// Grand total across everything the filter admits.
    pub fn totals(&self, filter: &TokenFilter) -> TokenBucket {
        let mut total = TokenBucket::default();
        self.for_each_bucket(filter, |_, _, _, b| total.merge(b));
        total
    }

    /// Date → model → summed bucket across projects.
    pub fn daily(&self, filter: &TokenFilter) -> DailyModelTokens {
        let mut out = DailyModelTokens::new();
        self.for_each_bucket(filter, |_, date, model, b| {
            out.entry(date.to_string())
                .or_default()
                .entry(model.to_string())
                .or_default()
                .merge(b);
        });
        out
    }

    /// Model → summed bucket.
    pub fn model_totals(&self, filter: &TokenFilter) -> BTreeMap<String, TokenBucket> {
        let mut out: BTreeMap<String, TokenBucket> = BTreeMap::new();
        self.for_each_bucket(filter, |_, _, model, b| {
            out.entry(model.to_string()).or_default().merge(b);
        });
        out
    }
}

// ── File parsing ──────────────────────────────────────────────────────────────

/// All `.jsonl` files under `dir`, sorted by path.
pub fn find_usage_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext == "jsonl")
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn file_mtime(path: &Path) -> Option<f64> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
}

/// Parse one usage file into per-date, per-model buckets.
///
/// Undecodable lines are skipped. Records repeating an earlier request id
/// in the same file are ignored.
pub fn parse_usage_file(path: &Path) -> FileScanRecord {
    let mut record = FileScanRecord::default();
    let mut project: Option<String> = None;

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "usage file unreadable");
            record.project = fallback_project(path);
            return record;
        }
    };

    let mut seen_requests: HashSet<String> = HashSet::new();
    let mut kept = 0u64;

    for line in std::io::BufReader::new(file).lines() {
        let Ok(line) = line else { continue };
        if !line.contains(USAGE_MARKER) {
            continue;
        }
        let Ok(data) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };

        if project.is_none() {
            if let Some(cwd) = data.get("cwd").and_then(Value::as_str) {
                project = Some(derive_project_name(cwd));
            }
        }

        let request = request_id(&data);
        if request.is_some_and(|id| seen_requests.contains(id)) {
            continue;
        }

        let Some(usage) = usage_block(&data) else {
            continue;
        };
        let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
        let input = field("input_tokens");
        let output = field("output_tokens");
        let cache_read = field("cache_read_input_tokens");
        let cache_write = field("cache_creation_input_tokens");
        if input == 0 && output == 0 && cache_read == 0 && cache_write == 0 {
            continue;
        }

        let Some(date) = data
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(local_date)
        else {
            continue;
        };
        let model = data
            .get("message")
            .and_then(|m| m.get("model"))
            .or_else(|| data.get("model"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_MODEL)
            .to_string();

        // Only kept records claim their request id.
        if let Some(id) = request {
            seen_requests.insert(id.to_string());
        }

        record
            .dates
            .entry(date)
            .or_default()
            .entry(model)
            .or_default()
            .add_usage(input, output, cache_read, cache_write);
        kept += 1;
    }

    record.project = project.unwrap_or_else(|| fallback_project(path));
    debug!(path = %path.display(), kept, project = %record.project, "usage file parsed");
    record
}

fn request_id(data: &Value) -> Option<&str> {
    data.get("requestId")
        .or_else(|| data.get("request_id"))
        .and_then(Value::as_str)
}

fn usage_block(data: &Value) -> Option<&Value> {
    data.get("message")
        .and_then(|m| m.get("usage"))
        .or_else(|| data.get("usage"))
        .filter(|u| u.is_object())
}

/// Local calendar date of an RFC 3339 timestamp, or its first ten
/// characters when it does not parse.
fn local_date(ts: &str) -> Option<String> {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => Some(dt.with_timezone(&Local).format("%Y-%m-%d").to_string()),
        Err(_) => ts.get(..10).map(str::to_string),
    }
}

fn fallback_project(path: &Path) -> String {
    let dir = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    project_name_from_encoded_dir(&dir)
}

/// Log a one-line summary of the cache state.
pub fn log_scan_summary(scanner: &ProjectTokenScanner) {
    let totals = scanner.totals(&TokenFilter::all());
    info!(
        files = scanner.file_count(),
        total_tokens = totals.total,
        "token scan cache ready"
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────
