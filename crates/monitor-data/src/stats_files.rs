//! Readers for the small stats files maintained next to the event log.
//!
//! None of these are authoritative; every reader returns an empty value
//! when its file is missing or malformed.

use std::collections::BTreeMap;
use std::path::Path;

use monitor_core::error::{MonitorError, Result};
use monitor_core::models::TokenBucket;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ── Aggregate token file ──────────────────────────────────────────────────────

/// Read the four-integer aggregate file: input, cache-write, cache-read,
/// output.
pub fn read_token_stats(path: &Path) -> Option<TokenBucket> {
    let text = read_optional(path)?;
    let fields: Vec<u64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match fields.as_slice() {
        [input, cache_write, cache_read, output, ..] => {
            let mut bucket = TokenBucket::default();
            bucket.add_usage(*input, *output, *cache_read, *cache_write);
            Some(bucket)
        }
        _ => {
            debug!(path = %path.display(), "token stats file too short");
            None
        }
    }
}

// ── Per-model token file ──────────────────────────────────────────────────────

/// One line of the per-model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelTokenStats {
    pub model: String,
    /// Total as written by the producer; not recomputed.
    pub total: u64,
    pub tokens: TokenBucket,
}

/// Read `model total input cache-write cache-read output` lines.
///
/// Lines with fewer than six fields or non-numeric counters are skipped.
pub fn read_model_stats(path: &Path) -> Vec<ModelTokenStats> {
    let Some(text) = read_optional(path) else {
        return Vec::new();
    };
    text.lines().filter_map(parse_model_line).collect()
}

fn parse_model_line(line: &str) -> Option<ModelTokenStats> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    let num = |i: usize| fields[i].parse::<u64>().ok();
    let (total, input, cache_write, cache_read, output) = (num(1)?, num(2)?, num(3)?, num(4)?, num(5)?);
    let mut tokens = TokenBucket::default();
    tokens.add_usage(input, output, cache_read, cache_write);
    Some(ModelTokenStats {
        model: fields[0].to_string(),
        total,
        tokens,
    })
}

// ── Stats cache JSON ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTokensByModel {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub tokens_by_model: BTreeMap<String, u64>,
}

/// Summary written by the upstream tool. Absent fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCache {
    /// Model id → token fields, kept as loosely typed JSON.
    #[serde(default)]
    pub model_usage: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub daily_activity: Vec<DailyActivity>,
    #[serde(default)]
    pub daily_model_tokens: Vec<DailyTokensByModel>,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub first_session_date: Option<String>,
    #[serde(default)]
    pub last_computed_date: Option<String>,
    #[serde(default)]
    pub longest_session: Option<serde_json::Value>,
}

impl StatsCache {
    /// Activity entry for `date` (`YYYY-MM-DD`).
    pub fn activity_on(&self, date: &str) -> Option<&DailyActivity> {
        self.daily_activity.iter().find(|d| d.date == date)
    }
}

/// Load the stats cache, degrading to the default on any failure.
pub fn load_stats_cache(path: &Path) -> StatsCache {
    if !path.exists() {
        return StatsCache::default();
    }
    match try_load_stats_cache(path) {
        Ok(cache) => cache,
        Err(e) => {
            debug!(error = %e, "stats cache unreadable");
            StatsCache::default()
        }
    }
}

fn try_load_stats_cache(path: &Path) -> Result<StatsCache> {
    let text = std::fs::read_to_string(path).map_err(|source| MonitorError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "stats file unreadable");
            }
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_token_stats_field_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens");
        std::fs::write(&path, "10 20 30 40\n").unwrap();
        let b = read_token_stats(&path).unwrap();
        assert_eq!(b.input, 10);
        assert_eq!(b.cache_write, 20);
        assert_eq!(b.cache_read, 30);
        assert_eq!(b.output, 40);
        assert_eq!(b.total, 100);
    }

    #[test]
    fn test_token_stats_missing_or_malformed() {
        let dir = TempDir::new().unwrap();
        assert!(read_token_stats(&dir.path().join("nope")).is_none());
        let path = dir.path().join("tokens");
        std::fs::write(&path, "10 x 30 40").unwrap();
        assert!(read_token_stats(&path).is_none());
        std::fs::write(&path, "10 20").unwrap();
        assert!(read_token_stats(&path).is_none());
    }

    #[test]
    fn test_model_stats_skips_short_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models");
        std::fs::write(
            &path,
            "claude-opus-4-6 100 10 20 30 40\nshort 1 2\nclaude-sonnet-4 7 1 2 3 1\n",
        )
        .unwrap();
        let stats = read_model_stats(&path);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].model, "claude-opus-4-6");
        assert_eq!(stats[0].total, 100);
        assert_eq!(stats[0].tokens.cache_write, 20);
        assert_eq!(stats[0].tokens.cache_read, 30);
        assert_eq!(stats[1].tokens.output, 1);
    }

    #[test]
    fn test_stats_cache_defaults_and_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats-cache.json");
        std::fs::write(
            &path,
            r#"{
                "totalSessions": 12,
                "dailyActivity": [{"date": "2026-03-10", "sessionCount": 2, "messageCount": 40}],
                "dailyModelTokens": [{"date": "2026-03-10", "tokensByModel": {"claude-opus-4-6": 500}}],
                "longestSession": {"duration": 3600}
            }"#,
        )
        .unwrap();
        let cache = load_stats_cache(&path);
        assert_eq!(cache.total_sessions, 12);
        assert_eq!(cache.total_messages, 0);
        assert!(cache.model_usage.is_empty());
        assert_eq!(cache.activity_on("2026-03-10").unwrap().message_count, 40);
        assert_eq!(cache.daily_model_tokens[0].tokens_by_model["claude-opus-4-6"], 500);
        assert!(cache.longest_session.is_some());
        assert!(cache.first_session_date.is_none());
    }

    #[test]
    fn test_stats_cache_corrupt_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats-cache.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert_eq!(load_stats_cache(&path), StatsCache::default());
        assert_eq!(load_stats_cache(&dir.path().join("missing.json")), StatsCache::default());
    }
}
