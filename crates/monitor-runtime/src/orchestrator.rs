//! Async monitoring orchestrator.
//!
//! A single tokio task owns every producer (log tailer, process scanner,
//! token scanner, stats readers) and drives each from its own interval.
//! Derived views are rebuilt only when a cheap input proxy moved, and a
//! [`DashboardSnapshot`] is sent through an `mpsc` channel whenever
//! anything visible changed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use monitor_core::models::{DailyModelTokens, SessionNode, TokenBucket};
use monitor_core::settings::{MonitorPaths, Settings};
use monitor_core::time_utils::TimeRange;
use monitor_data::counter::{count_events, EventCounts};
use monitor_data::log_view::{select_events, EventLine, LogViewOptions, RecordFilter};
use monitor_data::stats_files::{
    load_stats_cache, read_model_stats, read_token_stats, ModelTokenStats, StatsCache,
};
use monitor_data::tailer::LogTailer;
use monitor_data::token_scanner::{log_scan_summary, ProjectTokenScanner, TokenFilter};
use monitor_data::topology::{count_active_sessions, TopologyBuilder};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::correlation::{attach_sessions, correlate, InstanceView};
use crate::process_scanner::ProcessScanner;
use crate::process_source::ProcessSource;

/// Snapshots buffered before a slow consumer stalls the loop.
const CHANNEL_CAPACITY: usize = 16;

/// Most recent days carried in [`DashboardSnapshot::daily_usage`].
const DAILY_ROWS: usize = 30;

// ── Public types ──────────────────────────────────────────────────────────────

/// Everything the presentation layer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: String,
    pub range: String,
    pub record_count: usize,
    pub projects: Vec<String>,
    /// Marker tallies over records inside `range`.
    pub event_counts: EventCounts,
    /// Tail of the filtered event listing.
    pub events: Vec<EventLine>,
    pub sessions: Vec<SessionNode>,
    pub active_sessions: usize,
    /// Every scanned process, one view per pid.
    pub instances: Vec<InstanceView>,
    /// One view per project, keeping its busiest process.
    pub project_instances: Vec<InstanceView>,
    pub active_instances: usize,
    pub total_mem_mb: f64,
    pub generation: u64,
    /// Usage-file totals inside `range`.
    pub token_totals: TokenBucket,
    pub tokens_by_model: BTreeMap<String, TokenBucket>,
    pub tokens_by_project: BTreeMap<String, TokenBucket>,
    /// Newest first.
    pub daily_usage: Vec<DailyUsage>,
    pub token_stats: Option<TokenBucket>,
    pub model_stats: Vec<ModelTokenStats>,
    pub stats: StatsCache,
}

/// One day of usage-file tokens joined with the stats cache activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    pub date: String,
    /// Model id → total tokens.
    pub by_model: BTreeMap<String, u64>,
    pub total: u64,
    pub messages: u64,
    pub sessions: u64,
}

/// Paths, intervals and filters for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub paths: MonitorPaths,
    pub process_name: String,
    pub range: TimeRange,
    pub log_view: LogViewOptions,
    pub log_poll: Duration,
    pub process_interval: Duration,
    pub usage_interval: Duration,
    pub stats_interval: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            paths: settings.paths(),
            process_name: settings.process_name.clone(),
            range: settings.time_range(),
            log_view: LogViewOptions {
                filter: RecordFilter {
                    text: settings.filter.clone().unwrap_or_default(),
                    project: settings.project.clone().unwrap_or_default(),
                    event_type: settings.event_type.clone().unwrap_or_default(),
                },
                compact: settings.compact,
                tail: settings.tail,
            },
            log_poll: settings.log_poll_interval(),
            process_interval: settings.process_interval(),
            usage_interval: settings.usage_interval(),
            stats_interval: settings.stats_interval(),
        }
    }
}

// ── DashboardState ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TokenView {
    totals: TokenBucket,
    by_model: BTreeMap<String, TokenBucket>,
    by_project: BTreeMap<String, TokenBucket>,
    daily: DailyModelTokens,
}

#[derive(Debug, Default, PartialEq)]
struct StatsView {
    token_stats: Option<TokenBucket>,
    model_stats: Vec<ModelTokenStats>,
    cache: StatsCache,
}

/// Proxy for the inputs of the log-derived views.
type ViewKey = (usize, u64, NaiveDate);

/// All producer state plus the cached derived views.
///
/// Mutated only from the task that owns it.
pub struct DashboardState<S> {
    paths: MonitorPaths,
    range: TimeRange,
    log_view: LogViewOptions,
    tailer: LogTailer,
    scanner: ProcessScanner<S>,
    tokens: ProjectTokenScanner,
    sessions: Vec<SessionNode>,
    instance_views: Vec<InstanceView>,
    project_views: Vec<InstanceView>,
    event_counts: EventCounts,
    events: Vec<EventLine>,
    view_key: Option<ViewKey>,
    token_view: TokenView,
    token_view_date: Option<NaiveDate>,
    stats: StatsView,
}

impl<S: ProcessSource> DashboardState<S> {
    pub fn new(config: &OrchestratorConfig, source: S) -> Self {
        Self {
            paths: config.paths.clone(),
            range: config.range,
            log_view: config.log_view.clone(),
            tailer: LogTailer::new(&config.paths.event_log),
            scanner: ProcessScanner::new(source, config.process_name.clone()),
            tokens: ProjectTokenScanner::new(
                &config.paths.usage_dir,
                Some(config.paths.token_scan_cache.clone()),
            ),
            sessions: Vec::new(),
            instance_views: Vec::new(),
            project_views: Vec::new(),
            event_counts: EventCounts::zeroed(),
            events: Vec::new(),
            view_key: None,
            token_view: TokenView::default(),
            token_view_date: None,
            stats: StatsView::default(),
        }
    }

    /// One full pass over every producer, as done at startup.
    pub async fn refresh_all(&mut self) {
        self.tailer.load_existing();
        self.scan_processes().await;
        self.scan_usage();
        log_scan_summary(&self.tokens);
        self.reload_stats();
        self.refresh_derived();
    }

    /// Returns `true` when new records arrived.
    pub fn poll_log(&mut self) -> bool {
        !self.tailer.poll().is_empty()
    }

    pub async fn scan_processes(&mut self) -> u64 {
        let (_, generation) = self.scanner.scan().await;
        generation
    }

    /// Rescan usage files; token aggregates are rebuilt only on change or
    /// when the local date moved.
    pub fn scan_usage(&mut self) -> bool {
        let changed = self.tokens.scan_incremental();
        let today = today();
        if !changed && self.token_view_date == Some(today) {
            return false;
        }
        let mut filter = TokenFilter::all().with_dates(self.range.usage_dates(today));
        if !self.log_view.filter.project.is_empty() {
            filter = filter.with_projects([self.log_view.filter.project.as_str()]);
        }
        self.token_view = TokenView {
            totals: self.tokens.totals(&filter),
            by_model: self.tokens.model_totals(&filter),
            by_project: self.tokens.project_totals(&filter),
            daily: self.tokens.daily(&filter),
        };
        self.token_view_date = Some(today);
        true
    }

    /// Re-read the stats files. Returns `true` when any of them changed.
    pub fn reload_stats(&mut self) -> bool {
        let fresh = StatsView {
            token_stats: read_token_stats(&self.paths.token_stats),
            model_stats: read_model_stats(&self.paths.model_stats),
            cache: load_stats_cache(&self.paths.stats_cache),
        };
        if fresh == self.stats {
            return false;
        }
        self.stats = fresh;
        true
    }

    /// Rebuild topology, correlation and counts if the record count, scan
    /// generation or date changed since the last rebuild.
    pub fn refresh_derived(&mut self) -> bool {
        let today = today();
        let key = (self.tailer.record_count(), self.scanner.generation(), today);
        if self.view_key == Some(key) {
            return false;
        }

        let records = self.tailer.all_records();
        self.sessions = TopologyBuilder::build(records);
        self.instance_views = attach_sessions(self.scanner.instances(), &self.sessions);
        self.project_views = correlate(self.scanner.instances(), &self.sessions);
        self.event_counts = count_events(self.range.filter_records(records, today));
        self.events = select_events(records, self.range, today, &self.log_view);
        self.view_key = Some(key);

        debug!(
            records = key.0,
            generation = key.1,
            sessions = self.sessions.len(),
            "derived views rebuilt"
        );
        true
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            generated_at: Local::now().to_rfc3339(),
            range: self.range.to_string(),
            record_count: self.tailer.record_count(),
            projects: self.tailer.projects(),
            event_counts: self.event_counts.clone(),
            events: self.events.clone(),
            sessions: self.sessions.clone(),
            active_sessions: count_active_sessions(&self.sessions),
            instances: self.instance_views.clone(),
            project_instances: self.project_views.clone(),
            active_instances: self.scanner.active_count(),
            total_mem_mb: self.scanner.total_mem_mb(),
            generation: self.scanner.generation(),
            token_totals: self.token_view.totals,
            tokens_by_model: self.token_view.by_model.clone(),
            tokens_by_project: self.token_view.by_project.clone(),
            daily_usage: daily_usage(&self.token_view.daily, &self.stats.cache),
            token_stats: self.stats.token_stats,
            model_stats: self.stats.model_stats.clone(),
            stats: self.stats.cache.clone(),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The last [`DAILY_ROWS`] days of `daily`, newest first, with each day's
/// message and session counts from the stats cache.
fn daily_usage(daily: &DailyModelTokens, stats: &StatsCache) -> Vec<DailyUsage> {
    daily
        .iter()
        .rev()
        .take(DAILY_ROWS)
        .map(|(date, models)| {
            let activity = stats.activity_on(date);
            DailyUsage {
                date: date.clone(),
                by_model: models.iter().map(|(m, b)| (m.clone(), b.total)).collect(),
                total: models.values().map(|b| b.total).sum(),
                messages: activity.map_or(0, |a| a.message_count),
                sessions: activity.map_or(0, |a| a.session_count),
            }
        })
        .collect()
}

// ── MonitoringOrchestrator ────────────────────────────────────────────────────

/// Background monitoring coordinator.
///
/// Call [`MonitoringOrchestrator::start`] to run the loop in its own tokio
/// task and receive snapshots on a channel.
pub struct MonitoringOrchestrator<S> {
    config: OrchestratorConfig,
    source: S,
}

impl<S: ProcessSource + 'static> MonitoringOrchestrator<S> {
    pub fn new(config: OrchestratorConfig, source: S) -> Self {
        Self { config, source }
    }

    /// Spawn the monitoring loop.
    ///
    /// The first snapshot is sent right after the initial full refresh.
    pub fn start(self) -> (mpsc::Receiver<DashboardSnapshot>, MonitoringHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            self.monitoring_loop(tx).await;
        });
        (rx, MonitoringHandle { handle })
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn monitoring_loop(self, tx: mpsc::Sender<DashboardSnapshot>) {
        let config = self.config;
        let mut state = DashboardState::new(&config, self.source);

        state.refresh_all().await;
        info!(
            records = state.tailer.record_count(),
            instances = state.scanner.instances().len(),
            "initial refresh complete"
        );
        if tx.send(state.snapshot()).await.is_err() {
            return;
        }

        let mut log_tick = delayed_interval(config.log_poll);
        let mut process_tick = delayed_interval(config.process_interval);
        let mut usage_tick = delayed_interval(config.usage_interval);
        let mut stats_tick = delayed_interval(config.stats_interval);

        loop {
            let mut changed = tokio::select! {
                _ = log_tick.tick() => state.poll_log(),
                _ = process_tick.tick() => {
                    state.scan_processes().await;
                    false
                }
                _ = usage_tick.tick() => state.scan_usage(),
                _ = stats_tick.tick() => state.reload_stats(),
            };
            changed |= state.refresh_derived();

            if !changed {
                continue;
            }
            if let Err(e) = tx.send(state.snapshot()).await {
                warn!(error = %e, "snapshot receiver dropped; stopping monitoring loop");
                break;
            }
        }
    }
}

/// Interval whose first tick is one period away. A slow tick delays the
/// next one instead of bursting to catch up.
fn delayed_interval(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

// ── MonitoringHandle ──────────────────────────────────────────────────────────

/// A handle to the background monitoring task.
///
/// Call [`MonitoringHandle::abort`] to stop the loop.
pub struct MonitoringHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl MonitoringHandle {
    /// Immediately abort the monitoring loop.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
