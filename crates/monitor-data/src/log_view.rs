//! Filtered, optionally compacted listing of the most recent events.

use chrono::NaiveDate;
use monitor_core::models::EventRecord;
use monitor_core::time_utils::TimeRange;
use serde::Serialize;

use crate::parser::compact_records;

/// Lines listed when no `--tail` is given.
pub const DEFAULT_TAIL: usize = 20;

/// Record filters. Empty fields filter nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub text: String,
    pub project: String,
    pub event_type: String,
}

impl RecordFilter {
    pub fn matches(&self, record: &EventRecord) -> bool {
        record.matches_filter(&self.text, &self.project, &self.event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.project.is_empty() && self.event_type.is_empty()
    }
}

/// What goes into the event listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogViewOptions {
    pub filter: RecordFilter,
    /// Fold consecutive same-marker records of one project into one line.
    pub compact: bool,
    /// Lines kept from the end. `0` disables the listing.
    pub tail: usize,
}

impl Default for LogViewOptions {
    fn default() -> Self {
        Self {
            filter: RecordFilter::default(),
            compact: false,
            tail: DEFAULT_TAIL,
        }
    }
}

/// One listed record, or a compacted run of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLine {
    /// Log position of the last record this line covers.
    pub seq: usize,
    pub timestamp: String,
    pub project: String,
    pub branch: String,
    pub event: String,
    pub marker: String,
    /// Records folded into this line.
    pub count: usize,
}

impl EventLine {
    fn new(record: &EventRecord, seq: usize, count: usize) -> Self {
        Self {
            seq,
            timestamp: record.timestamp.clone(),
            project: record.project.clone(),
            branch: record.branch.clone(),
            event: record.event.clone(),
            marker: record.marker.clone(),
            count,
        }
    }

    pub fn is_session_start(&self) -> bool {
        self.event.contains("🟢") && self.event.contains("Session started")
    }
}

/// The last `options.tail` lines of `records` inside `range` that pass the
/// filter, compacted when asked.
pub fn select_events(
    records: &[EventRecord],
    range: TimeRange,
    today: NaiveDate,
    options: &LogViewOptions,
) -> Vec<EventLine> {
    if options.tail == 0 {
        return Vec::new();
    }
    let in_range = range.record_predicate(today);
    let selected: Vec<(usize, &EventRecord)> = records
        .iter()
        .enumerate()
        .filter(|&(_, r)| in_range(r) && options.filter.matches(r))
        .collect();

    let mut lines: Vec<EventLine> = if options.compact {
        let mut end = 0;
        compact_records(selected.iter().map(|&(_, r)| r))
            .into_iter()
            .map(|group| {
                end += group.count;
                EventLine::new(group.sample, selected[end - 1].0, group.count)
            })
            .collect()
    } else {
        selected
            .iter()
            .map(|&(seq, r)| EventLine::new(r, seq, 1))
            .collect()
    };

    let skip = lines.len().saturating_sub(options.tail);
    lines.drain(..skip);
    lines
}
