//! Clock handling for event-log timestamps and `ps` elapsed times.
//!
//! Log timestamps carry a 12-hour clock and sometimes a `MM/DD` prefix, but
//! never a year or timezone. Everything that does arithmetic on them goes
//! through this module.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::EventRecord;

/// Clock formats tried, in order, after any `MM/DD` prefix is removed.
const CLOCK_FORMATS: &[&str] = &["%I:%M %p", "%I:%M:%S %p", "%H:%M:%S", "%H:%M"];

/// Leap year used to place `MM/DD` stamps when only relative order matters.
const REFERENCE_YEAR: i32 = 2000;

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

// ── Log timestamps ────────────────────────────────────────────────────────────

/// A log timestamp split into its optional calendar part and its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogClock {
    /// `(month, day)` when the stamp has a `MM/DD` prefix.
    pub month_day: Option<(u32, u32)>,
    pub time: NaiveTime,
}

/// Parse `"09:05 AM"`, `"02/14 09:05 AM"` and their seconds / 24-hour forms.
///
/// Returns `None` for anything else, including impossible dates.
pub fn parse_log_clock(ts: &str) -> Option<LogClock> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }

    let (month_day, clock) = match ts.split_once(' ') {
        Some((prefix, rest)) if prefix.contains('/') => {
            let (m, d) = prefix.split_once('/')?;
            let month: u32 = m.parse().ok()?;
            let day: u32 = d.parse().ok()?;
            NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day)?;
            (Some((month, day)), rest.trim())
        }
        _ => (None, ts),
    };

    let time = CLOCK_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(clock, fmt).ok())?;

    Some(LogClock { month_day, time })
}

/// Place a log timestamp on the calendar relative to `now`.
///
/// Clock-only stamps land on `now`'s date, or the day before when that
/// would put them in the future. `MM/DD` stamps take `now`'s year, or the
/// previous year when that would put them more than a day ahead.
pub fn resolve_log_timestamp(ts: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let clock = parse_log_clock(ts)?;
    match clock.month_day {
        Some((month, day)) => {
            let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)
                .map(|d| d.and_time(clock.time));
            match this_year {
                Some(dt) if dt <= now + Duration::days(1) => Some(dt),
                _ => NaiveDate::from_ymd_opt(now.year() - 1, month, day)
                    .map(|d| d.and_time(clock.time)),
            }
        }
        None => {
            let dt = now.date().and_time(clock.time);
            if dt > now {
                Some(dt - Duration::days(1))
            } else {
                Some(dt)
            }
        }
    }
}

/// Minutes from `start` to `end`.
///
/// A negative difference is taken to be a single midnight wraparound and
/// has 24 hours added. Runs spanning more than a day are therefore
/// reported short; stale agents are expired separately instead.
/// Returns `0.0` when either stamp is unparseable.
pub fn time_diff_minutes(start: &str, end: &str) -> f64 {
    let (Some(s), Some(e)) = (parse_log_clock(start), parse_log_clock(end)) else {
        return 0.0;
    };

    let placed = |c: &LogClock, use_date: bool| -> NaiveDateTime {
        let date = match (use_date, c.month_day) {
            (true, Some((m, d))) => NaiveDate::from_ymd_opt(REFERENCE_YEAR, m, d),
            _ => None,
        }
        .unwrap_or(NaiveDate::MIN);
        date.and_time(c.time)
    };

    let both_dated = s.month_day.is_some() && e.month_day.is_some();
    let diff = placed(&e, both_dated) - placed(&s, both_dated);
    let mut minutes = diff.num_seconds() as f64 / 60.0;
    if minutes < 0.0 {
        minutes += MINUTES_PER_DAY;
    }
    minutes
}

// ── ps elapsed time ───────────────────────────────────────────────────────────

/// Shorten a `ps` etime (`DD-HH:MM:SS`, `HH:MM:SS` or `MM:SS`).
///
/// * with days → `"2d 3h"`
/// * with hours → `"1h05m"`
/// * otherwise → `"7m"`
///
/// Unrecognised input is returned trimmed but otherwise unchanged.
pub fn format_uptime(etime: &str) -> String {
    let etime = etime.trim();
    let (days, clock) = match etime.split_once('-') {
        Some((d, rest)) => match d.parse::<u64>() {
            Ok(days) => (days, rest),
            Err(_) => return etime.to_string(),
        },
        None => (0, etime),
    };

    let parts: Option<Vec<u64>> = clock.split(':').map(|p| p.parse().ok()).collect();
    let (hours, minutes) = match parts.as_deref() {
        Some([h, m, _]) => (*h, *m),
        Some([m, _]) => (0, *m),
        _ => return etime.to_string(),
    };

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

// ── Time ranges ───────────────────────────────────────────────────────────────

/// Window applied to log records and usage aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    Today,
    SevenDays,
    All,
}

impl TimeRange {
    fn days(self) -> Option<i64> {
        match self {
            TimeRange::Today => Some(1),
            TimeRange::SevenDays => Some(7),
            TimeRange::All => None,
        }
    }

    /// `MM/DD` prefixes covered by the range, or `None` for all time.
    pub fn log_date_prefixes(self, today: NaiveDate) -> Option<BTreeSet<String>> {
        self.dates(today, "%m/%d")
    }

    /// `YYYY-MM-DD` dates covered by the range, or `None` for all time.
    pub fn usage_dates(self, today: NaiveDate) -> Option<BTreeSet<String>> {
        self.dates(today, "%Y-%m-%d")
    }

    fn dates(self, today: NaiveDate, fmt: &str) -> Option<BTreeSet<String>> {
        let days = self.days()?;
        Some(
            (0..days)
                .map(|i| (today - Duration::days(i)).format(fmt).to_string())
                .collect(),
        )
    }

    /// Records whose `MM/DD` prefix falls inside the range.
    ///
    /// Clock-only records carry no date and are only kept for
    /// [`TimeRange::All`].
    pub fn filter_records<'a>(self, records: &'a [EventRecord], today: NaiveDate) -> Vec<&'a EventRecord> {
        let in_range = self.record_predicate(today);
        records.iter().filter(|&r| in_range(r)).collect()
    }

    /// Membership test behind [`TimeRange::filter_records`], for callers
    /// that need record positions.
    pub fn record_predicate(self, today: NaiveDate) -> impl Fn(&EventRecord) -> bool {
        let prefixes = self.log_date_prefixes(today);
        move |record| match &prefixes {
            None => true,
            Some(prefixes) => record
                .timestamp
                .trim()
                .get(..5)
                .map(|p| prefixes.contains(p))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeRange::Today => "today",
            TimeRange::SevenDays => "7d",
            TimeRange::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(TimeRange::Today),
            "7d" | "week" => Ok(TimeRange::SevenDays),
            "all" => Ok(TimeRange::All),
            other => Err(format!("unknown time range: {other}")),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
