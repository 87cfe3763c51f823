//! Data ingestion layer for the Claude dashboard.
//!
//! Tails and parses the hook event log, tallies and lists markers, rebuilds the
//! session/agent topology, and scans per-session usage files and stats
//! files for token accounting.

pub mod counter;
pub mod log_view;
pub mod parser;
pub mod stats_files;
pub mod tailer;
pub mod token_scanner;
pub mod topology;

pub use monitor_core as core;
