//! Runtime orchestration layer for the Claude dashboard.
//!
//! Scans the process table through an injectable source, joins processes
//! with log sessions, and drives every producer from one scheduling task.

pub mod correlation;
pub mod orchestrator;
pub mod process_scanner;
pub mod process_source;

pub use monitor_core as core;
pub use monitor_data as data;
