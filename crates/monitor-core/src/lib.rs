//! Shared types and pure helpers for the Claude dashboard.
//!
//! Holds the data model produced by the ingestion pipeline, the error type,
//! CLI settings, and the clock, formatting and project-name helpers that
//! every other crate leans on.

pub mod error;
pub mod formatting;
pub mod models;
pub mod project;
pub mod settings;
pub mod time_utils;
