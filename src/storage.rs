//! Storage subsystem
//!
//! This module provides the event record and the sinks persisting it.
//!
//! Components:
//! - `types`: the `Event` record and its outcome tags.
//! - `storage_trait`: the `EventSink` trait session handlers write to.
//! - `file_storage`: the append-only JSONL implementation.
//! - `event_filter`: read-side helpers used by the dashboard.

pub mod event_filter;
pub mod file_storage;
pub mod storage_trait;
pub mod types;

pub use file_storage::JsonlEventLog;
pub use storage_trait::EventSink;
pub use types::{Event, Outcome, PayloadEncoding};
