//! Read side of the event log, used by the dashboard.
//!
//! Records are read as loose JSON values rather than [`crate::storage::types::Event`] so
//! that lines written by other tools or older versions are still listed. Lines that are not
//! valid JSON are skipped.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error_handling::types::StorageError;

pub const DEFAULT_LIMIT: usize = 200;
pub const MAX_LIMIT: usize = 5000;

/// Criteria for listing events. Every criterion is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventFilter {
    /// Exact destination port.
    pub port: Option<u16>,
    /// Substring of the source IP.
    pub ip: Option<String>,
    /// Protocol name, case-insensitive.
    pub protocol: Option<String>,
    /// Number of most recent matches to return, clamped to `[1, MAX_LIMIT]`.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn matches(&self, event: &Value) -> bool {
        if let Some(port) = self.port {
            if event.get("dst_port").and_then(Value::as_u64) != Some(u64::from(port)) {
                return false;
            }
        }

        if let Some(protocol) = non_blank(&self.protocol) {
            let actual = event.get("protocol").and_then(Value::as_str).unwrap_or("");
            if !actual.eq_ignore_ascii_case(protocol) {
                return false;
            }
        }

        if let Some(ip) = non_blank(&self.ip) {
            let actual = event.get("src_ip").and_then(Value::as_str).unwrap_or("");
            if !actual.contains(ip) {
                return false;
            }
        }

        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Returns the most recent events of the log matching `filter`, oldest first.
///
/// A missing log file is an empty log.
pub fn read_events(path: &Path, filter: &EventFilter) -> Result<Vec<Value>, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::ReadFailed(e)),
    };

    let limit = filter.limit();
    let mut out = VecDeque::with_capacity(limit.min(DEFAULT_LIMIT));
    for line in BufReader::new(file).lines() {
        let line = line.map_err(StorageError::ReadFailed)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if !filter.matches(&event) {
            continue;
        }
        if out.len() == limit {
            out.pop_front();
        }
        out.push_back(event);
    }

    Ok(out.into())
}

/// Empties the log file in place. The running writer keeps appending to it.
pub fn truncate_events(path: &Path) -> Result<(), StorageError> {
    match OpenOptions::new().write(true).truncate(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::WriteFailed(e)),
    }
}
