//! Append-only JSONL event log.
//!
//! [`JsonlEventLog`] is the production [`EventSink`]. Every `emit` pushes the event on an
//! unbounded channel consumed by a single dedicated writer thread, so the file has exactly
//! one writer and concurrent sessions never interleave partial records. Each record is
//! written with one `write_all` of a complete line on a file opened in append mode.
//!
//! The writer tolerates external interference with the log file: truncation is absorbed by
//! append mode, and a file that was deleted or replaced is detected before each write and
//! reopened. Failed writes are retried with exponential backoff, after which the event is
//! dropped and the fault is reported on the operational log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::EventSink;
use crate::storage::types::Event;

/// Backoff applied by the writer when a write fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first failed attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

enum WriterCommand {
    Append(Event),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct WriterStats {
    written: AtomicU64,
    dropped: AtomicU64,
}

/// Concurrency-safe, append-only JSONL writer. See the module documentation.
pub struct JsonlEventLog {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriterCommand>,
    stats: Arc<WriterStats>,
}

impl JsonlEventLog {
    /// Opens (creating it if needed) the log file and starts the writer thread.
    ///
    /// Fails if the file cannot be opened for appending, so that an unusable log path is
    /// reported at startup rather than on the first captured event.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_retry_policy(path, RetryPolicy::default())
    }

    pub fn with_retry_policy<P: AsRef<Path>>(
        path: P,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        info!("Event log opened at {}", path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WriterStats::default());
        let writer = EventWriter {
            path: path.clone(),
            file: Some(file),
            retry,
            stats: Arc::clone(&stats),
        };

        thread::Builder::new()
            .name("event-writer".to_string())
            .spawn(move || writer.run(rx))
            .map_err(StorageError::OpenFailed)?;

        Ok(Self { path, tx, stats })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until every event emitted before this call has been written (or dropped).
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(ack_tx))
            .map_err(|_| StorageError::WriterClosed)?;
        ack_rx.await.map_err(|_| StorageError::WriterClosed)
    }

    /// Drains pending events and stops the writer. Later `emit` calls are reported and lost.
    pub async fn close(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Close(ack_tx))
            .map_err(|_| StorageError::WriterClosed)?;
        ack_rx.await.map_err(|_| StorageError::WriterClosed)
    }

    /// Number of events successfully appended since the log was opened.
    pub fn written_count(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    /// Number of events given up on after exhausting retries.
    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: Event) {
        if self.tx.send(WriterCommand::Append(event)).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                "Event writer for {} is closed, event lost",
                self.path.display()
            );
        }
    }
}

fn open_append(path: &Path) -> Result<File, StorageError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StorageError::OpenFailed)
}

/// Single owner of the log file handle, running on its own thread.
struct EventWriter {
    path: PathBuf,
    file: Option<File>,
    retry: RetryPolicy,
    stats: Arc<WriterStats>,
}

impl EventWriter {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        debug!("Event writer started for {}", self.path.display());
        while let Some(command) = rx.blocking_recv() {
            match command {
                WriterCommand::Append(event) => self.append(&event),
                WriterCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                WriterCommand::Close(ack) => {
                    rx.close();
                    // events already queued behind the close request are still written
                    while let Ok(WriterCommand::Append(event)) = rx.try_recv() {
                        self.append(&event);
                    }
                    let _ = ack.send(());
                    break;
                }
            }
        }
        debug!("Event writer stopped for {}", self.path.display());
    }

    fn append(&mut self, event: &Event) {
        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!("{}", StorageError::SerializationFailed(e));
                return;
            }
        };

        let mut attempt = 0;
        loop {
            match self.write_line(&line) {
                Ok(()) => {
                    self.stats.written.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    // force a reopen on the next attempt
                    self.file = None;
                    if attempt >= self.retry.max_retries {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        error!(
                            "Dropping event from {} after {} attempts on {}: {}",
                            event.src_ip,
                            attempt + 1,
                            self.path.display(),
                            e
                        );
                        return;
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Event log write failed ({}), retrying in {:?}",
                        e, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), StorageError> {
        if self.file.as_ref().is_some_and(|f| is_stale(f, &self.path)) {
            info!(
                "Event log {} was removed or replaced, reopening",
                self.path.display()
            );
            self.file = None;
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.path)?,
        };
        let file = self.file.insert(file);
        file.write_all(line.as_bytes())
            .map_err(StorageError::WriteFailed)
    }
}

/// Whether `file` no longer is the file found at `path`.
#[cfg(unix)]
fn is_stale(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (std::fs::metadata(path), file.metadata()) {
        (Ok(on_disk), Ok(open)) => on_disk.dev() != open.dev() || on_disk.ino() != open.ino(),
        _ => true,
    }
}

#[cfg(not(unix))]
fn is_stale(_file: &File, path: &Path) -> bool {
    !path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::Protocol;
    use crate::storage::types::Outcome;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn event(port: u16, payload: &str) -> Event {
        let addr = format!("198.51.100.7:{}", port).parse().unwrap();
        Event::new(
            addr,
            80,
            Protocol::HTTP,
            payload.as_bytes(),
            None,
            Outcome::Sent200,
        )
    }

    fn read_events(path: &Path) -> Vec<Event> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).expect("well-formed record"))
            .collect()
    }

    #[tokio::test]
    async fn appends_one_line_per_event_in_emit_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = JsonlEventLog::open(&path).unwrap();

        log.emit(event(1000, "first"));
        log.emit(event(1001, "second"));
        log.emit(event(1002, "third"));
        log.flush().await.unwrap();

        let events = read_events(&path);
        let payloads: Vec<_> = events.iter().map(|e| e.raw_payload.as_str()).collect();
        assert_eq!(payloads, vec!["first", "second", "third"]);
        assert_eq!(log.written_count(), 3);
    }

    #[tokio::test]
    async fn existing_records_are_never_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"previous\":\"record\"}\n").unwrap();

        let log = JsonlEventLog::open(&path).unwrap();
        log.emit(event(1000, "new"));
        log.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("{\"previous\":\"record\"}"));
        assert!(lines.next().unwrap().contains("\"raw_payload\":\"new\""));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn concurrent_emits_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = Arc::new(JsonlEventLog::open(&path).unwrap());

        let mut tasks = Vec::new();
        for i in 0..100u16 {
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                let payload = format!("payload-{}-{}", i, "x".repeat(512));
                log.emit(event(20000 + i, &payload));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        log.flush().await.unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 100);
        let mut ports: Vec<u16> = events.iter().map(|e| e.src_port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 100);
    }

    #[tokio::test]
    async fn survives_external_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = JsonlEventLog::open(&path).unwrap();

        log.emit(event(1000, "before"));
        log.flush().await.unwrap();

        std::fs::write(&path, "").unwrap();

        log.emit(event(1001, "after"));
        log.flush().await.unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_payload, "after");
    }

    #[tokio::test]
    async fn reopens_a_deleted_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = JsonlEventLog::open(&path).unwrap();

        log.emit(event(1000, "before"));
        log.flush().await.unwrap();

        std::fs::remove_file(&path).unwrap();

        log.emit(event(1001, "after"));
        log.flush().await.unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_payload, "after");
    }

    #[tokio::test]
    async fn drops_after_retries_then_recovers() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        std::fs::create_dir(&log_dir).unwrap();
        let path = log_dir.join("events.jsonl");
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let log = JsonlEventLog::with_retry_policy(&path, retry).unwrap();

        std::fs::remove_dir_all(&log_dir).unwrap();
        log.emit(event(1000, "lost"));
        log.flush().await.unwrap();
        assert_eq!(log.dropped_count(), 1);

        std::fs::create_dir(&log_dir).unwrap();
        log.emit(event(1001, "kept"));
        log.flush().await.unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_payload, "kept");
    }

    #[tokio::test]
    async fn close_drains_pending_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = JsonlEventLog::open(&path).unwrap();

        for i in 0..10 {
            log.emit(event(1000 + i, "queued"));
        }
        log.close().await.unwrap();
        assert_eq!(read_events(&path).len(), 10);

        // emitting after close is reported, not a panic
        log.emit(event(2000, "late"));
        assert!(log.flush().await.is_err());
        assert_eq!(read_events(&path).len(), 10);
    }

    #[test]
    fn open_fails_on_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("events.jsonl");
        assert!(matches!(
            JsonlEventLog::open(&path),
            Err(StorageError::OpenFailed(_))
        ));
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let retry = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(50));
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(300));
        assert_eq!(retry.delay_for(40), Duration::from_millis(300));
    }
}
