//! Event sink trait
//!
//! Session handlers only know the [`EventSink`] trait, which keeps them independent from the
//! actual persistence backend ([`crate::storage::file_storage::JsonlEventLog`] in production,
//! in-memory recorders in tests).

use crate::storage::types::Event;

/// Destination of captured events.
///
/// `emit` is infallible from the caller's point of view: implementations own their failure
/// handling (retries, operational logging) and must never block the session that produced
/// the event on a logging fault.
pub trait EventSink: Send + Sync {
    /// Hands one event over to the sink. Events emitted sequentially are persisted in the
    /// same order.
    fn emit(&self, event: Event);
}
