//! Session management core module.
//!
//! One session is one accepted connection. The [`session_handler::SessionHandler`] runs it
//! against the protocol of the listener that accepted it and records the outcome.

pub mod session_handler;

pub use session_handler::SessionHandler;
