//! Network subsystem
//!
//! Components:
//! - `network_listener`: binds the service ports and dispatches connections.
//! - `rate_limiter`: per-source admission by fixed one-minute windows.
//! - `types`: connection identity, concurrency slots and the shutdown signal.

pub mod network_listener;
pub mod rate_limiter;
pub mod types;

pub use network_listener::ListenerManager;
pub use rate_limiter::RateLimiter;
pub use types::{ShutdownSignal, ShutdownTrigger};
