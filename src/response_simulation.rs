//! Simulated replies sent back to clients.
//!
//! Nothing a client sends is ever executed or interpreted beyond picking one of a handful of
//! canned replies. The only client-controlled text echoed back is the request path in the login
//! form, and it is HTML-escaped.

pub mod simulator;
pub mod templates;

pub use simulator::{select_variant, RequestCategory, ResponseSimulator, SimulatedResponse, Variant};
