pub mod bounded_reader;
pub mod http_request;
pub mod payload;
pub mod types;

pub use bounded_reader::read_bounded;
pub use http_request::{parse_request, HttpRequest, ParsedRequest};
pub use payload::encode_payload;
pub use types::{CapturedPayload, ReadEnd, ReadLimits};
