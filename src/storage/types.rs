use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::configuration::types::Protocol;
use crate::data_capture::payload::encode_payload;

/// How `raw_payload` must be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// The payload was valid UTF-8 and is stored as is.
    Utf8,
    /// The payload was binary and is stored base64-encoded (standard alphabet, padded).
    Base64,
}

/// Outcome tag recorded in the `notes` field of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The SSH-like banner was sent.
    SentBanner,
    /// The canned 200 page was sent.
    #[serde(rename = "sent_200")]
    Sent200,
    /// A 302 redirect was sent.
    Redirected,
    /// The input did not parse as HTTP, a 400 was sent.
    #[serde(rename = "sent_400")]
    Sent400,
    /// The source exceeded its rate limit.
    RateLimited,
    /// The peer sent nothing before the read deadline.
    Timeout,
    /// The connection failed while reading or writing.
    Reset,
    /// The peer closed the connection without sending anything.
    Empty,
    /// The session was cut short by a shutdown.
    Shutdown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::SentBanner => "sent_banner",
            Outcome::Sent200 => "sent_200",
            Outcome::Redirected => "redirected",
            Outcome::Sent400 => "sent_400",
            Outcome::RateLimited => "rate_limited",
            Outcome::Timeout => "timeout",
            Outcome::Reset => "reset",
            Outcome::Empty => "empty",
            Outcome::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured interaction, serialized as one line of the event log.
///
/// Events are built once, at the end of a session, and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Completion time of the session, UTC with second precision.
    #[serde(with = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub raw_payload: String,
    pub payload_encoding: PayloadEncoding,
    pub user_agent: Option<String>,
    /// Enrichment slot filled by external tooling, always null when written by the core.
    pub geoip: Option<serde_json::Value>,
    pub notes: Outcome,
}

impl Event {
    pub fn new(
        client_addr: SocketAddr,
        dst_port: u16,
        protocol: Protocol,
        payload: &[u8],
        user_agent: Option<String>,
        notes: Outcome,
    ) -> Self {
        let (raw_payload, payload_encoding) = encode_payload(payload);
        Self {
            timestamp: Utc::now().trunc_subsecs(0),
            src_ip: client_addr.ip(),
            src_port: client_addr.port(),
            dst_port,
            protocol,
            raw_payload,
            payload_encoding,
            user_agent,
            geoip: None,
            notes,
        }
    }

    /// Serializes the event as a single JSON line, newline included.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// `YYYY-MM-DD HH:MM:SS UTC` rendering of event timestamps.
pub mod event_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn addr() -> SocketAddr {
        "203.0.113.45:51514".parse().unwrap()
    }

    #[test]
    fn event_serializes_with_the_log_schema() {
        let mut event = Event::new(
            addr(),
            80,
            Protocol::HTTP,
            b"GET / HTTP/1.1\r\n\r\n",
            Some("curl/8.14.1".into()),
            Outcome::Sent200,
        );
        event.timestamp = Utc.with_ymd_and_hms(2025, 11, 2, 13, 20, 53).unwrap();

        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["timestamp"], "2025-11-02 13:20:53 UTC");
        assert_eq!(value["src_ip"], "203.0.113.45");
        assert_eq!(value["src_port"], 51514);
        assert_eq!(value["dst_port"], 80);
        assert_eq!(value["protocol"], "HTTP");
        assert_eq!(value["raw_payload"], "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(value["payload_encoding"], "utf8");
        assert_eq!(value["user_agent"], "curl/8.14.1");
        assert!(value["geoip"].is_null());
        assert_eq!(value["notes"], "sent_200");
    }

    #[test]
    fn binary_payload_is_flagged() {
        let event = Event::new(
            addr(),
            443,
            Protocol::HTTPS,
            &[0x16, 0x03, 0x01, 0xff],
            None,
            Outcome::Sent400,
        );
        assert_eq!(event.payload_encoding, PayloadEncoding::Base64);
        assert_eq!(event.raw_payload, "FgMB/w==");
    }

    #[test]
    fn json_line_is_single_line() {
        let event = Event::new(
            addr(),
            22,
            Protocol::SSH,
            b"SSH-2.0-libssh\r\nsecond line\n",
            None,
            Outcome::SentBanner,
        );
        let line = event.to_json_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: Event = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn timestamp_has_second_precision() {
        let event = Event::new(addr(), 22, Protocol::SSH, b"", None, Outcome::Empty);
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn outcome_names_match_serde() {
        for outcome in [
            Outcome::SentBanner,
            Outcome::Sent200,
            Outcome::Redirected,
            Outcome::Sent400,
            Outcome::RateLimited,
            Outcome::Timeout,
            Outcome::Reset,
            Outcome::Empty,
            Outcome::Shutdown,
        ] {
            let json = serde_json::to_value(outcome).unwrap();
            assert_eq!(json, outcome.as_str());
        }
    }
}
