use serde::{Deserialize, Serialize};
use std::fmt;

/// Application protocol simulated on a listening port.
///
/// HTTPS is served as plaintext HTTP: no TLS handshake ever takes place, the port
/// number is the only difference with [`Protocol::HTTP`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Protocol {
    SSH,
    HTTP,
    HTTPS,
}

impl Protocol {
    /// Whether sessions on this protocol go through the HTTP request parser.
    pub fn is_http_like(&self) -> bool {
        matches!(self, Protocol::HTTP | Protocol::HTTPS)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::SSH => "SSH",
            Protocol::HTTP => "HTTP",
            Protocol::HTTPS => "HTTPS",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listening service: a protocol simulated on a port.
#[derive(Debug, PartialEq, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub enabled: bool,
}

impl ServiceConfig {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            name: protocol.as_str().to_lowercase(),
            port,
            protocol,
            enabled: true,
        }
    }
}
