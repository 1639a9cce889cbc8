//! Minimal HTTP/1.x request parsing.
//!
//! Only what the response simulator and the event record need: the request line, the headers
//! and whatever body bytes were captured. Anything that does not start with a well-formed
//! request line is kept as raw bytes.

use log::error;
use regex::Regex;
use std::sync::OnceLock;

const MAX_HEADERS: usize = 100;
const REQUEST_LINE: &str = r"^([A-Z]{1,20}) (\S+) (HTTP/\d\.\d)$";

/// Compiled request-line pattern, or `None` if it failed to build. Every request is then
/// kept unparsed.
fn request_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(REQUEST_LINE) {
            Ok(re) => Some(re),
            Err(e) => {
                error!("[!] Request line pattern failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpRequest {
    Parsed(ParsedRequest),
    Unparsed(Vec<u8>),
}

impl HttpRequest {
    pub fn user_agent(&self) -> Option<String> {
        match self {
            HttpRequest::Parsed(req) => req
                .header("user-agent")
                .filter(|ua| !ua.is_empty())
                .map(str::to_owned),
            HttpRequest::Unparsed(_) => None,
        }
    }
}

/// Offset of the blank line ending the header block and the length of that terminator.
fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    let lf = data.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_length(head: &str) -> Option<usize> {
    head.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Parses captured bytes as an HTTP request. Never fails: input without a valid request line
/// comes back as [`HttpRequest::Unparsed`].
pub fn parse_request(data: &[u8]) -> HttpRequest {
    let unparsed = || HttpRequest::Unparsed(data.to_vec());

    let (head, body, terminated) = match find_head_end(data) {
        Some((at, len)) => (&data[..at], &data[at + len..], true),
        None => (data, &data[data.len()..], false),
    };

    let line_end = match head.iter().position(|&b| b == b'\n') {
        Some(at) => at,
        None if terminated => head.len(),
        None => return unparsed(),
    };

    let Ok(request_line) = std::str::from_utf8(&head[..line_end]) else {
        return unparsed();
    };
    let Some(caps) = request_line_pattern()
        .and_then(|re| re.captures(request_line.trim_end_matches('\r')))
    else {
        return unparsed();
    };

    let header_block = String::from_utf8_lossy(head.get(line_end + 1..).unwrap_or(&[]));
    let headers = header_block
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .take(MAX_HEADERS)
        .collect();

    HttpRequest::Parsed(ParsedRequest {
        method: caps[1].to_string(),
        path: caps[2].to_string(),
        version: caps[3].to_string(),
        headers,
        body: body.to_vec(),
    })
}

/// Completion rule for HTTP reads: the header block is terminated and the body announced by
/// `Content-Length` has fully arrived.
///
/// Input that cannot be the start of an HTTP request (a TLS handshake, for example) is
/// complete as soon as it arrives.
pub fn http_message_complete(data: &[u8]) -> bool {
    match data.first() {
        None => return false,
        Some(b) if !b.is_ascii_uppercase() => return true,
        _ => {}
    }

    let Some((at, len)) = find_head_end(data) else {
        return false;
    };
    let head = String::from_utf8_lossy(&data[..at]);
    let expected = content_length(&head).unwrap_or(0);
    data.len() - (at + len) >= expected
}
