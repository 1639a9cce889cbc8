//! Per-connection protocol handling.
//!
//! A [`SessionHandler`] drives one accepted connection from first byte to close: bounded read,
//! rate-limit check, simulated reply, and exactly one [`Event`] handed to the sink. Every I/O
//! failure is turned into the event's `notes`; nothing propagates to the caller.

use crate::configuration::types::Protocol;
use crate::data_capture::bounded_reader::{first_line_complete, read_bounded};
use crate::data_capture::http_request::{http_message_complete, parse_request};
use crate::data_capture::payload::preview;
use crate::data_capture::types::{CapturedPayload, ReadEnd, ReadLimits};
use crate::network::rate_limiter::RateLimiter;
use crate::network::types::{ConnectionMeta, ShutdownSignal};
use crate::response_simulation::simulator::ResponseSimulator;
use crate::response_simulation::templates;
use crate::storage::storage_trait::EventSink;
use crate::storage::types::{Event, Outcome};
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// What a finished session recorded.
#[derive(Debug)]
struct SessionRecord {
    payload: Vec<u8>,
    user_agent: Option<String>,
    notes: Outcome,
}

impl SessionRecord {
    fn new(payload: Vec<u8>, notes: Outcome) -> Self {
        Self {
            payload,
            user_agent: None,
            notes,
        }
    }
}

/// Outcome dictated by how reading ended, taking precedence over the simulated reply.
fn read_outcome(captured: &CapturedPayload) -> Option<Outcome> {
    match captured.end {
        ReadEnd::Cancelled => Some(Outcome::Shutdown),
        ReadEnd::Failed(_) => Some(Outcome::Reset),
        ReadEnd::Eof if captured.is_empty() => Some(Outcome::Empty),
        ReadEnd::TimedOut if captured.is_empty() => Some(Outcome::Timeout),
        _ => None,
    }
}

/// Shared state every session needs. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandler {
    sink: Arc<dyn EventSink>,
    rate_limiter: Arc<RateLimiter>,
    simulator: Arc<ResponseSimulator>,
    limits: ReadLimits,
}

impl SessionHandler {
    pub fn new(
        sink: Arc<dyn EventSink>,
        rate_limiter: Arc<RateLimiter>,
        simulator: Arc<ResponseSimulator>,
        limits: ReadLimits,
    ) -> Self {
        Self {
            sink,
            rate_limiter,
            simulator,
            limits,
        }
    }

    /// Runs one session to completion and emits its event.
    ///
    /// `cancel` aborts a pending read; the session then records `shutdown`.
    pub async fn handle_session<S>(
        &self,
        mut stream: S,
        meta: ConnectionMeta,
        mut cancel: ShutdownSignal,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(
            "[{}] {} session from {} on port {}",
            meta.id, meta.protocol, meta.client_addr, meta.dst_port
        );

        let record = if meta.protocol.is_http_like() {
            self.run_http(&mut stream, &meta, &mut cancel).await
        } else {
            self.run_ssh(&mut stream, &meta, &mut cancel).await
        };

        let _ = stream.shutdown().await;

        info!(
            "[{}] {} {} -> :{} {} ({} bytes)",
            meta.id,
            meta.protocol,
            meta.client_addr,
            meta.dst_port,
            record.notes,
            record.payload.len()
        );

        self.sink.emit(Event::new(
            meta.client_addr,
            meta.dst_port,
            meta.protocol,
            &record.payload,
            record.user_agent,
            record.notes,
        ));
    }

    async fn write_reply<S>(&self, stream: &mut S, reply: &[u8]) -> bool
    where
        S: AsyncWrite + Unpin,
    {
        let write = async {
            stream.write_all(reply).await?;
            stream.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        matches!(tokio::time::timeout(self.limits.timeout, write).await, Ok(Ok(())))
    }

    async fn run_ssh<S>(
        &self,
        stream: &mut S,
        meta: &ConnectionMeta,
        cancel: &mut ShutdownSignal,
    ) -> SessionRecord
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.rate_limiter.admit(meta.client_addr.ip(), Instant::now()) {
            return SessionRecord::new(Vec::new(), Outcome::RateLimited);
        }
        if cancel.is_triggered() {
            return SessionRecord::new(Vec::new(), Outcome::Shutdown);
        }

        let response = self.simulator.respond(Protocol::SSH, None);
        if let Some(reply) = &response.reply {
            if !self.write_reply(stream, reply).await {
                debug!("[{}] Banner write failed", meta.id);
                return SessionRecord::new(Vec::new(), Outcome::Reset);
            }
        }

        let captured = read_bounded(stream, self.limits, cancel, first_line_complete).await;
        let notes = read_outcome(&captured).unwrap_or(response.notes);
        SessionRecord::new(captured.data, notes)
    }

    async fn run_http<S>(
        &self,
        stream: &mut S,
        meta: &ConnectionMeta,
        cancel: &mut ShutdownSignal,
    ) -> SessionRecord
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let captured = read_bounded(stream, self.limits, cancel, http_message_complete).await;
        debug!(
            "[{}] Captured {} bytes ({:?}): {}",
            meta.id,
            captured.data.len(),
            captured.end,
            preview(&captured.data)
        );

        if !captured.can_reply() {
            let notes = read_outcome(&captured).unwrap_or(Outcome::Reset);
            return SessionRecord::new(captured.data, notes);
        }

        let request = (!captured.is_empty()).then(|| parse_request(&captured.data));
        let user_agent = request.as_ref().and_then(|r| r.user_agent());

        let notes = if !self.rate_limiter.admit(meta.client_addr.ip(), Instant::now()) {
            self.write_reply(stream, &templates::too_many_requests()).await;
            Outcome::RateLimited
        } else if let Some(notes) = read_outcome(&captured) {
            notes
        } else {
            let response = self.simulator.respond(meta.protocol, request.as_ref());
            match &response.reply {
                Some(reply) if !self.write_reply(stream, reply).await => Outcome::Reset,
                _ => response.notes,
            }
        };

        SessionRecord {
            payload: captured.data,
            user_agent,
            notes,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::types::ShutdownTrigger;
    use std::io::ErrorKind;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub events: Mutex<Vec<Event>>,
    }

    impl EventSink for MemorySink {
        fn emit(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl MemorySink {
        pub fn taken(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn handler(sink: Arc<MemorySink>, per_minute: u32, redirect_prob: f64) -> SessionHandler {
        SessionHandler::new(
            sink,
            Arc::new(RateLimiter::new(per_minute)),
            Arc::new(ResponseSimulator::with_seed(redirect_prob, 11)),
            ReadLimits {
                max_bytes: 4096,
                timeout: Duration::from_millis(2000),
            },
        )
    }

    fn meta(protocol: Protocol, port: u16) -> ConnectionMeta {
        let addr: SocketAddr = "198.51.100.7:51234".parse().unwrap();
        ConnectionMeta::new(addr, port, protocol)
    }

    #[tokio::test]
    async fn http_get_records_request_and_user_agent() {
        let sink = Arc::new(MemorySink::default());
        let request: &[u8] = b"GET /?test=123 HTTP/1.1\r\nHost: localhost\r\n\
            User-Agent: curl/8.14.1\r\nAccept: */*\r\n\r\n";
        let mock = Builder::new()
            .read(request)
            .write(&templates::welcome_page())
            .build();

        handler(sink.clone(), 10, 0.0)
            .handle_session(mock, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        let events = sink.taken();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.protocol, Protocol::HTTP);
        assert_eq!(event.dst_port, 80);
        assert_eq!(event.src_port, 51234);
        assert_eq!(event.user_agent.as_deref(), Some("curl/8.14.1"));
        assert!(event.raw_payload.contains("GET /?test=123 HTTP/1.1"));
        assert_eq!(event.notes, Outcome::Sent200);
    }

    #[tokio::test]
    async fn post_body_is_captured_across_reads() {
        let sink = Arc::new(MemorySink::default());
        let mock = Builder::new()
            .read(b"POST /login HTTP/1.1\r\nContent-Length: 28\r\n\r\n")
            .read(b"username=admin&password=test")
            .write(&templates::login_page("/login"))
            .build();

        handler(sink.clone(), 10, 1.0)
            .handle_session(mock, meta(Protocol::HTTPS, 443), ShutdownSignal::never())
            .await;

        let event = sink.taken().remove(0);
        assert!(event.raw_payload.ends_with("\r\n\r\nusername=admin&password=test"));
        assert_eq!(event.protocol, Protocol::HTTPS);
        assert_eq!(event.notes, Outcome::Sent200);
    }

    #[tokio::test]
    async fn redirect_is_noted() {
        let sink = Arc::new(MemorySink::default());
        let mock = Builder::new()
            .read(b"GET / HTTP/1.0\r\n\r\n")
            .write(&templates::redirect_to_login())
            .build();

        handler(sink.clone(), 10, 1.0)
            .handle_session(mock, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        assert_eq!(sink.taken()[0].notes, Outcome::Redirected);
    }

    #[tokio::test]
    async fn binary_input_gets_400_and_base64() {
        let sink = Arc::new(MemorySink::default());
        let hello = [0x16, 0x03, 0x01, 0x00, 0x05, 0xff, 0xfe];
        let mock = Builder::new()
            .read(&hello)
            .write(&templates::bad_request())
            .build();

        handler(sink.clone(), 10, 0.3)
            .handle_session(mock, meta(Protocol::HTTPS, 443), ShutdownSignal::never())
            .await;

        let event = sink.taken().remove(0);
        assert_eq!(event.notes, Outcome::Sent400);
        assert_eq!(event.payload_encoding, crate::storage::types::PayloadEncoding::Base64);
        assert_eq!(event.raw_payload, "FgMBAAX//g==");
    }

    #[tokio::test]
    async fn eleventh_http_request_is_rate_limited() {
        let sink = Arc::new(MemorySink::default());
        let handler = handler(sink.clone(), 10, 0.0);
        let request = b"GET / HTTP/1.1\r\n\r\n";

        for _ in 0..10 {
            let mock = Builder::new()
                .read(request)
                .write(&templates::welcome_page())
                .build();
            handler
                .handle_session(mock, meta(Protocol::HTTP, 80), ShutdownSignal::never())
                .await;
        }
        let mock = Builder::new()
            .read(request)
            .write(&templates::too_many_requests())
            .build();
        handler
            .handle_session(mock, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        let notes: Vec<_> = sink.taken().into_iter().map(|e| e.notes).collect();
        assert_eq!(notes.len(), 11);
        assert!(notes[..10].iter().all(|n| *n == Outcome::Sent200));
        assert_eq!(notes[10], Outcome::RateLimited);
    }

    #[tokio::test]
    async fn ssh_sends_banner_then_reads_greeting() {
        let sink = Arc::new(MemorySink::default());
        let mock = Builder::new()
            .write(templates::SSH_BANNER)
            .read(b"SSH-2.0-Go\r\n")
            .build();

        handler(sink.clone(), 10, 0.3)
            .handle_session(mock, meta(Protocol::SSH, 22), ShutdownSignal::never())
            .await;

        let event = sink.taken().remove(0);
        assert_eq!(event.notes, Outcome::SentBanner);
        assert_eq!(event.raw_payload, "SSH-2.0-Go\r\n");
        assert_eq!(event.user_agent, None);
    }

    #[tokio::test]
    async fn rate_limited_ssh_gets_no_banner() {
        let sink = Arc::new(MemorySink::default());
        let handler = handler(sink.clone(), 1, 0.3);

        let mock = Builder::new().write(templates::SSH_BANNER).build();
        handler
            .handle_session(mock, meta(Protocol::SSH, 22), ShutdownSignal::never())
            .await;
        let mock = Builder::new().build();
        handler
            .handle_session(mock, meta(Protocol::SSH, 22), ShutdownSignal::never())
            .await;

        let events = sink.taken();
        assert_eq!(events[0].notes, Outcome::Empty);
        assert_eq!(events[1].notes, Outcome::RateLimited);
        assert_eq!(events[1].raw_payload, "");
    }

    #[tokio::test]
    async fn empty_and_reset_connections_still_emit() {
        let sink = Arc::new(MemorySink::default());
        let handler = handler(sink.clone(), 0, 0.3);

        let empty = Builder::new().build();
        handler
            .handle_session(empty, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        let reset = Builder::new()
            .read(b"GET / HT")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();
        handler
            .handle_session(reset, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        let events = sink.taken();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].notes, Outcome::Empty);
        assert_eq!(events[1].notes, Outcome::Reset);
        assert_eq!(events[1].raw_payload, "GET / HT");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let sink = Arc::new(MemorySink::default());
        let (mut client, server) = tokio::io::duplex(1024);

        handler(sink.clone(), 10, 0.3)
            .handle_session(server, meta(Protocol::HTTP, 80), ShutdownSignal::never())
            .await;

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(sink.taken()[0].notes, Outcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_request_is_answered_after_timeout() {
        let sink = Arc::new(MemorySink::default());
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET /index.html HTTP/1.1\r\nHost: x").await.unwrap();

        handler(sink.clone(), 10, 0.0)
            .handle_session(server, meta(Protocol::HTTP, 8080), ShutdownSignal::never())
            .await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 200 OK\r\n"));
        let event = sink.taken().remove(0);
        assert_eq!(event.notes, Outcome::Sent200);
        assert_eq!(event.raw_payload, "GET /index.html HTTP/1.1\r\nHost: x");
    }

    #[tokio::test]
    async fn cancel_ends_a_waiting_session() {
        let sink = Arc::new(MemorySink::default());
        let (_client, server) = tokio::io::duplex(1024);
        let (trigger, signal) = ShutdownTrigger::new();
        let handler = handler(sink.clone(), 10, 0.3);

        let session = tokio::spawn(async move {
            handler
                .handle_session(server, meta(Protocol::HTTP, 80), signal)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sink.taken()[0].notes, Outcome::Shutdown);
    }
}
