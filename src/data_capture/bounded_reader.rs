use crate::data_capture::payload::preview;
use crate::data_capture::types::{CapturedPayload, ReadEnd, ReadLimits};
use crate::network::types::ShutdownSignal;
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

const CHUNK_SIZE: usize = 4096;

enum Step {
    Read(Result<std::io::Result<usize>, tokio::time::error::Elapsed>),
    Cancelled,
}

/// Reads from `reader` until `is_complete` accepts the buffered input, the byte budget is
/// spent, the peer closes, the deadline passes or `cancel` fires.
///
/// The deadline covers the whole read, not each chunk, so a client trickling one byte at a
/// time cannot hold the session open past `limits.timeout`. Never returns more than
/// `limits.max_bytes` bytes.
pub async fn read_bounded<R, F>(
    reader: &mut R,
    limits: ReadLimits,
    cancel: &mut ShutdownSignal,
    is_complete: F,
) -> CapturedPayload
where
    R: AsyncRead + Unpin,
    F: Fn(&[u8]) -> bool,
{
    let deadline = Instant::now() + limits.timeout;
    let mut data = Vec::with_capacity(limits.max_bytes.min(CHUNK_SIZE));
    let mut buf = vec![0u8; limits.max_bytes.clamp(1, CHUNK_SIZE)];

    if cancel.is_triggered() {
        return CapturedPayload {
            data,
            end: ReadEnd::Cancelled,
        };
    }

    let end = loop {
        let remaining = limits.max_bytes.saturating_sub(data.len());
        if remaining == 0 {
            break ReadEnd::LimitReached;
        }
        let want = remaining.min(buf.len());

        let step = tokio::select! {
            res = timeout_at(deadline, reader.read(&mut buf[..want])) => Step::Read(res),
            _ = cancel.triggered() => Step::Cancelled,
        };

        match step {
            Step::Cancelled => break ReadEnd::Cancelled,
            Step::Read(Err(_)) => break ReadEnd::TimedOut,
            Step::Read(Ok(Err(e))) => break ReadEnd::Failed(e.kind()),
            Step::Read(Ok(Ok(0))) => break ReadEnd::Eof,
            Step::Read(Ok(Ok(n))) => {
                data.extend_from_slice(&buf[..n]);
                trace!("Read {} bytes: {}", n, preview(&buf[..n]));
                if is_complete(&data) {
                    break ReadEnd::Complete;
                }
            }
        }
    };

    CapturedPayload { data, end }
}

/// Completion rule for line-oriented greetings such as SSH.
pub fn first_line_complete(data: &[u8]) -> bool {
    data.contains(&b'\n')
}

/// Never complete; read until a limit or the peer stops the exchange.
pub fn never_complete(_: &[u8]) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::ShutdownTrigger;
    use std::io::ErrorKind;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn limits(max_bytes: usize, millis: u64) -> ReadLimits {
        ReadLimits {
            max_bytes,
            timeout: Duration::from_millis(millis),
        }
    }

    #[tokio::test]
    async fn stops_at_first_line() {
        let mut mock = Builder::new()
            .read(b"SSH-2.0-")
            .read(b"libssh_0.9.6\r\nextra")
            .build();
        let mut shutdown = ShutdownSignal::never();
        let got =
            read_bounded(&mut mock, limits(4096, 2000), &mut shutdown, first_line_complete).await;
        assert_eq!(got.end, ReadEnd::Complete);
        assert_eq!(got.data, b"SSH-2.0-libssh_0.9.6\r\nextra");
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[b'A'; 16]).await.unwrap();
        let mut shutdown = ShutdownSignal::never();
        let got = read_bounded(&mut server, limits(10, 2000), &mut shutdown, never_complete).await;
        assert_eq!(got.end, ReadEnd::LimitReached);
        assert_eq!(got.data.len(), 10);
    }

    #[tokio::test]
    async fn reports_eof_and_errors() {
        let mut mock = Builder::new().read(b"partial").build();
        let mut shutdown = ShutdownSignal::never();
        let got = read_bounded(&mut mock, limits(4096, 2000), &mut shutdown, never_complete).await;
        assert_eq!(got.end, ReadEnd::Eof);
        assert_eq!(got.data, b"partial");

        let mut mock = Builder::new()
            .read(b"GET")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();
        let got = read_bounded(&mut mock, limits(4096, 2000), &mut shutdown, never_complete).await;
        assert_eq!(got.end, ReadEnd::Failed(ErrorKind::ConnectionReset));
        assert_eq!(got.data, b"GET");
        assert!(!got.can_reply());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut shutdown = ShutdownSignal::never();
        client.write_all(b"SSH").await.unwrap();

        let started = Instant::now();
        let got =
            read_bounded(&mut server, limits(4096, 2000), &mut shutdown, first_line_complete).await;
        assert_eq!(got.end, ReadEnd::TimedOut);
        assert_eq!(got.data, b"SSH");
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(got.can_reply());
    }

    #[tokio::test]
    async fn shutdown_cancels_a_pending_read() {
        let (_client, mut server) = tokio::io::duplex(64);
        let (trigger, mut shutdown) = ShutdownTrigger::new();

        let reader = tokio::spawn(async move {
            read_bounded(&mut server, limits(4096, 60_000), &mut shutdown, never_complete).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let got = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.end, ReadEnd::Cancelled);
    }
}
