//! # Network Listener Module
//!
//! This module owns the listening sockets. [`ListenerManager`] binds one TCP listener per
//! enabled service, accepts connections, and dispatches each one to a [`SessionHandler`] on its
//! own task, bounded by a global pool of connection slots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ ListenerManager  │───▶│ SessionHandler  │
//! │ Connections     │    │                  │    │ (one task each) │
//! └─────────────────┘    │ - accept loops   │    └─────────────────┘
//!                        │ - slot pool      │
//!                        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ruche::configuration::types::{Protocol, ServiceConfig};
//! use ruche::data_capture::types::ReadLimits;
//! use ruche::error_handling::types::NetworkError;
//! use ruche::network::network_listener::ListenerManager;
//! use ruche::network::rate_limiter::RateLimiter;
//! use ruche::network::types::ShutdownTrigger;
//! use ruche::response_simulation::ResponseSimulator;
//! use ruche::session_management::SessionHandler;
//! use ruche::storage::JsonlEventLog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(JsonlEventLog::open("logs/events.jsonl")?);
//!     let handler = SessionHandler::new(
//!         sink,
//!         Arc::new(RateLimiter::new(10)),
//!         Arc::new(ResponseSimulator::new(0.3)),
//!         ReadLimits { max_bytes: 4096, timeout: Duration::from_secs(2) },
//!     );
//!
//!     let mut listener = ListenerManager::new(handler, 100, Duration::from_secs(5));
//!     listener
//!         .bind_services("0.0.0.0".parse()?, &[ServiceConfig::new(Protocol::HTTP, 8080)])
//!         .await?;
//!
//!     let (_trigger, signal) = ShutdownTrigger::new();
//!     listener.run(signal).await?;
//!     Ok(())
//! }
//! ```

use super::types::{ConnectionMeta, ConnectionSlot, ShutdownSignal, ShutdownTrigger};
use crate::configuration::types::ServiceConfig;
use crate::error_handling::types::NetworkError;
use crate::session_management::SessionHandler;
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

const LISTEN_BACKLOG: u32 = 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Counters shared by every accept loop.
#[derive(Debug, Default)]
pub struct ListenerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl ListenerStats {
    /// Connections handed to a session handler.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections closed because every slot was in use.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

struct BoundService {
    service: ServiceConfig,
    local_addr: SocketAddr,
    listener: TcpListener,
}

/// What an accept loop hands back once it stops accepting.
struct StoppedLoop {
    listener: TcpListener,
    sessions: JoinSet<()>,
}

/// A network listener that manages the TCP sockets of every configured service.
///
/// `ListenerManager` is responsible for:
/// - Binding one socket per enabled service, skipping the ones that fail
/// - Accepting connections while a connection slot is free
/// - Running each admitted connection through the [`SessionHandler`]
/// - Draining in-flight sessions on shutdown
pub struct ListenerManager {
    listeners: Vec<BoundService>,
    handler: SessionHandler,
    slots: Arc<Semaphore>,
    shutdown_grace: Duration,
    stats: Arc<ListenerStats>,
}

impl ListenerManager {
    /// Creates a manager allowing at most `max_clients` concurrent sessions.
    pub fn new(handler: SessionHandler, max_clients: usize, shutdown_grace: Duration) -> Self {
        let max_clients = max_clients.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            listeners: Vec::new(),
            handler,
            slots: Arc::new(Semaphore::new(max_clients)),
            shutdown_grace,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    fn bind_one(ip: IpAddr, port: u16) -> Result<(TcpListener, SocketAddr), NetworkError> {
        let bind = || -> std::io::Result<(TcpListener, SocketAddr)> {
            let socket = match ip {
                IpAddr::V4(_) => TcpSocket::new_v4()?,
                IpAddr::V6(_) => TcpSocket::new_v6()?,
            };
            socket.set_reuseaddr(true)?;
            socket.bind(SocketAddr::new(ip, port))?;
            let listener = socket.listen(LISTEN_BACKLOG)?;
            let local_addr = listener.local_addr()?;
            Ok((listener, local_addr))
        };
        bind().map_err(NetworkError::BindError)
    }

    /// Binds a listener for every enabled service on `ip`.
    ///
    /// A service that fails to bind is logged and skipped. Returns
    /// [`NetworkError::NoListenerBound`] when nothing could be bound at all.
    pub async fn bind_services(
        &mut self,
        ip: IpAddr,
        services: &[ServiceConfig],
    ) -> Result<(), NetworkError> {
        for service in services.iter().filter(|s| s.enabled) {
            match Self::bind_one(ip, service.port) {
                Ok((listener, local_addr)) => {
                    info!("{} listener bound on {}", service.protocol, local_addr);
                    self.listeners.push(BoundService {
                        service: service.clone(),
                        local_addr,
                        listener,
                    });
                }
                Err(e) => {
                    error!("[!] {} on {}:{}: {}", service.name, ip, service.port, e);
                }
            }
        }

        if self.listeners.is_empty() {
            return Err(NetworkError::NoListenerBound);
        }
        Ok(())
    }

    /// Addresses actually bound, with the service each one serves.
    pub fn local_addrs(&self) -> Vec<(ServiceConfig, SocketAddr)> {
        self.listeners
            .iter()
            .map(|b| (b.service.clone(), b.local_addr))
            .collect()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Accepts connections on every bound listener until `shutdown` fires.
    ///
    /// In-flight sessions then get the shutdown grace period to finish on their own. Past it,
    /// pending reads are cancelled. Returns once every session has emitted its event.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), NetworkError> {
        if self.listeners.is_empty() {
            return Err(NetworkError::NoListenerBound);
        }

        let (cancel, cancel_signal) = ShutdownTrigger::new();
        let mut loops = JoinSet::new();
        for bound in self.listeners {
            loops.spawn(accept_loop(
                bound,
                self.handler.clone(),
                self.slots.clone(),
                self.stats.clone(),
                shutdown.clone(),
                cancel_signal.clone(),
            ));
        }

        let mut stopped = Vec::new();
        while let Some(finished) = loops.join_next().await {
            match finished {
                Ok(stopped_loop) => stopped.push(stopped_loop),
                Err(e) => error!("[!] Accept loop ended abnormally: {}", e),
            }
        }

        let in_flight: usize = stopped.iter().map(|s| s.sessions.len()).sum();
        if in_flight > 0 {
            info!(
                "Waiting up to {:?} for {} in-flight session(s)",
                self.shutdown_grace, in_flight
            );
        }
        let drained = tokio::time::timeout(self.shutdown_grace, drain_sessions(&mut stopped))
            .await
            .is_ok();
        if drained {
            debug!("All sessions finished");
        } else {
            let remaining: usize = stopped.iter().map(|s| s.sessions.len()).sum();
            warn!(
                "Shutdown grace of {:?} elapsed, cancelling {} session(s)",
                self.shutdown_grace, remaining
            );
            cancel.trigger();
            drain_sessions(&mut stopped).await;
        }

        drop(stopped);
        info!(
            "Listeners stopped ({} accepted, {} rejected)",
            self.stats.accepted(),
            self.stats.rejected()
        );
        Ok(())
    }
}

fn session_finished(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("[!] Session task failed: {}", e);
    }
}

async fn drain_sessions(stopped: &mut [StoppedLoop]) {
    for stopped_loop in stopped.iter_mut() {
        while let Some(result) = stopped_loop.sessions.join_next().await {
            session_finished(result);
        }
    }
}

async fn accept_loop(
    bound: BoundService,
    handler: SessionHandler,
    slots: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
    mut shutdown: ShutdownSignal,
    cancel: ShutdownSignal,
) -> StoppedLoop {
    let BoundService {
        service,
        local_addr,
        listener,
    } = bound;
    let mut sessions = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.triggered() => break,
            Some(result) = sessions.join_next(), if !sessions.is_empty() => {
                session_finished(result);
                continue;
            }
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, client_addr)) => {
                let Ok(permit) = slots.clone().try_acquire_owned() else {
                    stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Connection from {} to {} rejected: all slots in use",
                        client_addr, local_addr
                    );
                    drop(stream);
                    continue;
                };
                stats.accepted.fetch_add(1, Ordering::Relaxed);

                let slot = ConnectionSlot::new(permit);
                let meta = ConnectionMeta::new(client_addr, local_addr.port(), service.protocol);
                let handler = handler.clone();
                let cancel = cancel.clone();
                sessions.spawn(async move {
                    let _slot = slot;
                    handler.handle_session(stream, meta, cancel).await;
                });
            }
            Err(e) => {
                error!("[!] Accept failed on {}: {}", local_addr, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    debug!(
        "{} accept loop on {} stopped with {} session(s) running",
        service.protocol,
        local_addr,
        sessions.len()
    );
    StoppedLoop { listener, sessions }
}
