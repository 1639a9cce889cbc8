use crate::configuration::config::Config;
use crate::configuration::types::ServiceConfig;
use crate::data_capture::types::ReadLimits;
use crate::error_handling::types::*;
use crate::network::network_listener::{ListenerManager, ListenerStats};
use crate::network::rate_limiter::RateLimiter;
use crate::network::types::{ShutdownSignal, ShutdownTrigger};
use crate::response_simulation::simulator::ResponseSimulator;
use crate::session_management::SessionHandler;
use crate::storage::file_storage::JsonlEventLog;
use crate::web_interface::web_server::WebServer;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Builds every component from a validated [`Config`] and wires them together.
pub struct Controller {
    config: Config,
}

/// A started honeypot: listeners accepting, writer running, dashboard serving if enabled.
pub struct Honeypot {
    trigger: ShutdownTrigger,
    addrs: Vec<(ServiceConfig, SocketAddr)>,
    stats: Arc<ListenerStats>,
    sink: Arc<JsonlEventLog>,
    listeners: JoinHandle<Result<(), NetworkError>>,
    sweeper: JoinHandle<()>,
    dashboard: Option<JoinHandle<()>>,
}

impl Controller {
    /// Validates `config`. Nothing is bound or opened yet.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        if let Err(err) = config.validate() {
            error!("[!] Invalid configuration: {}", err);
            return Err(ControllerError::ConfigurationError(err));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the event log, binds the listeners, and starts accepting connections.
    pub async fn start(&self) -> Result<Honeypot, ControllerError> {
        let config = &self.config;
        config.ensure_log_directory()?;

        let sink = Arc::new(JsonlEventLog::open(&config.log_path)?);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));
        let simulator = Arc::new(ResponseSimulator::new(config.respond_with_redirect_prob));
        let handler = SessionHandler::new(
            sink.clone(),
            rate_limiter.clone(),
            simulator,
            ReadLimits {
                max_bytes: config.read_limit_bytes,
                timeout: config.read_timeout(),
            },
        );

        let mut listener = ListenerManager::new(
            handler,
            config.max_concurrent_clients,
            config.shutdown_grace(),
        );
        listener
            .bind_services(config.bind_ip()?, &config.services())
            .await?;
        let addrs = listener.local_addrs();
        let stats = listener.stats();

        let dashboard = match config.dashboard_port {
            Some(port) => {
                let addr = SocketAddr::new(config.bind_ip()?, port);
                Some(WebServer::new(config.log_path.clone()).spawn(addr).await?)
            }
            None => None,
        };

        let (trigger, signal) = ShutdownTrigger::new();
        let sweeper = tokio::spawn(sweep_rate_limiter(rate_limiter, trigger.subscribe()));
        let listeners = tokio::spawn(listener.run(signal));

        info!(
            "Honeypot started: {} listener(s), max {} concurrent client(s), {} per minute per IP",
            addrs.len(),
            config.max_concurrent_clients,
            config.rate_limit_per_min
        );

        Ok(Honeypot {
            trigger,
            addrs,
            stats,
            sink,
            listeners,
            sweeper,
            dashboard,
        })
    }

    /// Runs until SIGINT or SIGTERM, then shuts down gracefully.
    pub async fn run(self) -> Result<(), ControllerError> {
        let honeypot = self.start().await?;
        wait_for_signal().await;
        info!("Shutdown requested");
        honeypot.shutdown().await
    }
}

impl Honeypot {
    /// Bound address of every listener.
    pub fn local_addrs(&self) -> &[(ServiceConfig, SocketAddr)] {
        &self.addrs
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    pub fn event_log(&self) -> Arc<JsonlEventLog> {
        self.sink.clone()
    }

    /// Stops accepting, waits for in-flight sessions, stops the dashboard, and drains the
    /// event log.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        self.trigger.trigger();

        let listeners = match self.listeners.await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(e) => {
                error!("[!] Listener task failed: {}", e);
                Ok(())
            }
        };

        if let Some(dashboard) = self.dashboard {
            dashboard.abort();
        }
        if let Err(e) = self.sweeper.await {
            warn!("Rate limiter sweep task failed: {}", e);
        }

        self.sink.close().await?;
        info!(
            "Event log closed: {} written, {} dropped",
            self.sink.written_count(),
            self.sink.dropped_count()
        );
        listeners
    }
}

async fn sweep_rate_limiter(limiter: Arc<RateLimiter>, mut shutdown: ShutdownSignal) {
    if !limiter.is_enabled() {
        return;
    }
    let mut ticker = tokio::time::interval(limiter.sweep_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {
                let removed = limiter.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(
                        "Evicted {} idle rate limit entries, {} tracked",
                        removed,
                        limiter.tracked_count()
                    );
                }
            }
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[!] Cannot listen for Ctrl-C, shutting down: {}", e);
    }
}
