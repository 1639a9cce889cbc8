use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use warp::{Filter, Rejection, Reply};

use super::routes::{assets_route, delete_logs_route, index_route, logs_route};
use crate::error_handling::types::WebError;

/// Read-only dashboard over the event log file.
pub struct WebServer {
    log_path: Arc<PathBuf>,
}

impl WebServer {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: Arc::new(log_path.into()),
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        index_route()
            .or(assets_route())
            .or(logs_route(self.log_path.clone()))
            .or(delete_logs_route(self.log_path.clone()))
    }

    /// Binds `addr` and serves the dashboard from a background task that runs until aborted.
    pub async fn spawn(self, addr: SocketAddr) -> Result<JoinHandle<()>, WebError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;

        let routes = self.routes();
        info!("Dashboard listening on http://{}", local_addr);
        Ok(tokio::spawn(async move {
            warp::serve(routes).incoming(listener).run().await;
        }))
    }
}
