use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use log::error;
use rust_embed::RustEmbed;
use warp::{http::StatusCode, path::Tail, reply, Filter, Rejection, Reply};

use super::types::{ApiError, DeleteResponse};
use crate::storage::event_filter::{read_events, truncate_events, EventFilter};

/// Static dashboard files, compiled into the binary.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/"]
pub struct Assets;

fn json_status<T: serde::Serialize>(body: &T, status: StatusCode) -> reply::Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn api_error(message: impl Into<String>, status: StatusCode) -> reply::Response {
    json_status(
        &ApiError {
            message: message.into(),
        },
        status,
    )
}

/// Embedded file at `path`, with a content type guessed from its extension.
pub fn asset_response(path: &str) -> reply::Response {
    match Assets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            reply::with_header(file.data.into_owned(), "Content-Type", mime.to_string())
                .into_response()
        }
        None => api_error("Not found", StatusCode::NOT_FOUND),
    }
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Builds an [`EventFilter`] from query parameters. Blank parameters are ignored.
pub fn parse_filter(params: &HashMap<String, String>) -> Result<EventFilter, String> {
    let port = param(params, "port")
        .map(|v| v.parse::<u16>().map_err(|_| format!("Invalid port: {}", v)))
        .transpose()?;
    let limit = param(params, "limit")
        .map(|v| v.parse::<usize>().map_err(|_| format!("Invalid limit: {}", v)))
        .transpose()?;

    Ok(EventFilter {
        port,
        ip: param(params, "ip").map(str::to_owned),
        protocol: param(params, "protocol").map(str::to_owned),
        limit,
    })
}

pub async fn list_logs(
    log_path: Arc<PathBuf>,
    params: HashMap<String, String>,
) -> Result<reply::Response, Infallible> {
    let filter = match parse_filter(&params) {
        Ok(f) => f,
        Err(message) => return Ok(api_error(message, StatusCode::BAD_REQUEST)),
    };

    let read = tokio::task::spawn_blocking(move || read_events(&log_path, &filter)).await;
    match read {
        Ok(Ok(events)) => Ok(reply::json(&events).into_response()),
        Ok(Err(e)) => {
            error!("Failed to read event log: {}", e);
            Ok(api_error("Failed to load logs", StatusCode::INTERNAL_SERVER_ERROR))
        }
        Err(e) => {
            error!("Event log reader panicked: {}", e);
            Ok(api_error("Failed to load logs", StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

pub async fn delete_logs(log_path: Arc<PathBuf>) -> Result<reply::Response, Infallible> {
    let truncated = tokio::task::spawn_blocking(move || truncate_events(&log_path)).await;
    let failure = match truncated {
        Ok(Ok(())) => return Ok(json_status(&DeleteResponse::ok(), StatusCode::OK)),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    };
    error!("Failed to delete event log: {}", failure);
    Ok(json_status(
        &DeleteResponse::error(failure),
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

fn with_log_path(
    log_path: Arc<PathBuf>,
) -> impl Filter<Extract = (Arc<PathBuf>,), Error = Infallible> + Clone {
    warp::any().map(move || log_path.clone())
}

/// GET /
pub fn index_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| asset_response("index.html"))
}

/// GET /assets/<file>
pub fn assets_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("assets")
        .and(warp::path::tail())
        .and(warp::get())
        .map(|tail: Tail| asset_response(tail.as_str()))
}

/// GET /api/logs?port=&ip=&protocol=&limit=
pub fn logs_route(
    log_path: Arc<PathBuf>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "logs")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_log_path(log_path))
        .and_then(|params, path| list_logs(path, params))
}

/// POST /api/delete_logs
pub fn delete_logs_route(
    log_path: Arc<PathBuf>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "delete_logs")
        .and(warp::post())
        .and(with_log_path(log_path))
        .and_then(delete_logs)
}
