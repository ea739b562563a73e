//! HTTP front end
//!
//! `GET /{name}` streams a cached file, `HEAD /{name}` answers with its
//! length only. The lease taken by `open` is owned by the response body, so
//! the file cannot be evicted until the response has been fully sent or the
//! client goes away. Each chunk is read on the blocking pool and the thread
//! is handed back before the chunk is sent, so a slow client never pins a
//! blocking thread.

use std::io::{self, Read};
use std::net::SocketAddr;

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use fetch_core::{CacheError, CacheStats, OriginError};

use crate::entry::CachedFile;
use crate::facade::Cache;

/// Size of each chunk read from a cached file
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        let status = match &err {
            CacheError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            CacheError::Origin(OriginError::NotFound(_)) => StatusCode::NOT_FOUND,
            CacheError::Origin(_) | CacheError::SizeMismatch { .. } => StatusCode::BAD_GATEWAY,
            CacheError::CapacityUnsatisfiable { .. } => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<axum::http::Error> for ResponseError {
    fn from(err: axum::http::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err: err.into(),
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            error!("{:#}", self.err);
        } else {
            debug!("{:#}", self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// Error body returned to clients
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}

pub fn create_app(cache: Cache) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/_/stats", get(stats))
        .route("/:name", get(serve_file))
        .layer(TraceLayer::new_for_http())
        .with_state(cache)
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn stats(State(cache): State<Cache>) -> Result<Json<CacheStats>, ResponseError> {
    let stats = tokio::task::spawn_blocking(move || cache.stats())
        .await
        .map_err(|_| CacheError::Shutdown)??;
    Ok(Json(stats))
}

async fn serve_file(
    State(cache): State<Cache>,
    Path(name): Path<String>,
    method: Method,
) -> Result<Response<Body>, ResponseError> {
    let file = cache.open_async(&name).await?;

    let response = Response::builder()
        .header(header::CONTENT_LENGTH, file.len())
        .header(header::CONTENT_TYPE, "application/octet-stream");

    if method == Method::HEAD {
        return Ok(response.body(Body::empty())?);
    }

    Ok(response.body(stream_body(file))?)
}

/// Stream a lease as a response body
///
/// The body owns the lease between chunks. It is released at EOF, after a
/// read error, or when the response is dropped.
fn stream_body(file: CachedFile) -> Body {
    let stream = futures::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let read = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let chunk = file.read(&mut buf).map(|n| {
                buf.truncate(n);
                Bytes::from(buf)
            });
            (file, chunk)
        })
        .await;

        match read {
            Ok((file, Ok(chunk))) if chunk.is_empty() => {
                debug!("finished streaming {}", file.name());
                None
            }
            Ok((file, Ok(chunk))) => Some((Ok(chunk), Some(file))),
            Ok((file, Err(e))) => {
                error!("Failed to read cached file {}: {}", file.name(), e);
                Some((Err(e), None))
            }
            Err(e) => Some((Err(io::Error::other(e)), None)),
        }
    });
    Body::from_stream(stream)
}

/// Serve `app` on `addr` until ctrl-c
pub async fn serve(addr: SocketAddr, cache: Cache) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, create_app(cache))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received ctrl-c, stopping HTTP server");
        })
        .await
        .context("HTTP server failed")
}
