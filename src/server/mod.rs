//! HTTP server.
//!
//! One route: `POST /` with the raw machine configuration as the body.
//! Responds with `{"filename": "<fingerprint>.qcow2"}`, 200 when the image
//! was cached and 201 when it was just built.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::Orchestrator;
use crate::domain::BuildRequest;

/// Largest accepted configuration body
pub const MAX_CONFIG_BYTES: usize = 16 * 1024 * 1024;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub filename: String,
}

/// Requests rejected before any build work happens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Provide a valid config")]
    InvalidConfig,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        match self {
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "POST")],
                self.to_string(),
            )
                .into_response(),
            Self::InvalidConfig => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
        }
    }
}

/// Build the application router
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/", any(create_image))
        .layer(DefaultBodyLimit::max(MAX_CONFIG_BYTES))
        .with_state(orchestrator)
}

async fn create_image(
    State(orchestrator): State<Arc<Orchestrator>>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return RequestError::MethodNotAllowed.into_response();
    }

    let config = match body {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return RequestError::InvalidConfig.into_response(),
        Err(rejection) => {
            debug!(error = %rejection, "Unreadable request body");
            return RequestError::InvalidConfig.into_response();
        }
    };

    let request = BuildRequest::new(config.to_vec());

    match orchestrator.submit(request).await {
        Ok(outcome) => {
            let status = if outcome.is_cache_hit() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            let body = ImageResponse {
                filename: outcome.file_name(),
            };
            (status, Json(body)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.reason()).into_response(),
    }
}

/// Serve on an already bound listener until shutdown
pub async fn serve(listener: TcpListener, orchestrator: Arc<Orchestrator>) -> Result<()> {
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Error running server")
}

/// Bind `addr` and serve
pub async fn run(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Error starting server on {}", addr))?;

    info!("Starting server on {}...", listener.local_addr()?);
    serve(listener, orchestrator).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
