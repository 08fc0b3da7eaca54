use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
    response::Response,
    Extension,
};

use crate::methods::Result;
use crate::ServerState;

/// Upper bound on request bodies; RPC payloads are tiny in practice.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// JSON-RPC over HTTP POST. The engine always produces a reply body,
/// even for malformed requests, so this handler never surfaces RPC
/// failures as HTTP errors.
pub async fn handle(
    Extension(state): Extension<Arc<ServerState>>,
    request: Request<Body>,
) -> Result<Response> {
    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE)
        .await
        .context("failed to read request body")?;
    let text = String::from_utf8_lossy(&body).into_owned();

    let reply = tokio::task::spawn_blocking(move || state.rpc.process(&text))
        .await
        .context("failed to join Tokio task")?;

    let mut response = Response::new(Body::from(reply));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );

    Ok(response)
}
