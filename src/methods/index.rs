use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};

use crate::framing::{self, Validators};
use crate::methods::Result;
use crate::ServerState;

/// Serves the landing page from the static root with mtime-keyed
/// conditional-GET.
pub async fn handle(
    Extension(state): Extension<Arc<ServerState>>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let path = state.static_root.join("index.html");

    let metadata = tokio::fs::metadata(&path)
        .await
        .context("index.html has gone missing from the static root")?;
    let validators = Validators::for_mtime(
        metadata
            .modified()
            .context("index.html carries no modification time")?,
    );

    if framing::not_modified(&headers, &validators) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        framing::apply_validators(response.headers_mut(), &validators);
        return Ok(response);
    }

    let contents = tokio::fs::read(&path)
        .await
        .context("failed to read index.html")?;

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(contents)
    };

    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=UTF-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&metadata.len().to_string()) {
        response.headers_mut().insert(header::CONTENT_LENGTH, value);
    }
    framing::apply_validators(response.headers_mut(), &validators);

    Ok(response)
}
