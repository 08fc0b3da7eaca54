use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use tokio_util::io::ReaderStream;

use crate::framing::{self, Validators};
use crate::methods::{Result, WorkingPath};
use crate::vpath::{self, PathError};
use crate::ServerState;

const CHUNK_SIZE: usize = 64 * 1024;

/// Serves files beneath the static root: `favicon.ico` and everything
/// under `/static/`.
pub async fn handle(
    Extension(state): Extension<Arc<ServerState>>,
    Extension(WorkingPath(path)): Extension<WorkingPath>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let relative = vpath::sanitize(&state.static_root, &path)?;
    let target = state.static_root.join(&relative);

    let metadata = tokio::fs::metadata(&target)
        .await
        .map_err(|_| PathError::unfit("no such static file"))?;
    if !metadata.is_file() {
        return Err(PathError::unfit("requested path is not a file").into());
    }

    let validators = Validators::for_mtime(
        metadata
            .modified()
            .map_err(|_| PathError::unfit("static file carries no modification time"))?,
    );

    if framing::not_modified(&headers, &validators) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        framing::apply_validators(response.headers_mut(), &validators);
        return Ok(response);
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let file = tokio::fs::File::open(&target)
            .await
            .map_err(|_| PathError::unfit("static file went away mid-request"))?;
        Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE))
    };

    let mimetype = mime_guess::from_path(&target)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let mut response = Response::new(body);
    if let Ok(value) = HeaderValue::from_str(mimetype) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&metadata.len().to_string()) {
        response.headers_mut().insert(header::CONTENT_LENGTH, value);
    }
    framing::apply_validators(response.headers_mut(), &validators);

    Ok(response)
}
