use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};

use crate::content::{self, StreamBody};
use crate::framing::{self, Validators};
use crate::methods::{Result, WorkingPath};
use crate::ServerState;

/// The default tail handler: any residual path is treated as a virtual
/// repository path and answered with blob bytes or a subtree ZIP.
pub async fn handle(
    Extension(state): Extension<Arc<ServerState>>,
    Extension(WorkingPath(path)): Extension<WorkingPath>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let stream = content::stream(state.served_root.clone(), path).await?;
    let validators = Validators::for_commit(&stream.commit);

    if framing::not_modified(&headers, &validators) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        framing::apply_validators(response.headers_mut(), &validators);
        return Ok(response);
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        match stream.body {
            StreamBody::Blob(bytes) => Body::from(bytes),
            StreamBody::Archive(archive) => Body::from_stream(archive),
        }
    };

    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&stream.mimetype) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(size) = stream.size {
        if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
            response_headers.insert(header::CONTENT_LENGTH, value);
        }
    }
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        framing::content_disposition(&stream.filename),
    );
    framing::apply_validators(response_headers, &validators);

    Ok(response)
}
