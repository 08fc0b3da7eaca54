//! Request routing. Every request funnels through [`service`], which
//! strips the optional decorative URI marker, matches the path against
//! the route inventory in registration order and forwards to the first
//! matching handler. Residual paths belong to the fuzzy handler.

pub mod fuzzy;
pub mod index;
pub mod rpc;
pub mod smart_git;
pub mod statics;

use std::sync::Arc;

use axum::{
    body::Body,
    handler::HandlerWithoutStateExt,
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use tower::{util::BoxCloneService, Service};
use tracing::{debug, error};

use crate::layers::UnwrapInfallible;
use crate::vpath::PathError;
use crate::ServerState;

/// The portion of the URI a handler should consume, stripped of
/// decoration and the route's own fixed segments.
#[derive(Clone)]
pub struct WorkingPath(pub String);

/// Validated smart-HTTP service suffix: `upload-pack` or `receive-pack`.
#[derive(Clone)]
pub struct GitService(pub String);

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub struct Error(Kind);

enum Kind {
    Forbidden(PathError),
    NotFound(PathError),
    Internal(anyhow::Error),
}

impl From<PathError> for Error {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Escape(_) => Self(Kind::Forbidden(err)),
            PathError::Unfit(_) => Self(Kind::NotFound(err)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self(Kind::Internal(err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Kind::Forbidden(err) => {
                debug!(%err, "rejected path escape");
                StatusCode::FORBIDDEN
            }
            Kind::NotFound(err) => {
                debug!(%err, "unresolvable virtual path");
                StatusCode::NOT_FOUND
            }
            Kind::Internal(err) => {
                error!(?err, "handler failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        canned(status)
    }
}

/// Status line, text/plain, empty body.
pub fn canned(status: StatusCode) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        String::new(),
    )
        .into_response()
}

const GET_HEAD: &[Method] = &[Method::GET, Method::HEAD];
const POST: &[Method] = &[Method::POST];

pub async fn service(mut request: Request<Body>) -> Response {
    let state = request
        .extensions()
        .get::<Arc<ServerState>>()
        .expect("server state missing")
        .clone();

    let Ok(decoded) = percent_decode_str(request.uri().path()).decode_utf8() else {
        return canned(StatusCode::BAD_REQUEST);
    };
    let decoded = decoded.into_owned();

    let Some(working) = strip_decoration(&decoded, &state.uri_marker) else {
        return canned(StatusCode::NOT_FOUND);
    };

    macro_rules! h {
        ($handler:expr) => {
            BoxCloneService::new($handler.into_service())
        };
    }

    let method = request.method().clone();
    let query = request.uri().query().unwrap_or("").to_string();

    let mut working_path = None;
    let mut git_service = None;

    // first full match wins; the fuzzy handler owns every residual path
    let (mut handler, allowed): (BoxCloneService<_, Response, _>, &[Method]) =
        if working == "/" || working.is_empty() {
            (h!(index::handle), GET_HEAD)
        } else if working.trim_end_matches('/') == "/rpc" {
            (h!(rpc::handle), POST)
        } else if working == "/favicon.ico" {
            working_path = Some("favicon.ico".to_string());
            (h!(statics::handle), GET_HEAD)
        } else if let Some(rest) = working.strip_prefix("/static/") {
            working_path = Some(rest.to_string());
            (h!(statics::handle), GET_HEAD)
        } else if let (Some(repo), Some(service)) =
            (working.strip_suffix("/info/refs"), requested_service(&query))
        {
            working_path = Some(repo.trim_matches('/').to_string());
            git_service = Some(service);
            (h!(smart_git::info_refs), GET_HEAD)
        } else if let Some((repo, command)) = smart_rpc_route(&working) {
            let Some(service) = validated_service(command) else {
                return canned(StatusCode::NOT_FOUND);
            };
            working_path = Some(repo.to_string());
            git_service = Some(service);
            (h!(smart_git::rpc), POST)
        } else {
            working_path = Some(working.trim_start_matches('/').to_string());
            (h!(fuzzy::handle), GET_HEAD)
        };

    if !allowed.contains(&method) {
        return canned(StatusCode::METHOD_NOT_ALLOWED);
    }

    if let Some(path) = working_path {
        request.extensions_mut().insert(WorkingPath(path));
    }
    if let Some(service) = git_service {
        request.extensions_mut().insert(GitService(service));
    }

    handler
        .call(request)
        .await
        .unwrap_infallible()
        .into_response()
}

/// Cuts everything up to and including the marker segment out of the
/// path. Returns `None` when the marker is configured but absent.
fn strip_decoration(path: &str, marker: &str) -> Option<String> {
    if marker.is_empty() {
        return Some(path.to_string());
    }

    let mut found = false;
    let mut rest = Vec::new();
    for segment in path.split('/') {
        if found {
            rest.push(segment);
        } else if segment == marker {
            found = true;
        }
    }

    found.then(|| format!("/{}", rest.join("/")))
}

/// Extracts a `service=git-...` query parameter, when one is present.
fn requested_service(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("service="))
        .and_then(validated_service)
}

fn validated_service(command: &str) -> Option<String> {
    command
        .strip_prefix("git-")
        .filter(|suffix| matches!(*suffix, "upload-pack" | "receive-pack"))
        .map(ToString::to_string)
}

/// Splits `<repo-path>/git-<command>` into its two halves. The repo
/// part may be empty when the served root itself is the repository.
fn smart_rpc_route(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    let (repo, last) = match trimmed.rsplit_once('/') {
        Some(split) => split,
        None => ("", trimmed),
    };
    last.starts_with("git-").then_some((repo, last))
}

#[cfg(test)]
mod test {
    use super::{requested_service, smart_rpc_route, strip_decoration};

    #[test]
    fn marker_cuts_arbitrary_decoration() {
        assert_eq!(strip_decoration("/a/b", ""), Some("/a/b".to_string()));
        assert_eq!(strip_decoration("/my/HEAD", "my"), Some("/HEAD".to_string()));
        assert_eq!(
            strip_decoration("/admysf/mylar/zxmy/my/HEAD", "my"),
            Some("/HEAD".to_string())
        );
        assert_eq!(strip_decoration("/my/", "my"), Some("/".to_string()));
        assert_eq!(strip_decoration("/elsewhere/HEAD", "my"), None);
    }

    #[test]
    fn service_parameter_is_validated() {
        assert_eq!(
            requested_service("service=git-upload-pack"),
            Some("upload-pack".to_string())
        );
        assert_eq!(
            requested_service("a=b&service=git-receive-pack&c=d"),
            Some("receive-pack".to_string())
        );
        assert_eq!(requested_service("service=git-evil"), None);
        assert_eq!(requested_service("service=rm-rf"), None);
        assert_eq!(requested_service(""), None);
    }

    #[test]
    fn smart_rpc_paths_split_on_the_command() {
        assert_eq!(
            smart_rpc_route("/projects/demo.git/git-upload-pack"),
            Some(("projects/demo.git", "git-upload-pack"))
        );
        assert_eq!(
            smart_rpc_route("/git-upload-pack"),
            Some(("", "git-upload-pack"))
        );
        assert_eq!(smart_rpc_route("/projects/demo.git/files"), None);
    }
}
