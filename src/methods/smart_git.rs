//! Smart-HTTP git transport in its stateless-RPC form. Both endpoints
//! shell out to git with exec-form arguments and move bytes through the
//! spooled subprocess utility.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method},
    response::Response,
    Extension,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::error;

use crate::methods::{GitService, Result, WorkingPath};
use crate::subprocess::{self, Captured, Input};
use crate::vpath::{self, PathError};
use crate::ServerState;

/// Resolves the working path to a repository directory. The locator
/// must consume the whole path; transport endpoints never take virtual
/// remainders.
fn repo_for(state: &ServerState, working: &str) -> Result<PathBuf> {
    let relative = vpath::sanitize(&state.served_root, working)?;
    let (repo, tail) = vpath::locate_repo(&state.served_root, &relative);

    let repo = repo.ok_or_else(|| PathError::unfit("no repository on the requested path"))?;
    if !tail.is_empty() {
        return Err(PathError::unfit("no repository on the requested path").into());
    }

    Ok(repo)
}

/// The service announcement preceding the advertised refs; pkt-line
/// lengths cover their own four hex digits.
fn pkt_line_announcement(service: &str) -> Bytes {
    let line = format!("# service=git-{service}\n");
    Bytes::from(format!("{:04x}{line}0000", line.len() + 4))
}

fn no_cache(headers: &mut HeaderMap) {
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
    );
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT"),
    );
}

fn forward_protocol_header(command: &mut Command, headers: &HeaderMap) {
    if let Some(protocol) = headers
        .get("Git-Protocol")
        .and_then(|value| value.to_str().ok())
    {
        command.env("GIT_PROTOCOL", protocol);
    }
}

async fn report_failure(service: &str, status: ExitStatus, stderr: Option<Captured>) {
    let stderr = match stderr {
        Some(captured) => captured
            .into_bytes()
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default(),
        None => String::new(),
    };

    error!(service, %status, %stderr, "git transport command failed");
}

/// `GET <repo>/info/refs?service=git-...`: the ref advertisement.
pub async fn info_refs(
    Extension(state): Extension<Arc<ServerState>>,
    Extension(WorkingPath(path)): Extension<WorkingPath>,
    Extension(GitService(service)): Extension<GitService>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let repo = repo_for(&state, &path)?;

    let mut command = Command::new("git");
    command
        .arg(&service)
        .arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(".");
    forward_protocol_header(&mut command, &headers);

    let child = command
        .current_dir(&repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn git")?;

    let output = subprocess::communicate(child, None, subprocess::DEFAULT_BUFFER_SIZE).await?;
    if !output.status.success() {
        report_failure(&service, output.status, output.stderr).await;
        return Err(PathError::unfit("ref advertisement failed").into());
    }
    let stdout = output.stdout.context("stdout was not captured")?;

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let announcement = stream::iter([Ok::<_, std::io::Error>(pkt_line_announcement(&service))]);
        Body::from_stream(announcement.chain(stdout.into_stream()))
    };

    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("application/x-git-{service}-advertisement"))
    {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    no_cache(response_headers);

    Ok(response)
}

/// `POST <repo>/git-...`: one stateless exchange. The request body
/// feeds the child's stdin, the spooled stdout becomes the response.
pub async fn rpc(
    Extension(state): Extension<Arc<ServerState>>,
    Extension(WorkingPath(path)): Extension<WorkingPath>,
    Extension(GitService(service)): Extension<GitService>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let repo = repo_for(&state, &path)?;

    let mut command = Command::new("git");
    command.arg(&service).arg("--stateless-rpc").arg(".");
    forward_protocol_header(&mut command, &headers);

    let child = command
        .current_dir(&repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn git")?;

    let reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|err| std::io::Error::new(ErrorKind::Other, err)),
    );
    let output = subprocess::communicate(
        child,
        Some(Input::Reader(Box::new(reader))),
        subprocess::DEFAULT_BUFFER_SIZE,
    )
    .await?;

    if !output.status.success() {
        report_failure(&service, output.status, output.stderr).await;
        return Err(anyhow!("git {service} exchange failed").into());
    }
    let stdout = output.stdout.context("stdout was not captured")?;
    let size = stdout.size();

    let mut response = Response::new(Body::from_stream(stdout.into_stream()));
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("application/x-git-{service}-result")) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
        response_headers.insert(header::CONTENT_LENGTH, value);
    }
    no_cache(response_headers);

    Ok(response)
}
