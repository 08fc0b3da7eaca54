//! The content producer: orchestrates path sanitization, repository
//! location and the git adapter into the two public surfaces, typed
//! path summaries and raw/archive streams.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::git::{self, ChildKind, RepoEntity, ResolvedCommit, TreeChild};
use crate::vpath::{self, PathError};

/// Blobs at most this large, with a `text/*` mimetype, are carried
/// inline in summary responses.
pub const INLINE_DATA_LIMIT: usize = 64_000;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Endpoint timestamps use the classic UTC-normalized log format, e.g.
/// `Sun Oct 31 05:15:14 2010 UTC`.
const ENDPOINT_TIME: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year] UTC"
);

/// Typed reply of `summary()`, serialized verbatim onto the RPC wire.
#[derive(Debug, Serialize)]
pub struct PathSummary {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: SummaryData,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SummaryData {
    Folder(Vec<FolderEntry>),
    Repo {
        endpoints: Vec<EndpointSummary>,
        description: String,
    },
    RepoFolder(Vec<TreeEntry>),
    RepoItem(RepoItem),
    RemoteLink {
        system: &'static str,
        class: &'static str,
        name: String,
        url: Option<String>,
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct FolderEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_repo: Option<bool>,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct EndpointSummary {
    pub id: String,
    pub author: String,
    pub author_email: String,
    pub time: String,
    pub auth_time: String,
    pub summary: String,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RepoItem {
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub name: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemType {
    pub mimetype: String,
    pub supermimetype: String,
    pub extension: String,
}

/// Summarizes an arbitrary served path: a plain directory, a repository,
/// an in-repo tree or blob, or a terminal submodule.
#[instrument(skip(root))]
pub fn summary(root: &Path, raw: &str) -> Result<PathSummary, PathError> {
    let relative = vpath::sanitize(root, raw)?;
    let (repo_path, tail) = vpath::locate_repo(root, &relative);

    let Some(repo_path) = repo_path else {
        if !tail.is_empty() {
            return Err(PathError::unfit("requested path may not be viewed"));
        }

        return Ok(PathSummary {
            kind: "folder",
            data: SummaryData::Folder(list_folder(&root.join(&relative))?),
            meta: Meta { path: relative },
        });
    };

    let repo = git::open(&repo_path).map_err(unfit)?;

    if tail.is_empty() {
        let endpoints = git::endpoints(&repo)
            .map_err(unfit)?
            .into_iter()
            .map(endpoint_summary)
            .collect::<Result<_, _>>()?;

        return Ok(PathSummary {
            kind: "repo",
            data: SummaryData::Repo {
                endpoints,
                description: git::description(&repo_path),
            },
            meta: Meta { path: relative },
        });
    }

    let (reference, subpath) = vpath::split_reference(&tail);
    let commit = git::resolve_commit(&repo, reference).map_err(unfit)?;

    let (kind, data) = match git::walk(&commit, subpath).map_err(unfit)? {
        RepoEntity::Tree { children } => (
            "repofolder",
            SummaryData::RepoFolder(children.into_iter().map(tree_entry).collect()),
        ),
        RepoEntity::Blob { name, bytes } => ("repoitem", SummaryData::RepoItem(repo_item(name, bytes))),
        RepoEntity::Submodule(submodule) => (
            "remotelink",
            SummaryData::RemoteLink {
                system: "git",
                class: "submodule",
                name: submodule.name,
                url: submodule.url,
                id: submodule.commit_id,
            },
        ),
    };

    Ok(PathSummary {
        kind,
        data,
        meta: Meta { path: relative },
    })
}

fn list_folder(path: &Path) -> Result<Vec<FolderEntry>, PathError> {
    let entries =
        fs::read_dir(path).map_err(|_| PathError::unfit("requested path may not be viewed"))?;

    let mut folders: Vec<FolderEntry> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| FolderEntry {
            kind: "folder",
            is_repo: vpath::is_repo_dir(&entry.path()).then_some(true),
            name: entry.file_name().to_string_lossy().into_owned(),
        })
        .collect();
    folders.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(folders)
}

fn endpoint_summary(endpoint: git::Endpoint) -> Result<EndpointSummary, PathError> {
    let time = endpoint
        .committed
        .format(&ENDPOINT_TIME)
        .map_err(|_| PathError::unfit("commit carries an unrepresentable timestamp"))?;
    let auth_time = endpoint
        .authored
        .format(&ENDPOINT_TIME)
        .map_err(|_| PathError::unfit("commit carries an unrepresentable timestamp"))?;

    Ok(EndpointSummary {
        id: endpoint.id,
        author: endpoint.author,
        author_email: endpoint.author_email,
        time,
        auth_time,
        summary: endpoint.summary,
        branches: endpoint.branches,
        tags: endpoint.tags,
    })
}

fn tree_entry(child: TreeChild) -> TreeEntry {
    TreeEntry {
        kind: match child.kind {
            ChildKind::File => "file",
            ChildKind::Folder => "folder",
            ChildKind::Submodule => "submodule",
            ChildKind::Unknown => "unknown",
        },
        name: child.name,
        size: child.size,
        url: child.url,
        commit_id: child.commit_id,
    }
}

fn repo_item(name: String, bytes: Vec<u8>) -> RepoItem {
    let size = bytes.len();
    let kind = item_type(&name, size);

    let data = if size < INLINE_DATA_LIMIT && kind.mimetype.starts_with("text/") {
        String::from_utf8(bytes).ok()
    } else {
        None
    };

    RepoItem {
        kind,
        name,
        size,
        data,
    }
}

fn item_type(name: &str, size: usize) -> ItemType {
    let extension = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mimetype = match mime_guess::from_path(name).first_raw() {
        Some(guessed) => guessed.to_string(),
        // extension-less small blobs default to plain text
        None if extension.is_empty() && size < INLINE_DATA_LIMIT => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    };
    let supermimetype = mimetype
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    ItemType {
        mimetype,
        supermimetype,
        extension,
    }
}

/// A `stream()` reply: the body producer with its framing metadata.
pub struct StreamResponse {
    pub body: StreamBody,
    pub mimetype: String,
    pub size: Option<u64>,
    pub filename: String,
    pub commit: ResolvedCommit,
}

pub enum StreamBody {
    Blob(Bytes),
    Archive(ArchiveStream),
}

/// ZIP bytes read back from the archive temp file. The file handle is
/// owned here so dropping the stream, for any reason, removes the file.
pub struct ArchiveStream {
    inner: ReaderStream<tokio::fs::File>,
    _backing: tempfile::TempPath,
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

enum StreamPlan {
    Blob {
        name: String,
        bytes: Vec<u8>,
        commit: ResolvedCommit,
    },
    Archive {
        repo_path: PathBuf,
        repo_name: String,
        reference: String,
        subpath: String,
        commit: ResolvedCommit,
    },
}

/// Streams the object behind a virtual path: raw bytes for blobs, a ZIP
/// archive produced by external git for trees.
#[instrument(skip(root))]
pub async fn stream(root: PathBuf, raw: String) -> Result<StreamResponse, PathError> {
    let plan = tokio::task::spawn_blocking(move || -> Result<StreamPlan, PathError> {
        let relative = vpath::sanitize(&root, &raw)?;
        let (repo_path, tail) = vpath::locate_repo(&root, &relative);
        let repo_path =
            repo_path.ok_or_else(|| PathError::unfit("requested path may not be viewed"))?;

        let (reference, subpath) = vpath::split_reference(&tail);
        let repo = git::open(&repo_path).map_err(unfit)?;
        let commit = git::resolve_commit(&repo, reference).map_err(unfit)?;
        let resolved = git::resolved_meta(&commit).map_err(unfit)?;

        match git::walk(&commit, subpath).map_err(unfit)? {
            RepoEntity::Blob { name, bytes } => Ok(StreamPlan::Blob {
                name,
                bytes,
                commit: resolved,
            }),
            RepoEntity::Tree { .. } => {
                let repo_name = repo_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "repository".to_string());

                Ok(StreamPlan::Archive {
                    repo_path,
                    repo_name,
                    reference: reference.to_string(),
                    subpath: subpath.to_string(),
                    commit: resolved,
                })
            }
            RepoEntity::Submodule(_) => {
                Err(PathError::unfit("requested object cannot be served in raw format"))
            }
        }
    })
    .await
    .map_err(|_| PathError::unfit("failed to join Tokio task"))??;

    match plan {
        StreamPlan::Blob {
            name,
            bytes,
            commit,
        } => {
            let mimetype = mime_guess::from_path(&name)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string();
            let size = bytes.len() as u64;

            Ok(StreamResponse {
                body: StreamBody::Blob(Bytes::from(bytes)),
                mimetype,
                size: Some(size),
                filename: name,
                commit,
            })
        }
        StreamPlan::Archive {
            repo_path,
            repo_name,
            reference,
            subpath,
            commit,
        } => {
            let flattened = subpath.replace('/', "_");
            let prefix = if flattened.is_empty() {
                repo_name.clone()
            } else {
                format!("{repo_name}_{flattened}")
            };
            let filename = if flattened.is_empty() {
                format!("{repo_name}_{reference}.zip")
            } else {
                format!("{repo_name}_{reference}_{flattened}.zip")
            };

            let output_file = git::archive(&repo_path, &reference, &subpath, &prefix)
                .await
                .map_err(unfit)?;
            let file = output_file
                .reopen()
                .map_err(|err| PathError::unfit(format!("failed to reopen archive: {err}")))?;

            Ok(StreamResponse {
                body: StreamBody::Archive(ArchiveStream {
                    inner: ReaderStream::with_capacity(
                        tokio::fs::File::from_std(file),
                        STREAM_CHUNK_SIZE,
                    ),
                    _backing: output_file.into_temp_path(),
                }),
                mimetype: "application/zip".to_string(),
                size: None,
                filename,
                commit,
            })
        }
    }
}

fn unfit(err: anyhow::Error) -> PathError {
    PathError::Unfit(format!("{err:#}"))
}

#[cfg(test)]
mod test {
    use super::item_type;

    #[test]
    fn mimetypes_follow_extensions() {
        let txt = item_type("firstdoc.txt", 65);
        assert_eq!(txt.mimetype, "text/plain");
        assert_eq!(txt.supermimetype, "text");
        assert_eq!(txt.extension, "txt");

        let zip = item_type("bundle.zip", 10);
        assert_eq!(zip.mimetype, "application/zip");
        assert_eq!(zip.supermimetype, "application");
    }

    #[test]
    fn extensionless_small_blobs_default_to_text() {
        let makefile = item_type("LICENSE", 900);
        assert_eq!(makefile.mimetype, "text/plain");
        assert_eq!(makefile.extension, "");

        let huge = item_type("LICENSE", super::INLINE_DATA_LIMIT + 1);
        assert_eq!(huge.mimetype, "application/octet-stream");
    }
}
