//! Read-side adapter over repository object stores: commit resolution,
//! tree traversal, endpoint enumeration and external archive creation.

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use gix::refs::Category;
use gix::{objs::tree::EntryKind, ObjectId};
use hashbrown::{hash_map::Entry as MapEntry, HashMap};
use ini::Ini;
use itertools::Itertools;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::process::Command;
use tracing::{error, instrument, warn};

/// A named commit reachable from a branch tip, a tag or `HEAD`,
/// decorated with the names that lead to it.
#[derive(Debug)]
pub struct Endpoint {
    pub id: String,
    pub author: String,
    pub author_email: String,
    pub authored: OffsetDateTime,
    pub committed: OffsetDateTime,
    pub summary: String,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

/// What an in-repo path resolves to within a commit's tree.
pub enum RepoEntity {
    Blob { name: String, bytes: Vec<u8> },
    Tree { children: Vec<TreeChild> },
    Submodule(Submodule),
}

#[derive(Debug, Clone)]
pub struct Submodule {
    pub name: String,
    pub url: Option<String>,
    pub commit_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    File,
    Folder,
    Submodule,
    Unknown,
}

#[derive(Debug)]
pub struct TreeChild {
    pub name: String,
    pub kind: ChildKind,
    pub size: Option<usize>,
    pub url: Option<String>,
    pub commit_id: Option<String>,
}

/// The commit a reference resolved to, reduced to what response framing
/// and summaries need.
#[derive(Debug, Clone)]
pub struct ResolvedCommit {
    pub id: String,
    pub committed: OffsetDateTime,
}

pub fn open(repo_path: &Path) -> Result<gix::Repository> {
    let mut repo = gix::open(repo_path).map_err(|err| {
        error!(%err, "failed to open repository");
        anyhow!("failed to open repository")
    })?;
    repo.object_cache_size(10 * 1024 * 1024);
    Ok(repo)
}

/// Resolves a commit-reference (branch name, tag name or commit id) to
/// a commit. Names win over ids; annotated tags peel to their target.
pub fn resolve_commit<'r>(repo: &'r gix::Repository, reference: &str) -> Result<gix::Commit<'r>> {
    if let Ok(mut found) = repo.find_reference(reference) {
        return found
            .peel_to_commit()
            .context("reference does not point at a commit");
    }

    let oid = ObjectId::from_str(reference).context("no such reference in the repository")?;
    repo.find_commit(oid)
        .context("no commit with the given id in the repository")
}

pub fn resolved_meta(commit: &gix::Commit<'_>) -> Result<ResolvedCommit> {
    let committer = commit.committer().context("commit has no committer")?;
    Ok(ResolvedCommit {
        id: commit.id.to_string(),
        committed: OffsetDateTime::from_unix_timestamp(committer.time.seconds)
            .context("commit carries an unrepresentable timestamp")?,
    })
}

/// Descends `subpath` within the commit's tree, segment by segment.
pub fn walk(commit: &gix::Commit<'_>, subpath: &str) -> Result<RepoEntity> {
    let modules = submodule_urls(commit);
    let mut tree = commit.tree().context("commit has no tree")?;

    if subpath.is_empty() {
        return Ok(RepoEntity::Tree {
            children: children_of(&tree, "", &modules)?,
        });
    }

    let entry = tree
        .peel_to_entry_by_path(subpath)
        .context("failed to look up path in tree")?
        .context("path does not exist in tree")?;
    let name = subpath.rsplit('/').next().unwrap_or(subpath).to_string();

    match entry.mode().kind() {
        EntryKind::Blob | EntryKind::BlobExecutable => {
            let mut blob = entry
                .object()
                .context("entry in tree was not backed by an object")?
                .into_blob();
            Ok(RepoEntity::Blob {
                name,
                bytes: blob.take_data(),
            })
        }
        EntryKind::Tree => {
            let subtree = entry
                .object()
                .context("entry in tree was not backed by an object")?
                .into_tree();
            Ok(RepoEntity::Tree {
                children: children_of(&subtree, subpath, &modules)?,
            })
        }
        EntryKind::Commit => Ok(RepoEntity::Submodule(Submodule {
            url: modules.get(subpath).cloned(),
            commit_id: entry.id().to_string(),
            name,
        })),
        EntryKind::Link => bail!("symbolic links cannot be served"),
    }
}

fn children_of(
    tree: &gix::Tree<'_>,
    base: &str,
    modules: &HashMap<String, String>,
) -> Result<Vec<TreeChild>> {
    let mut children = Vec::new();

    for entry in tree.iter() {
        let entry = entry.context("corrupt tree entry")?;
        let name = entry.filename().to_string();
        let full_path = if base.is_empty() {
            name.clone()
        } else {
            format!("{base}/{name}")
        };

        children.push(match entry.mode().kind() {
            EntryKind::Blob | EntryKind::BlobExecutable => {
                let size = entry
                    .object()
                    .context("entry in tree was not backed by an object")?
                    .into_blob()
                    .data
                    .len();
                TreeChild {
                    name,
                    kind: ChildKind::File,
                    size: Some(size),
                    url: None,
                    commit_id: None,
                }
            }
            EntryKind::Tree => TreeChild {
                name,
                kind: ChildKind::Folder,
                size: None,
                url: None,
                commit_id: None,
            },
            EntryKind::Commit => TreeChild {
                kind: ChildKind::Submodule,
                size: None,
                url: modules.get(&full_path).cloned(),
                commit_id: Some(entry.id().to_string()),
                name,
            },
            EntryKind::Link => TreeChild {
                name,
                kind: ChildKind::Unknown,
                size: None,
                url: None,
                commit_id: None,
            },
        });
    }

    Ok(children)
}

/// Maps in-repo submodule paths to their configured URLs by parsing the
/// `.gitmodules` blob at the commit's root, when one exists.
fn submodule_urls(commit: &gix::Commit<'_>) -> HashMap<String, String> {
    let mut urls = HashMap::new();

    let Ok(mut tree) = commit.tree() else {
        return urls;
    };
    let Ok(Some(entry)) = tree.peel_to_entry_by_path(".gitmodules") else {
        return urls;
    };
    let Ok(object) = entry.object() else {
        return urls;
    };
    let Ok(text) = String::from_utf8(object.into_blob().take_data()) else {
        return urls;
    };
    let Ok(config) = Ini::load_from_str(&text) else {
        warn!("repository carries an unparseable .gitmodules");
        return urls;
    };

    for (section, properties) in config.iter() {
        if !section.is_some_and(|name| name.starts_with("submodule")) {
            continue;
        }

        if let (Some(path), Some(url)) = (properties.get("path"), properties.get("url")) {
            urls.insert(path.to_string(), url.to_string());
        }
    }

    urls
}

/// Enumerates every branch tip, tag target and `HEAD`, grouped by the
/// commit they lead to and ordered by descending commit time. Annotated
/// tags contribute the commit they refer to, not the tag object itself.
pub fn endpoints(repo: &gix::Repository) -> Result<Vec<Endpoint>> {
    let mut grouped: HashMap<ObjectId, Endpoint> = HashMap::new();

    let platform = repo
        .references()
        .context("failed to enumerate repository references")?;
    for mut reference in platform
        .all()
        .context("failed to iterate repository references")?
        .filter_map(Result::ok)
    {
        let Some((category, short)) = reference.name().category_and_short_name() else {
            continue;
        };
        let is_branch = matches!(category, Category::LocalBranch);
        let is_tag = matches!(category, Category::Tag);
        if !is_branch && !is_tag {
            continue;
        }
        let short = short.to_string();

        // dangling or non-commit references are not endpoints
        let Ok(commit) = reference.peel_to_commit() else {
            continue;
        };

        let endpoint = match grouped.entry(commit.id) {
            MapEntry::Occupied(occupied) => occupied.into_mut(),
            MapEntry::Vacant(vacant) => vacant.insert(endpoint_of(&commit)?),
        };

        if is_branch {
            endpoint.branches.push(short);
        } else if is_tag {
            endpoint.tags.push(short);
        }
    }

    if let Ok(mut head) = repo.find_reference("HEAD") {
        if let Ok(commit) = head.peel_to_commit() {
            if let MapEntry::Vacant(vacant) = grouped.entry(commit.id) {
                vacant.insert(endpoint_of(&commit)?);
            }
        }
    }

    Ok(grouped
        .into_values()
        .sorted_by(|a, b| b.committed.cmp(&a.committed))
        .collect())
}

fn endpoint_of(commit: &gix::Commit<'_>) -> Result<Endpoint> {
    let author = commit.author().context("commit has no author")?;
    let committer = commit.committer().context("commit has no committer")?;

    Ok(Endpoint {
        id: commit.id.to_string(),
        author: author.name.to_string(),
        author_email: author.email.to_string(),
        authored: OffsetDateTime::from_unix_timestamp(author.time.seconds)
            .context("commit carries an unrepresentable author timestamp")?,
        committed: OffsetDateTime::from_unix_timestamp(committer.time.seconds)
            .context("commit carries an unrepresentable commit timestamp")?,
        summary: commit
            .message()
            .context("commit has no message")?
            .summary()
            .to_string(),
        branches: Vec::new(),
        tags: Vec::new(),
    })
}

/// Reads the repository's `description` file, the classic gitweb way.
pub fn description(repo_path: &Path) -> String {
    fs::read_to_string(repo_path.join("description"))
        .map(|text| text.trim_end().to_string())
        .unwrap_or_default()
}

/// References and sub-paths handed to external git must stay inert:
/// plain ref-ish characters only, never option-shaped.
pub fn safe_git_argument(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'/' | b'-'))
}

/// Produces a ZIP archive of `reference` (optionally narrowed to
/// `subpath`) by invoking external `git archive` exec-form, writing to
/// a temporary file that is handed back to the caller. The file is
/// removed when the returned handle drops.
#[instrument(skip(repo_path), fields(repo = %repo_path.display()))]
pub async fn archive(
    repo_path: &Path,
    reference: &str,
    subpath: &str,
    prefix: &str,
) -> Result<NamedTempFile> {
    if !safe_git_argument(reference) {
        bail!("reference {reference:?} is not archivable");
    }
    if !subpath.is_empty() && !safe_git_argument(subpath) {
        bail!("path {subpath:?} is not archivable");
    }

    let output_file = tokio::task::spawn_blocking(NamedTempFile::new)
        .await
        .context("failed to join Tokio task")?
        .context("failed to create temporary archive file")?;

    let mut command = Command::new("git");
    command
        .arg("archive")
        .arg("--format=zip")
        .arg(format!("--prefix={prefix}/"))
        .arg("-o")
        .arg(output_file.path())
        .arg(reference);
    if !subpath.is_empty() {
        command.arg(subpath);
    }

    let output = command
        .current_dir(repo_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to spawn git archive")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(%stderr, "git archive failed");
        bail!("git archive exited with {}", output.status);
    }

    Ok(output_file)
}
