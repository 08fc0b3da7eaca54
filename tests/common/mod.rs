//! Fixture tree shared by the integration suites: a served root with a
//! few plain folders and one bare repository carrying a text blob, a
//! subfolder and two submodule entries.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const FIRSTDOC: &[u8] =
    b"Line one here.\r\nLine two here.\r\nLine three here.\r\nLine four here.";

pub const SUBMODULE_URL: &str = "git://gitorious.org/git_http_backend_py/git_http_backend_py.git";
pub const SUBMODULE_ID: &str = "74bc53cdcfd1804b9c3d1afad4db0999931a025c";
pub const NESTED_ID: &str = "08a4dca6a06e2f8893a955d757d505f0431321cb";

const GITMODULES: &str = "\
[submodule \"somesubmodule\"]
\tpath = somesubmodule
\turl = git://gitorious.org/git_http_backend_py/git_http_backend_py.git
[submodule \"nestedmodule\"]
\tpath = somefolder/nestedmodule
\turl = git://gitorious.org/git_http_backend_py/git_http_backend_py.git
";

pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args([
            "-c",
            "user.name=D. Dotsenko",
            "-c",
            "user.email=dotsa@example.com",
            "-c",
            "init.defaultBranch=master",
            "-c",
            "protocol.file.allow=always",
        ])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git binary must be available for integration tests");
    assert!(status.success(), "git {args:?} failed");
}

/// Builds `reposbase/{projects/{common_files,demorepoone},teams,users}`
/// where `demorepoone` is a bare repository with `master`, a `stable`
/// branch and a `0.1` tag all at the same commit.
pub fn sample_tree() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("reposbase");

    fs::create_dir_all(root.join("projects/common_files")).unwrap();
    fs::create_dir_all(root.join("teams")).unwrap();
    fs::create_dir_all(root.join("users")).unwrap();

    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    git(&scratch, &["init"]);

    fs::write(scratch.join("firstdoc.txt"), FIRSTDOC).unwrap();
    fs::write(scratch.join(".gitmodules"), GITMODULES).unwrap();
    git(&scratch, &["add", "firstdoc.txt", ".gitmodules"]);

    // gitlink entries go straight into the index; the referenced
    // commits live in the (absent) submodules and are never validated
    git(
        &scratch,
        &[
            "update-index",
            "--add",
            "--cacheinfo",
            &format!("160000,{SUBMODULE_ID},somesubmodule"),
        ],
    );
    git(
        &scratch,
        &[
            "update-index",
            "--add",
            "--cacheinfo",
            &format!("160000,{NESTED_ID},somefolder/nestedmodule"),
        ],
    );

    git(&scratch, &["commit", "-m", "Adding submodule for testing."]);
    git(&scratch, &["branch", "stable"]);
    git(&scratch, &["tag", "0.1"]);

    git(
        dir.path(),
        &[
            "clone",
            "--bare",
            "--quiet",
            scratch.to_str().unwrap(),
            root.join("projects/demorepoone").to_str().unwrap(),
        ],
    );

    (dir, root)
}

/// A static docroot carrying the two files startup validation expects.
pub fn static_docroot(dir: &Path) -> PathBuf {
    let docroot = dir.join("static");
    fs::create_dir_all(&docroot).unwrap();
    fs::write(
        docroot.join("index.html"),
        b"<!doctype html><title>ges</title>",
    )
    .unwrap();
    fs::write(docroot.join("favicon.ico"), b"\x00\x00\x01\x00").unwrap();
    docroot
}
