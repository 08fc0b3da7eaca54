//! Drives the content producer against a real repository fixture.

mod common;

use futures_util::StreamExt;
use serde_json::{json, Value};

use ges::content::{self, StreamBody};
use ges::vpath::PathError;

fn summary_value(root: &std::path::Path, path: &str) -> Value {
    serde_json::to_value(content::summary(root, path).unwrap()).unwrap()
}

#[test]
fn root_listing_is_a_sorted_folder() {
    let (_dir, root) = common::sample_tree();

    let expected = json!({
        "type": "folder",
        "data": [
            { "type": "folder", "name": "projects" },
            { "type": "folder", "name": "teams" },
            { "type": "folder", "name": "users" },
        ],
        "meta": { "path": "" },
    });

    assert_eq!(summary_value(&root, ""), expected);
    assert_eq!(summary_value(&root, "/"), expected);
    assert_eq!(summary_value(&root, "\\"), expected);
}

#[test]
fn repositories_are_tagged_in_listings() {
    let (_dir, root) = common::sample_tree();

    assert_eq!(
        summary_value(&root, "projects"),
        json!({
            "type": "folder",
            "data": [
                { "type": "folder", "name": "common_files" },
                { "type": "folder", "is_repo": true, "name": "demorepoone" },
            ],
            "meta": { "path": "projects" },
        })
    );

    assert_eq!(
        summary_value(&root, "projects/common_files"),
        json!({
            "type": "folder",
            "data": [],
            "meta": { "path": "projects/common_files" },
        })
    );
}

#[test]
fn repo_summary_groups_endpoints_by_commit() {
    let (_dir, root) = common::sample_tree();

    let value = summary_value(&root, "projects/demorepoone");
    assert_eq!(value["type"], json!("repo"));
    assert_eq!(value["meta"]["path"], json!("projects/demorepoone"));

    let endpoints = value["data"]["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 1);

    let endpoint = &endpoints[0];
    assert_eq!(endpoint["summary"], json!("Adding submodule for testing."));
    assert_eq!(endpoint["author"], json!("D. Dotsenko"));

    let branches = endpoint["branches"].as_array().unwrap();
    assert!(branches.contains(&json!("master")));
    assert!(branches.contains(&json!("stable")));
    assert_eq!(endpoint["tags"], json!(["0.1"]));

    // wire format of the original: `Sun Oct 31 05:15:14 2010 UTC`
    let time = endpoint["time"].as_str().unwrap();
    assert!(time.ends_with(" UTC"), "unexpected time format: {time}");

    assert!(value["data"]["description"].is_string());
}

#[test]
fn commit_root_is_a_repofolder() {
    let (_dir, root) = common::sample_tree();

    let value = summary_value(&root, "projects/demorepoone/master");
    assert_eq!(value["type"], json!("repofolder"));

    let items = value["data"].as_array().unwrap();
    let by_name = |name: &str| {
        items
            .iter()
            .find(|item| item["name"] == json!(name))
            .unwrap_or_else(|| panic!("missing {name}"))
    };

    let doc = by_name("firstdoc.txt");
    assert_eq!(doc["type"], json!("file"));
    assert_eq!(doc["size"], json!(65));

    assert_eq!(by_name("somefolder")["type"], json!("folder"));

    let submodule = by_name("somesubmodule");
    assert_eq!(submodule["type"], json!("submodule"));
    assert_eq!(submodule["url"], json!(common::SUBMODULE_URL));
    assert_eq!(submodule["commit_id"], json!(common::SUBMODULE_ID));
}

#[test]
fn nested_submodules_carry_urls() {
    let (_dir, root) = common::sample_tree();

    let value = summary_value(&root, "projects/demorepoone/master/somefolder");
    assert_eq!(value["type"], json!("repofolder"));
    assert_eq!(
        value["data"],
        json!([{
            "type": "submodule",
            "name": "nestedmodule",
            "url": common::SUBMODULE_URL,
            "commit_id": common::NESTED_ID,
        }])
    );
}

#[test]
fn small_text_blobs_are_inlined() {
    let (_dir, root) = common::sample_tree();

    let value = summary_value(&root, "projects/demorepoone/master/firstdoc.txt");
    assert_eq!(
        value,
        json!({
            "type": "repoitem",
            "data": {
                "type": {
                    "mimetype": "text/plain",
                    "supermimetype": "text",
                    "extension": "txt",
                },
                "name": "firstdoc.txt",
                "size": 65,
                "data": String::from_utf8_lossy(common::FIRSTDOC),
            },
            "meta": { "path": "projects/demorepoone/master/firstdoc.txt" },
        })
    );
}

#[test]
fn terminal_submodules_become_remote_links() {
    let (_dir, root) = common::sample_tree();

    let value = summary_value(&root, "projects/demorepoone/master/somesubmodule");
    assert_eq!(value["type"], json!("remotelink"));
    assert_eq!(value["data"]["system"], json!("git"));
    assert_eq!(value["data"]["class"], json!("submodule"));
    assert_eq!(value["data"]["name"], json!("somesubmodule"));
    assert_eq!(value["data"]["url"], json!(common::SUBMODULE_URL));
    assert_eq!(value["data"]["id"], json!(common::SUBMODULE_ID));
}

#[test]
fn unresolvable_paths_are_unfit() {
    let (_dir, root) = common::sample_tree();

    for path in [
        "projects/blah",
        "/blah",
        "projects/demorepoone/objects",
        "projects/demorepoone/kjhgjg",
        "projects/demorepoone/master/kjhgjg",
    ] {
        assert!(
            matches!(content::summary(&root, path), Err(PathError::Unfit(_))),
            "{path} should be unfit"
        );
    }

    assert!(matches!(
        content::summary(&root, "projects/../../../blah"),
        Err(PathError::Escape(_))
    ));
}

async fn collect(body: StreamBody) -> Vec<u8> {
    match body {
        StreamBody::Blob(bytes) => bytes.to_vec(),
        StreamBody::Archive(mut stream) => {
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            collected
        }
    }
}

#[tokio::test]
async fn blobs_stream_with_known_size() {
    let (_dir, root) = common::sample_tree();

    let response = content::stream(
        root.clone(),
        "projects/demorepoone/master/firstdoc.txt".to_string(),
    )
    .await
    .unwrap();

    assert_eq!(response.mimetype, "text/plain");
    assert_eq!(response.size, Some(65));
    assert_eq!(response.filename, "firstdoc.txt");
    assert_eq!(collect(response.body).await, common::FIRSTDOC);
}

#[tokio::test]
async fn trees_stream_as_zip_archives() {
    let (_dir, root) = common::sample_tree();

    let response = content::stream(root.clone(), "projects/demorepoone/master".to_string())
        .await
        .unwrap();

    assert_eq!(response.mimetype, "application/zip");
    assert_eq!(response.size, None);
    assert_eq!(response.filename, "demorepoone_master.zip");

    let bytes = collect(response.body).await;
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn empty_tails_default_to_head() {
    let (_dir, root) = common::sample_tree();

    let response = content::stream(root.clone(), "projects/demorepoone".to_string())
        .await
        .unwrap();
    assert_eq!(response.filename, "demorepoone_HEAD.zip");

    let bytes = collect(response.body).await;
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn subtree_archives_name_their_path() {
    let (_dir, root) = common::sample_tree();

    // somefolder only holds a gitlink, which archives skip, but the
    // archive itself must still come out well-formed
    let response = content::stream(
        root.clone(),
        "projects/demorepoone/master/somefolder".to_string(),
    )
    .await
    .unwrap();
    assert_eq!(response.filename, "demorepoone_master_somefolder.zip");

    let bytes = collect(response.body).await;
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn streams_need_a_repository() {
    let (_dir, root) = common::sample_tree();

    assert!(matches!(
        content::stream(root.clone(), "projects/common_files".to_string()).await,
        Err(PathError::Unfit(_))
    ));
    assert!(matches!(
        content::stream(
            root.clone(),
            "projects/demorepoone/master/somesubmodule".to_string()
        )
        .await,
        Err(PathError::Unfit(_))
    ));
}
