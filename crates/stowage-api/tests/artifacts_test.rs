//! Artifact downloads, ranges and listing over HTTP.

mod helpers;

use helpers::*;
use serde_json::Value;
use stowage_api::constants::OWNER_HEADER;

#[tokio::test]
async fn test_full_and_ranged_download() {
    let app = setup_test_app().await;
    let data = sample_bytes(10_000, 7);
    let artifact = upload_all(&app, "alice", "ranged", &data, 4).await;
    let path = api_path(&format!("/artifacts/{}", artifact["artifact_id"].as_str().unwrap()));

    let full = app.client().get(&path).add_header(OWNER_HEADER, "alice").await;
    assert_eq!(full.status_code(), 200);
    assert_eq!(full.as_bytes().as_ref(), data.as_slice());
    assert_eq!(full.header("accept-ranges"), "bytes");
    assert_eq!(full.header("content-length"), data.len().to_string().as_str());
    assert!(full.header("etag").to_str().unwrap().starts_with('"'));

    let partial = app
        .client()
        .get(&path)
        .add_header(OWNER_HEADER, "bob")
        .add_header("range", "bytes=100-199")
        .await;
    assert_eq!(partial.status_code(), 206);
    assert_eq!(partial.as_bytes().as_ref(), &data[100..200]);
    assert_eq!(partial.header("content-range"), "bytes 100-199/10000");

    let suffix = app
        .client()
        .get(&path)
        .add_header(OWNER_HEADER, "alice")
        .add_header("range", "bytes=-10")
        .await;
    assert_eq!(suffix.status_code(), 206);
    assert_eq!(suffix.as_bytes().as_ref(), &data[9_990..]);
    assert_eq!(suffix.header("content-range"), "bytes 9990-9999/10000");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let app = setup_test_app().await;
    let data = sample_bytes(1000, 5);
    let artifact = upload_all(&app, "alice", "short", &data, 1).await;
    let path = api_path(&format!("/artifacts/{}", artifact["artifact_id"].as_str().unwrap()));

    let response = app
        .client()
        .get(&path)
        .add_header(OWNER_HEADER, "alice")
        .add_header("range", "bytes=1000-")
        .await;

    assert_eq!(response.status_code(), 416);
    assert_eq!(response.header("content-range"), "bytes */1000");
    assert_eq!(response.json::<Value>()["code"], "RANGE_NOT_SATISFIABLE");
}

#[tokio::test]
async fn test_unknown_artifact_is_not_found() {
    let app = setup_test_app().await;

    for id in [md5_hex(b"never uploaded"), "not-a-fingerprint".to_string()] {
        let response = app
            .client()
            .get(&api_path(&format!("/artifacts/{}", id)))
            .add_header(OWNER_HEADER, "alice")
            .await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.json::<Value>()["code"], "ARTIFACT_NOT_FOUND");
    }
}

#[tokio::test]
async fn test_matching_etag_is_not_modified() {
    let app = setup_test_app().await;
    let data = sample_bytes(4000, 8);
    let artifact = upload_all(&app, "alice", "cached", &data, 2).await;
    let path = api_path(&format!("/artifacts/{}", artifact["artifact_id"].as_str().unwrap()));

    let first = app.client().get(&path).add_header(OWNER_HEADER, "alice").await;
    let etag = first.header("etag").to_str().unwrap().to_string();

    let second = app
        .client()
        .get(&path)
        .add_header(OWNER_HEADER, "alice")
        .add_header("if-none-match", etag.clone())
        .await;
    assert_eq!(second.status_code(), 304);
    assert_eq!(second.header("etag"), etag.as_str());
}

#[tokio::test]
async fn test_listing_is_per_owner_and_carries_etag() {
    let app = setup_test_app().await;
    let data = sample_bytes(2048, 6);
    let artifact = upload_all(&app, "alice", "listed", &data, 2).await;
    upload_all(&app, "bob", "elsewhere", &sample_bytes(512, 1), 1).await;

    let listing: Value = app
        .client()
        .get(&api_path("/artifacts"))
        .add_header(OWNER_HEADER, "alice")
        .await
        .json();
    let entries = listing.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["artifact_id"], artifact["artifact_id"]);
    assert_eq!(entries[0]["upload_id"], "listed");

    let download = app
        .client()
        .get(&api_path(&format!("/artifacts/{}", artifact["artifact_id"].as_str().unwrap())))
        .add_header(OWNER_HEADER, "alice")
        .await;
    let etag = download.header("etag");
    assert_eq!(
        format!("\"{}\"", entries[0]["etag"].as_str().unwrap()),
        etag.to_str().unwrap()
    );
}

#[tokio::test]
async fn test_missing_thumbnail_is_not_found() {
    let app = setup_test_app().await;
    let data = sample_bytes(1024, 2);
    let artifact = upload_all(&app, "alice", "nothumb", &data, 1).await;

    let response = app
        .client()
        .get(&api_path(&format!(
            "/artifacts/{}/thumbnail",
            artifact["artifact_id"].as_str().unwrap()
        )))
        .add_header(OWNER_HEADER, "alice")
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;
    let response = app.client().get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["status"], "ok");
}
