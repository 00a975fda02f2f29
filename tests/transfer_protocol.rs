//! Resumable upload and download behaviour against a live gateway.

use api_gateway::storage::Storage;
use axum::body::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

mod common;

use common::{client_with_key, spawn_gateway, test_config, TestGateway, KEY_42, KEY_7, ROOT_KEY};

async fn with_dataset(gateway: &TestGateway) {
    let root = client_with_key(ROOT_KEY);
    root.post(gateway.url("/users"))
        .json(&json!({"id": "42"}))
        .send()
        .await
        .unwrap();
    let res = client_with_key(KEY_42)
        .post(gateway.url("/datasets"))
        .json(&json!({"id": "d1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

/// Creates a session and returns its absolute URL.
async fn create_session(gateway: &TestGateway, client: &Client, length: Option<u64>, filename: Option<&str>) -> String {
    let mut req = client.post(gateway.url("/datasets/42/d1/upload"));
    if let Some(length) = length {
        req = req.header("upload-length", length);
    }
    if let Some(name) = filename {
        req = req.header("upload-filename", name);
    }
    let res = req.send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["upload-offset"], "0");
    let location = res.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("/api/v1/datasets/42/d1/upload/"));
    format!("http://{}{}", gateway.addr, location)
}

async fn patch(client: &Client, session: &str, offset: u64, body: &'static [u8]) -> reqwest::Response {
    client
        .patch(session)
        .header("upload-offset", offset)
        .body(body)
        .send()
        .await
        .unwrap()
}

fn upload_id(session: &str) -> &str {
    session.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn test_create_requires_write_access() {
    let gateway = spawn_gateway(test_config()).await;
    with_dataset(&gateway).await;

    let anon = Client::new()
        .post(gateway.url("/datasets/42/d1/upload"))
        .send()
        .await
        .unwrap();
    assert_eq!(anon.status(), StatusCode::NOT_FOUND);

    let other = client_with_key(KEY_7)
        .post(gateway.url("/datasets/42/d1/upload"))
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);

    let missing = client_with_key(KEY_42)
        .post(gateway.url("/datasets/42/nope/upload"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bad_length = client_with_key(KEY_42)
        .post(gateway.url("/datasets/42/d1/upload"))
        .header("upload-length", "lots")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_length.status(), StatusCode::BAD_REQUEST);

    // root may upload on behalf of the owner
    let root = client_with_key(ROOT_KEY);
    create_session(&gateway, &root, Some(3), None).await;
}

#[tokio::test]
async fn test_resumable_upload_lifecycle() {
    let gateway = spawn_gateway(test_config()).await;
    with_dataset(&gateway).await;
    let owner = client_with_key(KEY_42);
    let session = create_session(&gateway, &owner, Some(15), Some("iris.csv")).await;

    let res = patch(&owner, &session, 0, b"0123456789").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["upload-offset"], "10");

    let head = owner.head(&session).send().await.unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers()["upload-offset"], "10");
    assert_eq!(head.headers()["upload-length"], "15");
    assert_eq!(head.headers()["upload-state"], "receiving");
    assert_eq!(head.headers()["cache-control"], "no-store");

    // stale offset from a client that missed the last response
    let res = patch(&owner, &session, 5, b"56789").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = owner.patch(&session).body("abcde").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = patch(&owner, &session, 10, b"abcdef").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let other = client_with_key(KEY_7).head(&session).send().await.unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);

    let res = patch(&owner, &session, 10, b"abcde").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["upload-state"], "complete");

    let res = patch(&owner, &session, 15, b"x").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let blob = gateway
        .services
        .storage
        .read("datasets/42/d1/data/iris.csv")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob, Bytes::from_static(b"0123456789abcde"));
}

#[tokio::test]
async fn test_download_blob_and_listing() {
    let gateway = spawn_gateway(test_config()).await;
    with_dataset(&gateway).await;
    let owner = client_with_key(KEY_42);
    let session = create_session(&gateway, &owner, None, Some("a.bin")).await;

    let res = owner
        .patch(&session)
        .header("upload-offset", 0)
        .header("upload-complete", "true")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let reader = client_with_key(KEY_7);
    let res = reader
        .get(gateway.url("/datasets/42/d1/data/a.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/octet-stream");
    assert_eq!(res.bytes().await.unwrap(), Bytes::from_static(b"payload"));

    let listing: Vec<String> = reader
        .get(gateway.url("/datasets/42/d1/data"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing, vec!["a.bin".to_string()]);

    let missing = reader
        .get(gateway.url("/datasets/42/d1/data/b.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let anon = Client::new()
        .get(gateway.url("/datasets/42/d1/data/a.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(anon.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_chunk_is_rejected() {
    let mut config = test_config();
    config.transfer.max_chunk_bytes = 8;
    let gateway = spawn_gateway(config).await;
    with_dataset(&gateway).await;
    let owner = client_with_key(KEY_42);
    let session = create_session(&gateway, &owner, Some(32), None).await;

    let res = patch(&owner, &session, 0, b"0123456789abcdef").await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // nothing was committed
    let head = owner.head(&session).send().await.unwrap();
    assert_eq!(head.headers()["upload-offset"], "0");

    let res = patch(&owner, &session, 0, b"01234567").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_racing_appends_commit_once() {
    let gateway = spawn_gateway(test_config()).await;
    with_dataset(&gateway).await;
    let owner = client_with_key(KEY_42);
    let session = create_session(&gateway, &owner, Some(15), None).await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let owner = owner.clone();
            let session = session.clone();
            tokio::spawn(async move { patch(&owner, &session, 0, b"hello").await.status() })
        })
        .collect();
    let mut statuses = Vec::new();
    for attempt in attempts {
        statuses.push(attempt.await.unwrap());
    }

    let accepted = statuses.iter().filter(|s| **s == StatusCode::NO_CONTENT).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 7);

    let head = owner.head(&session).send().await.unwrap();
    assert_eq!(head.headers()["upload-offset"], "5");
}

#[tokio::test]
async fn test_unknown_and_aborted_sessions() {
    let gateway = spawn_gateway(test_config()).await;
    with_dataset(&gateway).await;
    let owner = client_with_key(KEY_42);

    let unknown = owner
        .head(gateway.url("/datasets/42/d1/upload/doesnotexist"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let session = create_session(&gateway, &owner, Some(10), None).await;
    assert!(gateway.services.transfers.abort(upload_id(&session)).await);

    let res = patch(&owner, &session, 0, b"abc").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let head = owner.head(&session).send().await.unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers()["upload-state"], "aborted");
}

#[tokio::test]
async fn test_task_outputs() {
    let gateway = spawn_gateway(test_config()).await;
    let storage = &gateway.services.storage;
    storage
        .write_at("tasks/j1/t1/logs/run.log", 0, Bytes::from_static(b"epoch 1\n"))
        .await
        .unwrap();
    storage
        .write_at("tasks/j1/t1/logs/eval/summary.txt", 0, Bytes::from_static(b"ok"))
        .await
        .unwrap();
    storage
        .write_at("tasks/j1/t1/image", 0, Bytes::from_static(b"\x89PNG"))
        .await
        .unwrap();

    let client = client_with_key(KEY_7);
    let listing: Value = client
        .get(gateway.url("/tasks/j1/t1/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing, json!(["eval/", "run.log"]));

    let log = client
        .get(gateway.url("/tasks/j1/t1/logs/run.log"))
        .send()
        .await
        .unwrap();
    assert_eq!(log.text().await.unwrap(), "epoch 1\n");

    let image = client
        .get(gateway.url("/tasks/j1/t1/image/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.bytes().await.unwrap(), Bytes::from_static(b"\x89PNG"));

    let empty = client
        .get(gateway.url("/tasks/j1/t2/predictions"))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::NOT_FOUND);

    let anon = Client::new()
        .get(gateway.url("/tasks/j1/t1/logs/run.log"))
        .send()
        .await
        .unwrap();
    assert_eq!(anon.status(), StatusCode::NOT_FOUND);
}
