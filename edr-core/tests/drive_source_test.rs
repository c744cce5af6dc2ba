//! Drive listing integration tests
//!
//! Runs `DriveSource` against a mock Drive API:
//! - Query parameters and bearer token
//! - Following `nextPageToken` across pages
//! - Status classification into transient, auth and rejected errors

use std::sync::Arc;

use edr_core::auth::StaticToken;
use edr_core::model::SourceDocument;
use edr_core::source::{DocumentSource, DriveSource, FetchError, FolderFilter};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> DriveSource {
    DriveSource::new(Arc::new(StaticToken::new("drive-token"))).with_base_url(server.uri())
}

fn file(id: &str, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "createdTime": "2024-04-01T10:00:00.000Z",
        "modifiedTime": "2024-04-03T16:45:12.000Z",
        "webViewLink": format!("https://docs.google.com/document/d/{}/edit", id),
        "lastModifyingUser": { "displayName": "Ines" },
        "owners": [{ "displayName": "Farid", "emailAddress": "farid@example.com" }]
    })
}

#[tokio::test]
async fn test_lists_every_page() {
    let server = MockServer::start().await;
    let filter = FolderFilter::new("folder-123");

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [file("doc-3", "Storage tiers")]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(header("authorization", "Bearer drive-token"))
        .and(query_param("q", filter.query().as_str()))
        .and(query_param("supportsAllDrives", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [file("doc-1", "Ingest pipeline - [Kofi]"), file("doc-2", "Token rotation")],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let documents = source(&server).list_tracked_documents(&filter).await.unwrap();

    let ids: Vec<_> = documents.iter().filter_map(|d| d.id.as_deref()).collect();
    assert_eq!(ids, vec!["doc-1", "doc-2", "doc-3"]);

    let first = SourceDocument::try_from(documents[0].clone()).unwrap();
    assert_eq!(first.name, "Ingest pipeline");
    assert_eq!(first.owner, "Kofi");
    assert_eq!(first.last_editor, "Ines");

    let second = SourceDocument::try_from(documents[1].clone()).unwrap();
    assert_eq!(second.owner, "Farid");
}

#[tokio::test]
async fn test_empty_folder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let documents = source(&server)
        .list_tracked_documents(&FolderFilter::new("empty"))
        .await
        .unwrap();
    assert!(documents.is_empty());
}

#[tokio::test]
async fn test_rate_limits_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "errors": [{ "reason": "rateLimitExceeded" }] }
        })))
        .mount(&server)
        .await;

    let err = source(&server)
        .list_tracked_documents(&FolderFilter::new("folder"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = source(&server)
        .list_tracked_documents(&FolderFilter::new("folder"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid Credentials"))
        .mount(&server)
        .await;

    let err = source(&server)
        .list_tracked_documents(&FolderFilter::new("folder"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Auth(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_bad_query_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid Value"))
        .mount(&server)
        .await;

    let err = source(&server)
        .list_tracked_documents(&FolderFilter::new("folder"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Rejected { status: 400, .. }));
}
