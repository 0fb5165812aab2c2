use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

fn update() -> BoardUpdate {
    let mut el = Element::new("e1", serde_json::Map::new());
    el.version = 3;
    BoardUpdate { elements: vec![el], title: Some("Plan".into()) }
}

async fn session_api(server: &MockServer) -> HttpBoardApi {
    HttpBoardApi::new(&server.uri(), Credentials::Session("tok".into())).unwrap()
}

#[tokio::test]
async fn session_update_uses_board_route_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/boards/b1"))
        .and(header("authorization", "Bearer tok"))
        .and(body_partial_json(json!({ "title": "Plan", "elements": [{ "id": "e1", "version": 3 }] })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    session_api(&server).await.update_board("b1", &update()).await.unwrap();
}

#[tokio::test]
async fn share_token_update_uses_public_route() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/public/boards/share-xyz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpBoardApi::new(&server.uri(), Credentials::ShareToken("share-xyz".into())).unwrap();
    api.update_board("b1", &update()).await.unwrap();
}

#[tokio::test]
async fn forbidden_maps_to_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = session_api(&server).await.update_board("b1", &update()).await.unwrap_err();
    assert!(matches!(err, BackendError::PermissionDenied));
    assert!(!err.retryable());
}

#[tokio::test]
async fn server_error_is_retryable_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = session_api(&server).await.update_board("b1", &update()).await.unwrap_err();
    match &err {
        BackendError::Status { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "busy");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.retryable());
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let api = HttpBoardApi::new("http://127.0.0.1:1", Credentials::Session("t".into())).unwrap();
    let err = api.update_board("b1", &update()).await.unwrap_err();
    assert!(matches!(err, BackendError::Request(_)));
    assert!(err.retryable());
}

#[tokio::test]
async fn upload_url_and_batch_urls_parse() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/boards/b1/files/f1/upload-url"))
        .and(body_partial_json(json!({ "contentType": "image/png" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "https://blob/f1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/boards/b1/files/batch"))
        .and(body_partial_json(json!({ "fileIds": ["f1", "f2"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "urls": { "f1": "https://blob/f1" } })))
        .mount(&server)
        .await;

    let api = session_api(&server).await;
    assert_eq!(api.get_upload_url("b1", "f1", "image/png").await.unwrap(), "https://blob/f1");
    let urls = api.get_batch_file_urls("b1", &["f1".into(), "f2".into()]).await.unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls["f1"], "https://blob/f1");
}

#[tokio::test]
async fn malformed_json_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = session_api(&server).await.get_upload_url("b1", "f1", "image/png").await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(_)));
}

#[tokio::test]
async fn blobs_round_trip_through_put_and_get() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/blob/f1"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/f1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = session_api(&server).await;
    let url = format!("{}/blob/f1", server.uri());
    api.put_blob(&url, "application/octet-stream", vec![1, 2, 3]).await.unwrap();
    assert_eq!(api.get_blob(&url).await.unwrap(), vec![1, 2, 3]);
    let missing = api.get_blob(&format!("{}/blob/missing", server.uri())).await.unwrap_err();
    assert!(matches!(missing, BackendError::NotFound));
}

#[tokio::test]
async fn delete_board_hits_board_root() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/boards/b9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    session_api(&server).await.delete_board("b9").await.unwrap();
}
