use docshelf_core::{ApiErrorClass, DocshelfClient, DocshelfError};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn folder_tree_includes_bearer_header_and_virtual_nodes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/folders/tree"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "root",
                "name": "My Folders",
                "children": [
                    { "id": "f1", "name": "Reports", "children": [] }
                ]
            },
            { "name": "Shared With Me", "children": [] }
        ])))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let tree = client.folder_tree().await.unwrap();

    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].id.as_deref(), Some("root"));
    assert_eq!(tree[0].children[0].name, "Reports");
    assert!(tree[1].id.is_none());
}

#[tokio::test]
async fn create_folder_posts_name_and_parent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/folders"))
        .and(body_json(json!({ "name": "Reports", "parentId": "root" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "f1",
            "name": "Reports",
            "parentId": "root"
        })))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let folder = client.create_folder("Reports", "root").await.unwrap();

    assert_eq!(folder.id, "f1");
    assert_eq!(folder.parent_id.as_deref(), Some("root"));
}

#[tokio::test]
async fn create_folder_conflict_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/folders"))
        .respond_with(ResponseTemplate::new(409).set_body_string("folder already exists"))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .create_folder("Reports", "root")
        .await
        .expect_err("expected conflict");

    assert!(err.is_conflict());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn find_folder_filters_children_by_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/folders"))
        .and(query_param("parentId", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "f1", "name": "Reports", "parentId": "root" },
            { "id": "f2", "name": "Invoices", "parentId": "root" }
        ])))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();

    let found = client.find_folder("root", "Invoices").await.unwrap();
    assert_eq!(found.map(|folder| folder.id).as_deref(), Some("f2"));

    let missing = client.find_folder("root", "Archive").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn delete_folder_not_found_is_distinguishable() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/folders/f9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let err = client.delete_folder("f9").await.expect_err("expected 404");

    assert!(err.is_not_found());
}

#[tokio::test]
async fn list_files_queries_by_folder_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(query_param("folderId", "f1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "d1",
                "name": "q1.pdf",
                "size": 5,
                "modified": "2024-01-01T00:00:00Z",
                "folderId": "f1"
            }
        ])))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let files = client.list_files("f1").await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "q1.pdf");
    assert_eq!(files[0].size, 5);
    assert_eq!(files[0].folder_id, "f1");
}

#[tokio::test]
async fn upload_file_sends_multipart_with_folder_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/files"))
        .and(body_string_contains("folderId"))
        .and(body_string_contains("q1.pdf"))
        .and(body_string_contains("quarterly report"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "d1",
            "name": "q1.pdf",
            "size": 16,
            "modified": "2024-01-01T00:00:00Z",
            "folderId": "f1"
        })))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let record = client
        .upload_file("f1", "q1.pdf", b"quarterly report".to_vec())
        .await
        .unwrap();

    assert_eq!(record.id, "d1");
    assert_eq!(record.folder_id, "f1");
}

#[tokio::test]
async fn download_file_streams_bytes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/files/d1/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let response = client.download_file("d1").await.unwrap();
    let bytes = response.bytes().await.unwrap();

    assert_eq!(bytes.as_ref(), b"hello");
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
    let err = client.list_files("f1").await.expect_err("expected 503");

    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
    assert!(matches!(err, DocshelfError::Api { .. }));
}
