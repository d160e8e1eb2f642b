//! HTTP tests driving the full router with in-memory SQLite and a temporary
//! storage root.

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use filevault::db::{self, DbConnection};
use filevault::models::NewFile;
use filevault::upload::{storage::StorageRoot, UploadValidator, DEFAULT_MAX_UPLOAD_BYTES};
use filevault::{create_routes, AppState};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "----FilevaultTestBoundary";

struct TestApp {
    dir: TempDir,
    router: Router,
    db: DbConnection,
    storage_root: PathBuf,
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl TestResponse {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn error_code(&self) -> String {
        self.json()["code"].as_str().unwrap().to_string()
    }
}

impl TestApp {
    fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_UPLOAD_BYTES)
    }

    fn with_limit(max_size: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageRoot::open(dir.path().join("uploads")).unwrap();
        let storage_root = storage.path().to_path_buf();
        let db = db::in_memory().unwrap();
        let uploads = UploadValidator::new(db.clone(), storage, max_size);
        let router = create_routes(AppState::new(db.clone(), uploads, 4));
        Self {
            dir,
            router,
            db,
            storage_root,
        }
    }

    async fn send(&self, req: Request<Body>) -> TestResponse {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn call(&self, method: Method, uri: &str, token: &str) -> TestResponse {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    async fn register(&self, username: &str) -> String {
        let resp = self
            .post_json(
                "/register",
                None,
                json!({ "username": username, "password": "correct horse" }),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED);
        resp.json()["token"].as_str().unwrap().to_string()
    }

    async fn user_id(&self, token: &str) -> Uuid {
        let me = self.call(Method::GET, "/me", token).await.json();
        Uuid::parse_str(me["id"].as_str().unwrap()).unwrap()
    }

    async fn upload(&self, token: Option<&str>, field: &str, filename: &str, data: &[u8]) -> TestResponse {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::from(body)).unwrap()).await
    }

    fn stored_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.storage_root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

fn pdf() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n".to_vec()
}

fn png(image: &RgbaImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[tokio::test]
async fn register_and_login() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    assert_eq!(token.len(), 32);

    let duplicate = app
        .post_json("/register", None, json!({ "username": "alice", "password": "x" }))
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.error_code(), "USER_EXISTS");

    let login = app
        .post_json(
            "/login",
            None,
            json!({ "username": "alice", "password": "correct horse" }),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_ne!(login.json()["token"].as_str().unwrap(), token);

    let wrong = app
        .post_json("/login", None, json!({ "username": "alice", "password": "nope" }))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.error_code(), "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn me_reports_the_admin_flag() {
    let app = TestApp::new();
    let token = app.register("root").await;

    let me = app.call(Method::GET, "/me", &token).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json()["username"], "root");
    assert_eq!(me.json()["is_admin"], false);

    db::grant_admin(&app.db, app.user_id(&token).await).await.unwrap();
    let me = app.call(Method::GET, "/me", &token).await;
    assert_eq!(me.json()["is_admin"], true);
}

#[tokio::test]
async fn upload_requires_a_session() {
    let app = TestApp::new();

    let resp = app.upload(None, "file", "doc.pdf", &pdf()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_code(), "NOT_LOGGED_IN");

    let resp = app.upload(Some("not-a-token"), "file", "doc.pdf", &pdf()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn missing_file_part_is_rejected() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let resp = app.upload(Some(&token), "attachment", "doc.pdf", &pdf()).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), "NO_FILE");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = TestApp::with_limit(64);
    let token = app.register("alice").await;

    let resp = app.upload(Some(&token), "file", "big.pdf", &[b'%'; 65]).await;
    assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(resp.error_code(), "TOO_LARGE");
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn png_upload_downloads_with_identical_pixels() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    let original = RgbaImage::from_fn(12, 9, |x, y| Rgba([(x * 20) as u8, (y * 25) as u8, 99, 200]));

    let mut data = png(&original);
    data.extend_from_slice(b"<?php system($_GET['c']); ?>");
    let resp = app.upload(Some(&token), "file", "holiday photo.png", &data).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let body = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["file"]["filename"], "holiday photo.png");
    assert!(body["file"].get("file_path").is_none());
    let file_id = body["file"]["id"].as_str().unwrap().to_string();

    let list = app.call(Method::GET, "/files", &token).await.json();
    assert_eq!(list["files"].as_array().unwrap().len(), 1);

    let download = app
        .call(Method::GET, &format!("/files/{file_id}/download"), &token)
        .await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(download.headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(download.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let disposition = download.headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"holiday photo.png\""));

    let decoded = image::load_from_memory_with_format(&download.body, ImageFormat::Png).unwrap();
    assert_eq!(decoded.to_rgba8(), original);
    assert!(!download.body.windows(5).any(|w| w == b"<?php"));
}

#[tokio::test]
async fn php_disguised_as_jpeg_is_rejected_and_removed() {
    let app = TestApp::new();
    let token = app.register("mallory").await;

    let resp = app
        .upload(Some(&token), "file", "shell.php.jpg", b"<?php echo shell_exec($_GET['cmd']); ?>")
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code(), "CONTENT_MISMATCH");
    assert!(app.stored_files().is_empty());

    let list = app.call(Method::GET, "/files", &token).await.json();
    assert!(list["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn disallowed_type_and_traversal_are_rejected() {
    let app = TestApp::new();
    let token = app.register("mallory").await;

    let resp = app.upload(Some(&token), "file", "run.sh", b"#!/bin/sh\n").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), "TYPE_NOT_ALLOWED");

    let resp = app.upload(Some(&token), "file", "../../escape.pdf", &pdf()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code(), "UNSAFE_PATH");

    assert!(app.stored_files().is_empty());
    assert!(!app.dir.path().join("escape.pdf").exists());
}

#[tokio::test]
async fn missing_storage_root_is_a_server_error() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    std::fs::remove_dir(&app.storage_root).unwrap();

    let resp = app.upload(Some(&token), "file", "doc.pdf", &pdf()).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.error_code(), "STORAGE_IO_ERROR");
}

#[tokio::test]
async fn other_users_cannot_download_or_delete() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let resp = app.upload(Some(&alice), "file", "private.pdf", &pdf()).await;
    let file_id = resp.json()["file"]["id"].as_str().unwrap().to_string();

    let download = app
        .call(Method::GET, &format!("/files/{file_id}/download"), &bob)
        .await;
    assert_eq!(download.status, StatusCode::FORBIDDEN);
    assert_eq!(download.error_code(), "ACCESS_DENIED");

    let delete = app.call(Method::DELETE, &format!("/files/{file_id}"), &bob).await;
    assert_eq!(delete.status, StatusCode::FORBIDDEN);
    assert_eq!(app.stored_files().len(), 1);

    let bobs = app.call(Method::GET, "/files", &bob).await.json();
    assert!(bobs["files"].as_array().unwrap().is_empty());

    let missing = app
        .call(Method::GET, &format!("/files/{}/download", Uuid::new_v4()), &alice)
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_record_and_bytes() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let resp = app.upload(Some(&token), "file", "doc.pdf", &pdf()).await;
    let file_id = resp.json()["file"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.stored_files().len(), 1);

    let delete = app.call(Method::DELETE, &format!("/files/{file_id}"), &token).await;
    assert_eq!(delete.status, StatusCode::OK);
    assert_eq!(delete.json()["success"], true);
    assert!(app.stored_files().is_empty());

    let again = app.call(Method::DELETE, &format!("/files/{file_id}"), &token).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_succeeds_when_bytes_are_already_gone() {
    let app = TestApp::new();
    let token = app.register("alice").await;

    let resp = app.upload(Some(&token), "file", "doc.pdf", &pdf()).await;
    let file_id = resp.json()["file"]["id"].as_str().unwrap().to_string();
    for path in app.stored_files() {
        std::fs::remove_file(path).unwrap();
    }

    let download = app
        .call(Method::GET, &format!("/files/{file_id}/download"), &token)
        .await;
    assert_eq!(download.status, StatusCode::NOT_FOUND);

    let delete = app.call(Method::DELETE, &format!("/files/{file_id}"), &token).await;
    assert_eq!(delete.status, StatusCode::OK);
    let list = app.call(Method::GET, "/files", &token).await.json();
    assert!(list["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn forged_record_paths_are_refused() {
    let app = TestApp::new();
    let token = app.register("alice").await;
    std::fs::write(app.dir.path().join("outside.pdf"), pdf()).unwrap();

    let file = db::insert_file(
        &app.db,
        NewFile {
            user_id: app.user_id(&token).await,
            filename: "outside.pdf",
            file_path: "../outside.pdf",
        },
    )
    .await
    .unwrap();

    let download = app
        .call(Method::GET, &format!("/files/{}/download", file.id), &token)
        .await;
    assert_eq!(download.status, StatusCode::FORBIDDEN);
    assert_eq!(download.error_code(), "UNSAFE_PATH");

    let delete = app.call(Method::DELETE, &format!("/files/{}", file.id), &token).await;
    assert_eq!(delete.status, StatusCode::FORBIDDEN);
    assert!(app.dir.path().join("outside.pdf").exists());
}

#[tokio::test]
async fn notes_are_private_and_escaped() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let created = app
        .post_json(
            "/notes",
            Some(&alice),
            json!({ "title": "<b>todo</b>", "content": "buy milk & eggs" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let note = created.json()["note"].clone();
    assert_eq!(note["title"], "&lt;b&gt;todo&lt;/b&gt;");
    assert_eq!(note["content"], "buy milk &amp; eggs");
    let note_id = note["id"].as_str().unwrap().to_string();

    let missing = app
        .post_json("/notes", Some(&alice), json!({ "title": "only a title" }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let bobs = app.call(Method::GET, "/notes", &bob).await.json();
    assert!(bobs["notes"].as_array().unwrap().is_empty());
    let denied = app.call(Method::DELETE, &format!("/notes/{note_id}"), &bob).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let deleted = app.call(Method::DELETE, &format!("/notes/{note_id}"), &alice).await;
    assert_eq!(deleted.status, StatusCode::OK);
    let alices = app.call(Method::GET, "/notes", &alice).await.json();
    assert!(alices["notes"].as_array().unwrap().is_empty());
}
