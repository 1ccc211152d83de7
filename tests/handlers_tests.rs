use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chunkvault::error::UploadError;
use chunkvault::handlers::{delete_file, explore_dir, explore_root, health_check, preview_file};
use chunkvault::paths::canonicalize_root;
use chunkvault::server::build_routes;
use chunkvault::state::AppState;
use chunkvault::store::{UploadKey, UploadSession};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const BOUNDARY: &str = "chunkvault-test-boundary";

fn setup() -> (TempDir, Arc<AppState>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = canonicalize_root(temp_dir.path()).unwrap();
    let state = Arc::new(AppState::new(root, 20 * 1024 * 1024 * 1024, 4));
    (temp_dir, state)
}

fn app(state: &Arc<AppState>) -> Router {
    build_routes(state.clone())
}

// hand-built multipart body, fields in the order given
fn multipart_body(fields: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .unwrap();
    }
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .unwrap();
    body.extend_from_slice(payload);
    write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();
    body
}

fn upload_request(
    uri: &str,
    name: &str,
    index: u64,
    total: u64,
    action: &str,
    payload: &[u8],
) -> Request<Body> {
    let index = index.to_string();
    let total = total.to_string();
    let body = multipart_body(
        &[
            ("file_name", name),
            ("chunk_index", &index),
            ("total_chunks", &total),
            ("action", action),
        ],
        payload,
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let response = health_check().await;
    assert_eq!(response.0["status"], "healthy");
    assert_eq!(response.0["service"], "chunkvault");
}

#[tokio::test]
async fn test_upload_chunks_over_http() {
    let (_tmp, state) = setup();
    std::fs::create_dir(state.files_dir.join("docs")).unwrap();

    let response = app(&state)
        .oneshot(upload_request("/upload/docs", "notes.txt", 0, 2, "new", b"abcd"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["next_chunk"], 1);

    let response = app(&state)
        .oneshot(upload_request("/upload/docs", "notes.txt", 1, 2, "new", b"ef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["complete"], true);
    assert_eq!(body["file_name"], "notes.txt");
    assert_eq!(body["file_path"], "docs/notes.txt");
    assert_eq!(body["size"], 6);

    let content = std::fs::read(state.files_dir.join("docs/notes.txt")).unwrap();
    assert_eq!(content, b"abcdef");
    assert!(state.uploads.is_empty());
}

#[tokio::test]
async fn test_upload_to_root() {
    let (_tmp, state) = setup();

    let response = app(&state)
        .oneshot(upload_request("/upload", "one.bin", 0, 1, "new", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["file_path"], "one.bin");
}

#[tokio::test]
async fn test_upload_out_of_order_reports_expected_chunk() {
    let (_tmp, state) = setup();

    app(&state)
        .oneshot(upload_request("/upload", "clip.mov", 0, 5, "new", b"aaaa"))
        .await
        .unwrap();

    let response = app(&state)
        .oneshot(upload_request("/upload", "clip.mov", 3, 5, "new", b"dddd"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["expected_chunk"], 1);
    assert_eq!(body["received_chunk"], 3);
}

#[tokio::test]
async fn test_upload_rejects_bad_form() {
    let (_tmp, state) = setup();

    let response = app(&state)
        .oneshot(upload_request("/upload", "a.txt", 0, 1, "append", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("invalid action"));

    // total_chunks of zero is never accepted
    let response = app(&state)
        .oneshot(upload_request("/upload", "a.txt", 0, 0, "new", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!state.files_dir.join("a.txt").exists());
}

#[tokio::test]
async fn test_upload_rejects_traversal() {
    let (_tmp, state) = setup();

    let response = app(&state)
        .oneshot(upload_request("/upload", "../../secret.txt", 0, 1, "new", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(&state)
        .oneshot(upload_request("/upload/..%2F..", "secret.txt", 0, 1, "new", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_resume_info_endpoint() {
    let (_tmp, state) = setup();
    std::fs::create_dir(state.files_dir.join("media")).unwrap();
    std::fs::write(state.files_dir.join("media/big.iso"), b"0123456789").unwrap();

    let response = app(&state)
        .oneshot(get("/get_resume_info/media?file_name=big.iso"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["file_name"], "big.iso");
    assert_eq!(body["file_exists"], true);
    assert_eq!(body["uploaded_bytes"], 10);
    assert_eq!(body["uploaded_chunks"], 3);

    let response = app(&state)
        .oneshot(get("/get_resume_info?file_name=absent.iso"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["file_exists"], false);
    assert_eq!(body["uploaded_chunks"], 0);

    // querying never opens a session
    assert!(state.uploads.is_empty());
}

#[tokio::test]
async fn test_resume_info_validation() {
    let (_tmp, state) = setup();

    let response = app(&state).oneshot(get("/get_resume_info")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&state)
        .oneshot(get("/get_resume_info/nowhere?file_name=a.bin"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&state)
        .oneshot(get("/get_resume_info?file_name=..%2F..%2Fetc%2Fpasswd"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_file() {
    let (_tmp, state) = setup();

    // Create a file with a leftover part and an in-flight session
    let file_path = state.files_dir.join("delete_me.bin");
    let part_path = state.files_dir.join("delete_me.bin.part");
    File::create(&file_path).unwrap();
    File::create(&part_path).unwrap();
    let key = UploadKey::for_target(&file_path);
    state
        .uploads
        .store(key.clone(), UploadSession::new(file_path.clone(), 4, 1));

    let response = delete_file(State(state.clone()), Path("delete_me.bin".to_string()))
        .await
        .unwrap();
    assert_eq!(response.0.status, "success");
    assert!(!file_path.exists());
    assert!(!part_path.exists());
    assert!(state.uploads.load(&key).is_none());

    // Delete non-existent is not an error
    let result = delete_file(State(state.clone()), Path("non_existent.txt".to_string())).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_delete_refuses_root_and_directories() {
    let (_tmp, state) = setup();
    std::fs::create_dir(state.files_dir.join("keep")).unwrap();

    let result = delete_file(State(state.clone()), Path(String::new())).await;
    assert!(matches!(result, Err(UploadError::PathViolation)));

    let result = delete_file(State(state.clone()), Path("keep".to_string())).await;
    assert!(matches!(result, Err(UploadError::NotAFile(_))));
    assert!(state.files_dir.join("keep").is_dir());
}

#[tokio::test]
async fn test_download_file() {
    let (_tmp, state) = setup();
    std::fs::write(state.files_dir.join("report.json"), b"{\"ok\":true}").unwrap();

    let response = app(&state).oneshot(get("/download/report.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(
        headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"report.json\"; filename*=UTF-8''report.json"
    );
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "11");
    assert!(headers.get(header::CACHE_CONTROL).is_none());

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"{\"ok\":true}");

    let response = app(&state).oneshot(get("/download/missing.bin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_keeps_non_ascii_name() {
    let (_tmp, state) = setup();
    std::fs::write(state.files_dir.join("报告.txt"), b"hello").unwrap();

    let response = app(&state)
        .oneshot(get("/download/%E6%8A%A5%E5%91%8A.txt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"__.txt\"; filename*=UTF-8''%E6%8A%A5%E5%91%8A.txt"
    );
}

#[tokio::test]
async fn test_preview_file() {
    let (_tmp, state) = setup();
    std::fs::write(state.files_dir.join("readme.md"), "# hello\n").unwrap();

    let response = preview_file(State(state.clone()), Path("readme.md".to_string()))
        .await
        .unwrap();
    assert_eq!(response.0.file_name, "readme.md");
    assert_eq!(response.0.file_size, 8);
    assert_eq!(response.0.content, "# hello\n");
}

#[tokio::test]
async fn test_preview_rejections() {
    let (_tmp, state) = setup();
    std::fs::write(state.files_dir.join("empty.txt"), b"").unwrap();
    std::fs::write(state.files_dir.join("image.png"), b"\x89PNG").unwrap();
    std::fs::write(state.files_dir.join("huge.log"), vec![b'a'; 10 * 1024 * 1024 + 1]).unwrap();

    for name in ["empty.txt", "image.png", "huge.log"] {
        let result = preview_file(State(state.clone()), Path(name.to_string())).await;
        assert!(
            matches!(result, Err(UploadError::PreviewRejected(_))),
            "{name} should not be previewable"
        );
    }

    let result = preview_file(State(state.clone()), Path("gone.txt".to_string())).await;
    assert!(matches!(result, Err(UploadError::FileNotFound(_))));
}

#[tokio::test]
async fn test_explore_hides_dotfiles_and_parts() {
    let (_tmp, state) = setup();
    std::fs::write(state.files_dir.join("visible.txt"), b"hi").unwrap();
    std::fs::write(state.files_dir.join(".hidden"), b"x").unwrap();
    std::fs::write(state.files_dir.join("movie.mkv.part"), b"x").unwrap();
    std::fs::create_dir(state.files_dir.join("sub")).unwrap();
    std::fs::write(state.files_dir.join("sub/inner.bin"), b"abc").unwrap();

    let response = explore_root(State(state.clone())).await.unwrap();
    let mut names: Vec<_> = response.0.entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["sub", "visible.txt"]);
    assert_eq!(response.0.total, 2);
    assert_eq!(response.0.path, "");

    let text = response.0.entries.iter().find(|e| e.name == "visible.txt").unwrap();
    assert!(text.is_text);
    assert!(!text.is_dir);
    assert_eq!(text.size_bytes, 2);
    assert_eq!(text.size, "2.00 B");

    let dir = response.0.entries.iter().find(|e| e.name == "sub").unwrap();
    assert!(dir.is_dir);
    assert_eq!(dir.size, "--");

    let response = explore_dir(State(state.clone()), Path("sub".to_string()))
        .await
        .unwrap();
    assert_eq!(response.0.path, "sub");
    assert_eq!(response.0.entries.len(), 1);
    assert!(!response.0.entries[0].is_text);

    let result = explore_dir(State(state.clone()), Path("visible.txt".to_string())).await;
    assert!(matches!(result, Err(UploadError::NotADirectory(_))));
}

#[tokio::test]
async fn test_traversal_is_forbidden_everywhere() {
    let (_tmp, state) = setup();

    for uri in [
        "/download/..%2F..%2Fetc%2Fpasswd",
        "/preview/..%2Fsecret.txt",
        "/explore/..%2F..",
        "/download/%252e%252e%252fsecret.txt",
    ] {
        let response = app(&state).oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(json(response).await["status"], "error");
    }

    let response = app(&state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/delete/..%2F..%2Fsecret.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
