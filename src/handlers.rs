use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue},
    response::{Json, Response},
};
use std::io::ErrorKind;
use std::path::Path as FsPath;
use std::sync::Arc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::engine;
use crate::error::UploadError;
use crate::models::{
    ChunkResponse, ChunkUpload, DirectoryListing, FileInfo, PreviewResponse, ResumeInfoQuery,
    StatusResponse,
};
use crate::paths;
use crate::reconcile::{self, ResumeInfo};
use crate::state::AppState;
use crate::store::UploadKey;
use crate::utils::{format_size, is_text_file};

/// largest file the preview endpoint will read into memory
pub const MAX_PREVIEW_SIZE: u64 = 10 * 1024 * 1024;

// RFC 5987 attr-char, everything else is percent-encoded
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

// upload one chunk into the root directory
pub async fn upload_chunk_root(
    state: State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChunkResponse>, UploadError> {
    upload_chunk(state, Path(String::new()), multipart).await
}

// upload one chunk into a subdirectory of the root
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Path(dir): Path<String>,
    multipart: Multipart,
) -> Result<Json<ChunkResponse>, UploadError> {
    tracing::debug!("Processing chunk upload into {:?}", dir);

    let upload = ChunkUpload::from_multipart(multipart).await.map_err(|e| {
        tracing::warn!("Rejected chunk upload form: {}", e);
        e
    })?;

    let outcome = engine::ingest(&state, &dir, upload).await?;
    Ok(Json(outcome.into_response()))
}

pub async fn resume_info_root(
    state: State<Arc<AppState>>,
    query: Query<ResumeInfoQuery>,
) -> Result<Json<ResumeInfo>, UploadError> {
    resume_info(state, Path(String::new()), query).await
}

// report how much of a file is already on disk; never creates a session
pub async fn resume_info(
    State(state): State<Arc<AppState>>,
    Path(dir): Path<String>,
    Query(query): Query<ResumeInfoQuery>,
) -> Result<Json<ResumeInfo>, UploadError> {
    let file_name = query
        .file_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| UploadError::invalid_field("file_name", "must not be empty"))?;

    let dir_path = paths::resolve(&state.files_dir, &dir)?;
    paths::ensure_directory(&dir_path, &dir).await?;
    let target = paths::resolve_file(&state.files_dir, &dir, &file_name)?;

    let info = reconcile::resume_info(&file_name, &target, state.chunk_size).await?;
    Ok(Json(info))
}

// delete a file, its `.part` sibling and any in-flight upload for it
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(rel_path): Path<String>,
) -> Result<Json<StatusResponse>, UploadError> {
    tracing::debug!("Request to delete file: {}", rel_path);

    let target = paths::resolve(&state.files_dir, &rel_path)?;
    if target == state.files_dir {
        return Err(UploadError::PathViolation);
    }

    if let Ok(meta) = fs::metadata(&target).await {
        if meta.is_dir() {
            return Err(UploadError::NotAFile(rel_path));
        }
    }

    // wait out any chunk being written for this file
    let key = UploadKey::for_target(&target);
    let _guard = state.uploads.lock(&key).await;

    remove_if_exists(&target).await?;
    remove_if_exists(&part_sibling(&target)).await?;

    if state.uploads.delete(&key).is_some() {
        tracing::debug!("Evicted in-flight upload for {}", rel_path);
    }

    tracing::info!("🗑️  Deleted file: {}", rel_path);

    Ok(Json(StatusResponse {
        status: "success",
        message: "file deleted".to_string(),
    }))
}

// stream a file back as an attachment
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(rel_path): Path<String>,
) -> Result<Response, UploadError> {
    let target = paths::resolve(&state.files_dir, &rel_path)?;
    let meta = regular_file(&target, &rel_path).await?;

    let file = fs::File::open(&target).await?;
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    tracing::debug!("Serving download: {} ({})", rel_path, format_size(meta.len()));

    let disposition = content_disposition(&file_name);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    if let Ok(content_type) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    Ok(response)
}

// return the contents of a small text file
pub async fn preview_file(
    State(state): State<Arc<AppState>>,
    Path(rel_path): Path<String>,
) -> Result<Json<PreviewResponse>, UploadError> {
    let target = paths::resolve(&state.files_dir, &rel_path)?;
    let meta = regular_file(&target, &rel_path).await?;

    let file_size = meta.len();
    if file_size == 0 {
        return Err(UploadError::PreviewRejected("file is empty".to_string()));
    }
    if file_size > MAX_PREVIEW_SIZE {
        return Err(UploadError::PreviewRejected(format!(
            "file is larger than {}",
            format_size(MAX_PREVIEW_SIZE)
        )));
    }
    if !is_text_file(&target) {
        return Err(UploadError::PreviewRejected(
            "only text files can be previewed".to_string(),
        ));
    }

    let content = fs::read(&target).await.map_err(|e| {
        tracing::warn!("Failed to read {:?} for preview: {}", target, e);
        e
    })?;

    Ok(Json(PreviewResponse {
        file_name: target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_size,
        content: String::from_utf8_lossy(&content).into_owned(),
    }))
}

pub async fn explore_root(
    state: State<Arc<AppState>>,
) -> Result<Json<DirectoryListing>, UploadError> {
    explore_dir(state, Path(String::new())).await
}

// list a directory, hiding dotfiles and `.part` leftovers
pub async fn explore_dir(
    State(state): State<Arc<AppState>>,
    Path(rel_path): Path<String>,
) -> Result<Json<DirectoryListing>, UploadError> {
    let dir = paths::resolve(&state.files_dir, &rel_path)?;
    paths::ensure_directory(&dir, &rel_path).await?;
    tracing::debug!("Listing files in directory: {:?}", dir);

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(&dir).await?;

    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.ends_with(".part") {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Failed to read metadata for {}: {}", name, e);
                continue;
            }
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let is_dir = metadata.is_dir();
        let size_bytes = if is_dir { 0 } else { metadata.len() };

        entries.push(FileInfo {
            is_text: !is_dir && is_text_file(&name),
            name,
            size: if is_dir {
                "--".to_string()
            } else {
                format_size(size_bytes)
            },
            size_bytes,
            modified,
            is_dir,
        });
    }

    let total = entries.len();
    tracing::debug!("Found {} entries", total);
    Ok(Json(DirectoryListing {
        path: paths::relative_display(&state.files_dir, &dir),
        entries,
        total,
    }))
}

// health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chunkvault",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn regular_file(path: &FsPath, shown: &str) -> Result<std::fs::Metadata, UploadError> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta),
        Ok(_) => Err(UploadError::NotAFile(shown.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(UploadError::FileNotFound(shown.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &FsPath) -> Result<(), UploadError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::error!("Failed to delete {:?}: {}", path, e);
            Err(e.into())
        }
    }
}

/// `attachment` header carrying the name twice: an ASCII fallback for old
/// clients and the exact UTF-8 name as `filename*` (RFC 6266)
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    let encoded = utf8_percent_encode(file_name, FILENAME_ENCODE_SET);

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn part_sibling(path: &FsPath) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
