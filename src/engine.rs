//! Chunk ingestion: validate a chunk against the upload's session, append it
//! to the target file, advance the session and report what comes next.
//!
//! Requests for the same target are serialized by the store's per-key lock
//! from session lookup to the final store/delete, so two requests carrying
//! the same chunk index can never both pass the ordering check.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::UploadError;
use crate::models::{ChunkResponse, ChunkUpload, UploadAction};
use crate::paths;
use crate::reconcile;
use crate::state::AppState;
use crate::store::{UploadKey, UploadSession};
use crate::utils::format_size;

/// result of an accepted chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// more chunks expected; `next_chunk` is the index the client sends next
    Partial {
        next_chunk: u64,
        total_chunks: u64,
    },
    /// last chunk written, session removed
    Complete {
        file_name: String,
        /// root-relative path of the assembled file
        file_path: String,
        size: u64,
    },
}

impl IngestOutcome {
    pub fn into_response(self) -> ChunkResponse {
        match self {
            Self::Partial {
                next_chunk,
                total_chunks,
            } => ChunkResponse::Partial {
                status: "success",
                message: format!("chunk {}/{} uploaded", next_chunk, total_chunks),
                next_chunk,
            },
            Self::Complete {
                file_name,
                file_path,
                size,
            } => ChunkResponse::Complete {
                status: "success",
                message: "upload complete".to_string(),
                complete: true,
                file_name,
                file_path,
                size,
            },
        }
    }
}

/// Ingests one chunk into `target_dir` (relative to the upload root).
///
/// Validation failures return before anything is touched. A failed write
/// leaves the session where it was and trims the file back, so the client
/// can retry the same index.
pub async fn ingest(
    state: &AppState,
    target_dir: &str,
    upload: ChunkUpload,
) -> Result<IngestOutcome, UploadError> {
    tracing::trace!(
        "Chunk {} of {} for {} ({})",
        upload.chunk_index,
        upload.total_chunks,
        upload.file_name,
        upload.action
    );

    check_declared_size(state, &upload)?;
    let target = resolve_target(state, target_dir, &upload.file_name).await?;

    let key = UploadKey::for_target(&target);
    let _guard = state.uploads.lock(&key).await;

    let mut session = begin_or_continue(state, &key, &target, &upload).await?;

    if session.is_complete() {
        return Err(UploadError::invalid_field(
            "chunk_index",
            format!("all {} chunks already received", session.total_chunks),
        ));
    }

    if upload.chunk_index != session.received_chunks {
        tracing::warn!(
            "Chunk out of order for {}: expected {}, received {}",
            upload.file_name,
            session.received_chunks,
            upload.chunk_index
        );
        return Err(UploadError::ChunkOutOfOrder {
            expected: session.received_chunks,
            received: upload.chunk_index,
        });
    }

    let size = append_chunk(&session.target_file_path, &upload.data).await?;

    session.received_chunks += 1;
    session.last_updated = Utc::now();

    tracing::debug!(
        "📦 Received chunk {}/{} for {} ({} bytes)",
        session.received_chunks,
        session.total_chunks,
        upload.file_name,
        upload.data.len()
    );

    if session.is_complete() {
        state.uploads.delete(&key);
        let file_path = paths::relative_display(&state.files_dir, &session.target_file_path);
        tracing::info!(
            "✅ Completed chunked upload: {} ({})",
            file_path,
            format_size(size)
        );
        return Ok(IngestOutcome::Complete {
            file_name: upload.file_name,
            file_path,
            size,
        });
    }

    let next_chunk = session.received_chunks;
    let total_chunks = session.total_chunks;
    state.uploads.store(key, session);

    Ok(IngestOutcome::Partial {
        next_chunk,
        total_chunks,
    })
}

/// declared total is payload length times chunk count, so it overestimates
/// when the final chunk is short
fn check_declared_size(state: &AppState, upload: &ChunkUpload) -> Result<(), UploadError> {
    if upload.action == UploadAction::Resume {
        return Ok(());
    }

    let declared = (upload.data.len() as u64).saturating_mul(upload.total_chunks);
    if declared >= state.max_file_size {
        tracing::warn!(
            "Rejected {}: declared {} against a limit of {}",
            upload.file_name,
            format_size(declared),
            format_size(state.max_file_size)
        );
        return Err(UploadError::SizeLimitExceeded {
            declared,
            max: state.max_file_size,
        });
    }
    Ok(())
}

/// resolves directory and file, both must stay under the root and the
/// directory must already exist
async fn resolve_target(
    state: &AppState,
    target_dir: &str,
    file_name: &str,
) -> Result<PathBuf, UploadError> {
    let dir = paths::resolve(&state.files_dir, target_dir)?;
    let target = paths::resolve_file(&state.files_dir, target_dir, file_name)?;

    paths::ensure_directory(&dir, target_dir).await?;
    Ok(target)
}

/// picks the session this chunk belongs to; nothing is stored here
async fn begin_or_continue(
    state: &AppState,
    key: &UploadKey,
    target: &Path,
    upload: &ChunkUpload,
) -> Result<UploadSession, UploadError> {
    match (upload.action, upload.chunk_index) {
        (UploadAction::New | UploadAction::Overwrite, 0) => {
            if upload.action == UploadAction::Overwrite {
                remove_previous(target).await;
            }
            tracing::info!(
                "📤 Starting upload of {} ({} chunks, {})",
                upload.file_name,
                upload.total_chunks,
                upload.action
            );
            Ok(UploadSession::new(
                target.to_path_buf(),
                upload.total_chunks,
                0,
            ))
        }
        _ => {
            if let Some(session) = state.uploads.load(key) {
                return Ok(session);
            }
            if upload.action != UploadAction::Resume {
                tracing::warn!("No upload in progress for {}", upload.file_name);
                return Err(UploadError::SessionNotFound(upload.file_name.clone()));
            }

            let progress = reconcile::reconcile(target, state.chunk_size)
                .await
                .map_err(|e| {
                    tracing::warn!("Cannot resume {}: {}", upload.file_name, e);
                    e
                })?;
            tracing::info!(
                "Recovered {} from disk: {} chunks ({})",
                upload.file_name,
                progress.received_chunks,
                format_size(progress.uploaded_bytes)
            );
            Ok(UploadSession::new(
                target.to_path_buf(),
                upload.total_chunks,
                progress.received_chunks,
            ))
        }
    }
}

// a failed delete only warns; the append then extends the old bytes
async fn remove_previous(target: &Path) {
    match fs::remove_file(target).await {
        Ok(()) => tracing::debug!("Removed previous file at {:?}", target),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove previous file {:?}: {}", target, e),
    }
}

/// Appends `data` and returns the new file length. On failure the file is
/// truncated back to its previous length.
async fn append_chunk(path: &Path, data: &[u8]) -> Result<u64, UploadError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            tracing::error!("Failed to open {:?} for append: {}", path, e);
            e
        })?;

    let before = file.metadata().await?.len();

    let written = async {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        tracing::error!("Failed to write chunk to {:?}: {}", path, e);
        if let Err(trim) = file.set_len(before).await {
            tracing::warn!("Failed to trim {:?} back to {} bytes: {}", path, before, trim);
        }
        return Err(e.into());
    }

    Ok(before + data.len() as u64)
}
