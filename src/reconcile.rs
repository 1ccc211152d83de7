//! Rebuilds upload progress from what is already on disk.
//!
//! This is a heuristic: it assumes every earlier chunk was exactly
//! `chunk_size` bytes (except possibly the last) and that no write was torn.
//! File content is never inspected.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use tokio::fs;

use crate::error::UploadError;
use crate::utils::format_size;

/// progress recovered from the size of a partial file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub uploaded_bytes: u64,
    pub received_chunks: u64,
}

/// answer to a resume-info query, computed fresh every time
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub file_name: String,
    pub file_exists: bool,
    pub uploaded_bytes: u64,
    pub uploaded_chunks: u64,
}

/// `ceil(bytes / chunk_size)`; a zero chunk size counts nothing
pub fn chunks_for(bytes: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    bytes.div_ceil(chunk_size)
}

/// Derives how many chunks of `target` were already received.
///
/// Fails with [`UploadError::CannotResume`] when there is no file to resume.
pub async fn reconcile(target: &Path, chunk_size: u64) -> Result<Reconciled, UploadError> {
    match fs::metadata(target).await {
        Ok(meta) if meta.is_file() => {
            let uploaded_bytes = meta.len();
            Ok(Reconciled {
                uploaded_bytes,
                received_chunks: chunks_for(uploaded_bytes, chunk_size),
            })
        }
        Ok(_) => Err(UploadError::NotAFile(display_name(target))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(UploadError::CannotResume(display_name(target)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read-only progress report for `target`; never creates a session.
pub async fn resume_info(
    file_name: &str,
    target: &Path,
    chunk_size: u64,
) -> Result<ResumeInfo, UploadError> {
    let mut info = ResumeInfo {
        file_name: file_name.to_string(),
        file_exists: false,
        uploaded_bytes: 0,
        uploaded_chunks: 0,
    };

    match reconcile(target, chunk_size).await {
        Ok(progress) => {
            info.file_exists = true;
            info.uploaded_bytes = progress.uploaded_bytes;
            info.uploaded_chunks = progress.received_chunks;
            tracing::info!(
                file_name,
                uploaded = %format_size(progress.uploaded_bytes),
                uploaded_chunks = progress.received_chunks,
                "resume info"
            );
        }
        Err(UploadError::CannotResume(_)) => {
            tracing::debug!(file_name, "no partial file, nothing to resume");
        }
        Err(e) => return Err(e),
    }

    Ok(info)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
