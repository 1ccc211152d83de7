use std::fmt;
use std::str::FromStr;

use axum::extract::Multipart;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// what the client wants done with the target file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    /// start a fresh upload
    New,
    /// delete whatever is there and start fresh
    Overwrite,
    /// continue from the in-memory session or the partial file on disk
    Resume,
}

impl FromStr for UploadAction {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "overwrite" => Ok(Self::Overwrite),
            "resume" => Ok(Self::Resume),
            other => Err(UploadError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Overwrite => "overwrite",
            Self::Resume => "resume",
        })
    }
}

/// one validated chunk upload request
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_name: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub action: UploadAction,
    pub data: Bytes,
}

impl ChunkUpload {
    /// Reads every multipart field, in whatever order the client sent them,
    /// then validates. Missing or malformed fields are rejected, never
    /// defaulted.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, UploadError> {
        let mut form = ChunkUploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| UploadError::invalid_field("multipart", e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| UploadError::invalid_field("file", e.to_string()))?;
                    form.data = Some(data);
                }
                "file_name" | "chunk_index" | "total_chunks" | "action" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| UploadError::invalid_field("multipart", e.to_string()))?;
                    form.set(&name, text);
                }
                other => {
                    tracing::trace!("Ignoring unknown form field: {}", other);
                }
            }
        }

        form.validate()
    }
}

/// raw form values before validation
#[derive(Debug, Default)]
pub struct ChunkUploadForm {
    pub file_name: Option<String>,
    pub chunk_index: Option<String>,
    pub total_chunks: Option<String>,
    pub action: Option<String>,
    pub data: Option<Bytes>,
}

impl ChunkUploadForm {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "file_name" => self.file_name = Some(value),
            "chunk_index" => self.chunk_index = Some(value),
            "total_chunks" => self.total_chunks = Some(value),
            "action" => self.action = Some(value),
            _ => {}
        }
    }

    /// action is checked first so an unknown action is reported as such
    pub fn validate(self) -> Result<ChunkUpload, UploadError> {
        let action: UploadAction = self.action.unwrap_or_default().trim().parse()?;

        let data = self
            .data
            .ok_or_else(|| UploadError::invalid_field("file", "missing chunk payload"))?;

        let file_name = self.file_name.unwrap_or_default().trim().to_string();
        if file_name.is_empty() {
            return Err(UploadError::invalid_field("file_name", "must not be empty"));
        }

        let chunk_index = parse_count("chunk_index", self.chunk_index)?;
        let total_chunks = parse_count("total_chunks", self.total_chunks)?;
        if total_chunks == 0 {
            return Err(UploadError::invalid_field(
                "total_chunks",
                "must be a positive integer",
            ));
        }

        Ok(ChunkUpload {
            file_name,
            chunk_index,
            total_chunks,
            action,
            data,
        })
    }
}

fn parse_count(field: &'static str, raw: Option<String>) -> Result<u64, UploadError> {
    let raw = raw.ok_or_else(|| UploadError::invalid_field(field, "missing"))?;
    raw.trim().parse::<u64>().map_err(|_| {
        UploadError::invalid_field(field, format!("{raw:?} is not a non-negative integer"))
    })
}

// query string of the resume-info endpoint
#[derive(Deserialize, Debug)]
pub struct ResumeInfoQuery {
    pub file_name: Option<String>,
}

// an entry of the directory browser
#[derive(Serialize, Debug)]
pub struct FileInfo {
    pub name: String,
    pub size: String,
    pub size_bytes: u64,
    pub modified: String,
    pub is_dir: bool,
    pub is_text: bool,
}

// response for the directory browser
#[derive(Serialize, Debug)]
pub struct DirectoryListing {
    pub path: String,
    pub entries: Vec<FileInfo>,
    pub total: usize,
}

// response for text preview
#[derive(Serialize, Debug)]
pub struct PreviewResponse {
    pub file_name: String,
    pub file_size: u64,
    pub content: String,
}

// plain status reply, used by delete
#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

// reply to an accepted chunk
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum ChunkResponse {
    Partial {
        status: &'static str,
        message: String,
        next_chunk: u64,
    },
    Complete {
        status: &'static str,
        message: String,
        complete: bool,
        file_name: String,
        file_path: String,
        size: u64,
    },
}
