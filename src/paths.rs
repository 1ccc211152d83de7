//! Root-confined path resolution.
//!
//! Every handler that touches the filesystem goes through [`resolve`] (or
//! [`resolve_file`]) before any `stat`, `open` or `remove`. The check runs on
//! the final joined path, never on the raw input alone.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::UploadError;

/// Canonicalizes the upload root once at startup so later prefix checks
/// compare like with like (symlinks and `..` already resolved).
pub fn canonicalize_root(root: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(root)
}

/// Joins `relative` onto `root` and rejects anything that lands outside it.
///
/// `relative` is percent-decoded once more before joining, so a payload that
/// was encoded twice (`%252e%252e%252f`) is caught the same as a plain `../`.
/// A leading `/` is treated as relative to the root.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, UploadError> {
    let decoded = decode(relative)?;
    resolve_decoded(root, &decoded)
}

/// Resolves `dir/file_name` as one path. Only `dir` is percent-decoded; the
/// file name comes from a form field and is taken literally, so it must be a
/// single plain component.
pub fn resolve_file(root: &Path, dir: &str, file_name: &str) -> Result<PathBuf, UploadError> {
    if !is_plain_name(file_name) {
        tracing::warn!(file_name, "rejected file name that is not a single component");
        return Err(UploadError::PathViolation);
    }

    let dir = decode(dir)?;
    let resolved = resolve_decoded(root, &dir)?.join(file_name);

    // a plain name can't climb, but the joined path is still checked
    if resolved == root || !resolved.starts_with(root) {
        return Err(UploadError::PathViolation);
    }
    Ok(resolved)
}

/// Fails unless `path` exists and is a directory. `shown` is what the
/// client asked for, used in the error instead of the absolute path.
pub async fn ensure_directory(path: &Path, shown: &str) -> Result<(), UploadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(UploadError::NotADirectory(shown.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(UploadError::DirectoryNotFound(shown.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Path relative to the root for display in responses and logs.
pub fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

// already-decoded segments must not be decoded again
fn resolve_decoded(root: &Path, relative: &str) -> Result<PathBuf, UploadError> {
    let joined = root.join(relative.trim_start_matches(['/', '\\']));
    let normalized = normalize(&joined).ok_or(UploadError::PathViolation)?;
    if !normalized.starts_with(root) {
        tracing::warn!(requested = %relative, "rejected path outside upload root");
        return Err(UploadError::PathViolation);
    }
    Ok(normalized)
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn decode(raw: &str) -> Result<Cow<'_, str>, UploadError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| UploadError::PathViolation)?;
    if decoded.contains('\0') {
        return Err(UploadError::PathViolation);
    }
    Ok(decoded)
}

/// Lexical `.`/`..` removal. Returns `None` when `..` would climb above the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    Some(out)
}
