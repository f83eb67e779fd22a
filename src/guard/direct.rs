//! Direct file request inspection.
//!
//! Decides whether a request path names a script under the content root that
//! may be executed. The containment check runs on the lexically normalized
//! path before any filesystem access, then again on the canonical path once
//! the file is known to exist (symlinks).

use std::path::{Component, Path, PathBuf};

use crate::config::{DIRECT_INDEX_FILE, DIRECT_SCRIPT_EXTENSION};
use crate::error_handling::TraversalError;

/// Joins `request_path` onto `root`, collapsing `.` and `..` segments.
///
/// No filesystem access. Fails when the path carries a NUL byte or climbs
/// above `root`.
pub fn normalize_request_path(root: &Path, request_path: &str) -> Result<PathBuf, TraversalError> {
    if request_path.contains('\0') {
        return Err(TraversalError::NullByte);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in request_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(TraversalError::EscapesRoot);
                }
            }
            segment => segments.push(segment),
        }
    }

    let mut path = root.to_path_buf();
    for segment in segments {
        let segment = Path::new(segment);
        // a segment such as "C:" must not replace the root
        if !matches!(segment.components().next(), Some(Component::Normal(_)))
            || segment.components().count() != 1
        {
            return Err(TraversalError::EscapesRoot);
        }
        path.push(segment);
    }

    if !path.starts_with(root) {
        return Err(TraversalError::EscapesRoot);
    }
    Ok(path)
}

/// Resolves `request_path` to an existing script under `root`.
///
/// A directory resolves to its index script. The returned path is canonical.
pub async fn inspect_direct_path(root: &Path, request_path: &str) -> Result<PathBuf, TraversalError> {
    let mut path = normalize_request_path(root, request_path)?;

    let is_dir = request_path.ends_with('/')
        || tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
    if is_dir {
        path.push(DIRECT_INDEX_FILE);
    }

    let has_script_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(DIRECT_SCRIPT_EXTENSION));
    if !has_script_extension {
        return Err(TraversalError::BadExtension);
    }

    let canonical = match tokio::fs::canonicalize(&path).await {
        Ok(canonical) => canonical,
        Err(_) => return Err(TraversalError::NotFound),
    };
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| TraversalError::NotFound)?;
    if !canonical.starts_with(&canonical_root) {
        return Err(TraversalError::EscapesRoot);
    }
    if !tokio::fs::metadata(&canonical)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return Err(TraversalError::NotFound);
    }
    Ok(canonical)
}

/// Whether the rejected request still names an existing file.
///
/// Paths that could not be normalized never count as existing.
pub async fn rejected_path_exists(root: &Path, request_path: &str, error: TraversalError) -> bool {
    match error {
        TraversalError::NullByte | TraversalError::EscapesRoot => false,
        TraversalError::NotFound => false,
        TraversalError::BadExtension => match normalize_request_path(root, request_path) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        },
    }
}
