//! Document Source: resolve a repository locator into documents.
//!
//! A locator is either a remote URL (cloned into the scratch directory
//! first) or a local directory path.

use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::connector_fs::scan_repository;
use crate::connector_git::{clone_dir, clone_repository, is_remote, short_hash};
use crate::error::RagError;
use crate::models::Document;

/// Stable identity of a repository locator, used to key snapshots.
pub fn repository_key(locator: &str) -> String {
    short_hash(normalize_locator(locator).as_str())
}

/// Trim whitespace and trailing slashes so trivially different spellings
/// of one locator share an identity.
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() {
        trimmed.to_string()
    } else {
        stripped.to_string()
    }
}

/// Where the documents for `locator` live on disk after any clone.
pub fn checkout_path(locator: &str, settings: &SourceConfig) -> PathBuf {
    let locator = normalize_locator(locator);
    if is_remote(&locator) {
        clone_dir(&settings.scratch_dir, &locator)
    } else {
        PathBuf::from(locator)
    }
}

/// Fetch all documents of a repository.
///
/// Blocking: runs `git` and reads files synchronously. Async callers should
/// use `tokio::task::spawn_blocking`.
///
/// # Errors
///
/// [`RagError::SourceUnavailable`] when the clone fails or the local path
/// cannot be scanned.
pub fn fetch(locator: &str, settings: &SourceConfig) -> Result<Vec<Document>, RagError> {
    let normalized = normalize_locator(locator);
    let root = checkout_path(&normalized, settings);

    if is_remote(&normalized) {
        clone_repository(&normalized, &root)?;
    } else if !Path::new(&root).is_dir() {
        return Err(RagError::SourceUnavailable(format!(
            "Repository path does not exist: {}",
            root.display()
        )));
    }

    scan_repository(&root, settings).map_err(|e| RagError::SourceUnavailable(e.to_string()))
}
