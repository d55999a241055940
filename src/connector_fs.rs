//! Filesystem scanner: turns a checked-out repository into [`Document`]s.
//!
//! Walks the tree with `walkdir`, prunes excluded directory names
//! (`.git`, `.venv`, `node_modules` by default), keeps files whose
//! extension is on the code or documentation allow-list, and reads each one
//! as UTF-8. Files that cannot be read are logged and skipped. Documents
//! are returned sorted by relative path.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

use crate::config::SourceConfig;
use crate::models::{Document, DocumentKind, DocumentMetadata};

/// Read every allow-listed file under `root`.
///
/// # Errors
///
/// Fails if `root` is not a directory or an extension pattern is invalid.
/// Individual unreadable files never fail the scan.
pub fn scan_repository(root: &Path, settings: &SourceConfig) -> Result<Vec<Document>> {
    if !root.is_dir() {
        bail!("Repository root is not a directory: {}", root.display());
    }

    let code_set = build_globset(&settings.code_extensions)?;
    let doc_set = build_globset(&settings.doc_extensions)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e, &settings.exclude_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let kind = if code_set.is_match(&rel_str) {
            DocumentKind::Code
        } else if doc_set.is_match(&rel_str) {
            DocumentKind::Doc
        } else {
            continue;
        };

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "skipping unreadable file");
                continue;
            }
        };

        let file_type = relative
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        docs.push(Document {
            text,
            metadata: Arc::new(DocumentMetadata {
                path: rel_str,
                file_type,
                kind,
                is_implementation: kind == DocumentKind::Code,
            }),
        });
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.metadata.path.cmp(&b.metadata.path));

    tracing::info!(root = %root.display(), documents = docs.len(), "scanned repository");
    Ok(docs)
}

fn is_excluded_dir(entry: &DirEntry, exclude_dirs: &[String]) -> bool {
    entry.file_type().is_dir()
        && exclude_dirs
            .iter()
            .any(|d| entry.file_name().to_string_lossy() == d.as_str())
}

/// One `**/*.{ext}` pattern per allow-listed extension.
fn build_globset(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        builder.add(Glob::new(&format!("**/*.{}", ext))?);
    }
    Ok(builder.build()?)
}
