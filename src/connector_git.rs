//! Git repository cloning through the `git` command-line tool.
//!
//! Remote repositories are cloned into a scratch directory named after a
//! short SHA-256 of the URL, so the same URL always lands in the same
//! place. An existing clone is refreshed with `git fetch` followed by a
//! hard reset instead of being cloned again.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::RagError;

/// Whether a locator points at a remote repository rather than a local path.
pub fn is_remote(locator: &str) -> bool {
    let l = locator.trim();
    l.starts_with("http://")
        || l.starts_with("https://")
        || l.starts_with("ssh://")
        || l.starts_with("git://")
        || l.starts_with("git@")
        || (l.ends_with(".git") && !Path::new(l).exists())
}

/// Scratch directory for `url` under `scratch_root`.
pub fn clone_dir(scratch_root: &Path, url: &str) -> PathBuf {
    scratch_root.join(short_hash(url.trim()))
}

/// Clone `url` into `dest`, or refresh `dest` if it already holds a clone.
///
/// # Errors
///
/// Returns [`RagError::SourceUnavailable`] when `git` is not installed or
/// any git command exits non-zero; the message includes git's stderr.
pub fn clone_repository(url: &str, dest: &Path) -> Result<(), RagError> {
    ensure_git()?;

    if dest.join(".git").exists() {
        tracing::info!(url, dest = %dest.display(), "refreshing existing clone");
        return refresh(dest);
    }

    std::fs::create_dir_all(dest).map_err(|e| {
        RagError::SourceUnavailable(format!(
            "Failed to create clone directory {}: {}",
            dest.display(),
            e
        ))
    })?;

    tracing::info!(url, dest = %dest.display(), "cloning repository");
    let output = Command::new("git")
        .args(["clone", "--depth", "1"])
        .arg(url)
        .arg(dest)
        .output()
        .map_err(|e| RagError::SourceUnavailable(format!("Failed to execute 'git clone': {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        discard_partial_clone(dest);
        return Err(RagError::SourceUnavailable(format!(
            "git clone failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

/// Remove a failed clone so the next attempt starts from an empty directory.
fn discard_partial_clone(dest: &Path) {
    match std::fs::remove_dir_all(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            dest = %dest.display(),
            error = %e,
            "failed to remove partial clone"
        ),
    }
}

fn ensure_git() -> Result<(), RagError> {
    let output = Command::new("git").arg("--version").output().map_err(|e| {
        RagError::SourceUnavailable(format!("git is not installed or not on PATH: {}", e))
    })?;
    if !output.status.success() {
        return Err(RagError::SourceUnavailable(
            "'git --version' exited with an error".to_string(),
        ));
    }
    Ok(())
}

fn refresh(repo_dir: &Path) -> Result<(), RagError> {
    run_git(repo_dir, &["fetch", "--depth", "1", "origin"])?;
    run_git(repo_dir, &["reset", "--hard", "FETCH_HEAD"])?;
    Ok(())
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<(), RagError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| {
            RagError::SourceUnavailable(format!("Failed to execute 'git {}': {}", args[0], e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RagError::SourceUnavailable(format!(
            "git {} failed: {}",
            args[0],
            stderr.trim()
        )));
    }
    Ok(())
}

pub(crate) fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    /// Create a one-commit repository to clone from.
    fn origin_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        git(dir, &["init", "-q"]);
        std::fs::write(dir.join("main.rs"), "fn main() {}").unwrap();
        git(dir, &["add", "."]);
        git(
            dir,
            &[
                "-c",
                "user.name=test",
                "-c",
                "user.email=test@example.com",
                "commit",
                "-q",
                "-m",
                "init",
            ],
        );
        tmp
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://github.com/org/repo"));
        assert!(is_remote("git@github.com:org/repo.git"));
        assert!(is_remote("ssh://git@host/repo"));
        assert!(!is_remote("/tmp/some/local/dir"));
        assert!(!is_remote("./relative"));
    }

    #[test]
    fn test_clone_dir_is_stable() {
        let root = Path::new("/scratch");
        let a = clone_dir(root, "https://github.com/org/repo");
        let b = clone_dir(root, " https://github.com/org/repo ");
        let c = clone_dir(root, "https://github.com/org/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.file_name().unwrap().len(), 12);
    }

    #[test]
    fn test_clone_and_refresh_local_origin() {
        if !git_available() {
            return;
        }
        let origin = origin_repo();
        let scratch = TempDir::new().unwrap();
        let dest = scratch.path().join("clone");
        let url = format!("file://{}", origin.path().display());

        clone_repository(&url, &dest).unwrap();
        assert!(dest.join("main.rs").exists());

        // Second call refreshes the existing clone
        clone_repository(&url, &dest).unwrap();
        assert!(dest.join("main.rs").exists());
    }

    #[test]
    fn test_clone_failure_reports_stderr() {
        if !git_available() {
            return;
        }
        let scratch = TempDir::new().unwrap();
        let dest = scratch.path().join("clone");
        let url = format!("file://{}/does-not-exist", scratch.path().display());

        let err = clone_repository(&url, &dest).unwrap_err();
        match err {
            RagError::SourceUnavailable(msg) => assert!(msg.contains("git clone failed"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn test_discard_partial_clone() {
        let scratch = TempDir::new().unwrap();
        let dest = scratch.path().join("half");
        std::fs::create_dir_all(dest.join(".git")).unwrap();
        std::fs::write(dest.join(".git/HEAD"), "ref: refs/heads/main").unwrap();

        discard_partial_clone(&dest);
        assert!(!dest.exists());

        // Already gone is not an error
        discard_partial_clone(&dest);
    }
}
