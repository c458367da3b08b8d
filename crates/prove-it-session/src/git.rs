//! The git probe: read-only queries against the target project's repository.
//!
//! Same `Command::new("git")` + `current_dir` + status-check idiom as
//! `csa-session::git`, but read-only and pointed at the project under
//! verification rather than prove_it's own session store.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Whether `dir` is inside a git working tree.
pub fn is_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// The repository's top-level directory, if `dir` is inside one.
pub fn repo_root(dir: &Path) -> Result<Option<PathBuf>> {
    if !is_repo(dir) {
        return Ok(None);
    }
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .context("failed to run git rev-parse --show-toplevel")?;
    if !output.status.success() {
        return Ok(None);
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(PathBuf::from(root)))
}

/// The current HEAD commit sha, or `None` on an unborn branch (no commits yet).
pub fn head_sha(repo_root: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git rev-parse HEAD")?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// A stable hash of the working tree's dirty state (§4.B: `statusHash`),
/// computed over `git status --porcelain=v1` so it changes whenever staged,
/// unstaged, or untracked state changes, independent of HEAD.
pub fn status_hash(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["status", "--porcelain=v1"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git status")?;
    if !output.status.success() {
        anyhow::bail!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let mut hasher = Sha256::new();
    hasher.update(&output.stdout);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Paths git considers tracked, relative to `repo_root`.
pub fn tracked_files(repo_root: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["ls-files"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git ls-files")?;
    if !output.status.success() {
        anyhow::bail!(
            "git ls-files failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|s| s.to_string())
        .collect())
}

/// Paths that differ between `base` and the working tree (staged + unstaged),
/// restricted to `scope` when non-empty.
pub fn diff_files(repo_root: &Path, base: &str, scope: &[String]) -> Result<Vec<String>> {
    let mut args = vec!["diff".to_string(), "--name-only".to_string(), base.to_string()];
    if !scope.is_empty() {
        args.push("--".to_string());
        args.extend(scope.iter().cloned());
    }
    let output = Command::new("git")
        .args(&args)
        .current_dir(repo_root)
        .output()
        .context("failed to run git diff --name-only")?;
    if !output.status.success() {
        anyhow::bail!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|s| s.to_string())
        .collect())
}

/// The `git diff --cached` patch text, for the `{{staged_diff}}` template
/// variable (§4.G step 4). Empty string (not an error) when nothing is
/// staged.
pub fn staged_diff(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["diff", "--cached"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git diff --cached")?;
    if !output.status.success() {
        anyhow::bail!(
            "git diff --cached failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// The content of `path` as it existed at `rev`, or `None` if the path
/// didn't exist at that revision (a newly-added file).
pub fn show_file_at(repo_root: &Path, rev: &str, path: &str) -> Result<Option<String>> {
    let spec = format!("{rev}:{path}");
    let output = Command::new("git")
        .args(["show", &spec])
        .current_dir(repo_root)
        .output()
        .context("failed to run git show")?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
}
