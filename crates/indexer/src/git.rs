//! Thin async wrappers over the `git` CLI.

use crate::{IndexerError, Result};
use std::path::{Path, PathBuf};

async fn run_git(dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .map_err(|err| IndexerError::Git(format!("spawn git {}: {err}", args.join(" "))))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(IndexerError::Git(if stderr.is_empty() {
            format!("git {} failed with {}", args.join(" "), output.status)
        } else {
            stderr
        }));
    }
    Ok(output.stdout)
}

pub async fn is_git_repo(path: &Path) -> bool {
    match run_git(path, &["rev-parse", "--is-inside-work-tree"]).await {
        Ok(out) => String::from_utf8_lossy(&out).trim() == "true",
        Err(_) => false,
    }
}

/// Top-level directory of the work tree containing `path`.
pub async fn repo_root(path: &Path) -> Result<PathBuf> {
    let out = run_git(path, &["rev-parse", "--show-toplevel"]).await?;
    let root = String::from_utf8_lossy(&out).trim().to_string();
    if root.is_empty() {
        return Err(IndexerError::Git("git reported an empty top-level".into()));
    }
    Ok(PathBuf::from(root))
}

/// Tracked paths, relative to `root`, `/`-separated, sorted and deduplicated.
pub async fn list_tracked_files(root: &Path) -> Result<Vec<String>> {
    let out = run_git(root, &["ls-files", "-z"]).await?;
    let mut paths: Vec<String> = out
        .split(|b| *b == 0)
        .filter(|raw| !raw.is_empty())
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// `None` for a repository without commits.
pub async fn head_commit(root: &Path) -> Option<String> {
    let out = run_git(root, &["rev-parse", "HEAD"]).await.ok()?;
    let head = String::from_utf8_lossy(&out).trim().to_string();
    (!head.is_empty()).then_some(head)
}
