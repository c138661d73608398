//! Version-control capability: clone, commit log, per-commit patch text.
//!
//! libgit2 calls are blocking, so [`LibGit`] runs them on the blocking pool.

pub mod clone;
pub mod history;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::CommitInfo;

pub use clone::{walk_repo_files, RepoFile};

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn clone_repo(&self, url: &str, target: &Path) -> Result<()>;
    async fn log(&self, repo_path: &Path) -> Result<Vec<CommitInfo>>;
    /// Unified diff text of one commit.
    async fn show(&self, repo_path: &Path, sha: &str) -> Result<String>;
}

pub type SharedVersionControl = Arc<dyn VersionControl>;

/// [`VersionControl`] backed by git2.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibGit;

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("git task panicked")?
}

#[async_trait]
impl VersionControl for LibGit {
    async fn clone_repo(&self, url: &str, target: &Path) -> Result<()> {
        let url = url.to_string();
        let target: PathBuf = target.to_path_buf();
        blocking(move || clone::clone_repo(&url, &target)).await
    }

    async fn log(&self, repo_path: &Path) -> Result<Vec<CommitInfo>> {
        let path = repo_path.to_path_buf();
        blocking(move || history::log(&path)).await
    }

    async fn show(&self, repo_path: &Path, sha: &str) -> Result<String> {
        let path = repo_path.to_path_buf();
        let sha = sha.to_string();
        blocking(move || history::show(&path, &sha)).await
    }
}
