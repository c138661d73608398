use anyhow::{Context, Result};
use chrono::DateTime;
use git2::{DiffFindOptions, DiffFormat, Oid, Repository};
use std::path::Path;

use crate::models::{Author, CommitInfo};

/// All commits reachable from HEAD, newest first. An unborn HEAD has none.
pub fn log(repo_path: &Path) -> Result<Vec<CommitInfo>> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("Failed to open repository {}", repo_path.display()))?;
    if repo.head().is_err() {
        return Ok(Vec::new());
    }

    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(git2::Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let author = commit.author();
        commits.push(CommitInfo {
            sha: commit.id().to_string(),
            parent_sha: commit.parent_id(0).ok().map(|id| id.to_string()),
            message: commit.message().unwrap_or_default().trim().to_string(),
            author: Author {
                name: author.name().unwrap_or_default().to_string(),
                email: author.email().unwrap_or_default().to_string(),
                date: DateTime::from_timestamp(author.when().seconds(), 0).unwrap_or_default(),
            },
        });
    }
    Ok(commits)
}

/// Unified diff of a commit against its first parent (or the empty tree
/// for a root commit), with rename detection. Merge commits yield an
/// empty diff.
pub fn show(repo_path: &Path, sha: &str) -> Result<String> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("Failed to open repository {}", repo_path.display()))?;
    let oid = Oid::from_str(sha).with_context(|| format!("Invalid commit id {sha}"))?;
    let commit = repo
        .find_commit(oid)
        .with_context(|| format!("Commit {sha} not found"))?;

    if commit.parent_count() > 1 {
        return Ok(String::new());
    }

    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };

    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            patch.push(line.origin());
        }
        patch.push_str(&String::from_utf8_lossy(line.content()));
        true
    })
    .with_context(|| format!("Failed to render diff for {sha}"))?;

    Ok(patch)
}
