use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Files above this size are not read.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// A text file read from a cloned repo
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub relative_path: String,
    pub content: String,
}

/// Clone a git repository to the target directory.
pub fn clone_repo(url: &str, target: &Path) -> Result<()> {
    tracing::info!("Cloning {} into {}", url, target.display());
    git2::Repository::clone(url, target).with_context(|| format!("Failed to clone {url}"))?;
    tracing::info!("Clone complete: {}", target.display());
    Ok(())
}

/// Walk all text files in a cloned repo and return their contents.
///
/// Hidden entries, dependency/build output directories, files over 1 MiB
/// and files that are not valid UTF-8 are skipped. Paths come back sorted.
pub fn walk_repo_files(repo_dir: &Path) -> Vec<RepoFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(repo_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();

        if let Ok(meta) = entry.metadata() {
            if meta.len() > MAX_FILE_BYTES {
                tracing::debug!("Skipping large file {}", path.display());
                continue;
            }
        }

        let relative = path
            .strip_prefix(repo_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        match std::fs::read_to_string(path) {
            Ok(content) => files.push(RepoFile {
                relative_path: relative,
                content,
            }),
            Err(_) => {
                // Skip files that can't be read as UTF-8
                continue;
            }
        }
    }

    files
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir()
        && matches!(
            name.as_ref(),
            "node_modules" | "target" | "dist" | "build" | "vendor" | "__pycache__"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_skips_hidden_and_build_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for dir in ["src", "node_modules/pkg", ".git", "dist", "docs"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        std::fs::write(root.join("src/main.js"), "function main() {}").unwrap();
        std::fs::write(root.join("docs/guide.md"), "# Guide").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join(".git/config"), "x").unwrap();
        std::fs::write(root.join("dist/bundle.js"), "x").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::write(root.join("logo.bin"), [0xff, 0xfe, 0x00, 0x81]).unwrap();
        // A file named like an ignored dir is still read.
        std::fs::write(root.join("build"), "build script").unwrap();

        let paths: Vec<_> = walk_repo_files(root)
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        assert_eq!(paths, vec!["build", "docs/guide.md", "src/main.js"]);
    }

    #[test]
    fn test_walk_skips_large_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "a".repeat(MAX_FILE_BYTES as usize + 1))
            .unwrap();
        std::fs::write(tmp.path().join("small.txt"), "a").unwrap();

        let files = walk_repo_files(tmp.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "small.txt");
    }
}
