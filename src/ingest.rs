//! Repository ingestion: clone, chunk, document, index, and optionally
//! analyse the commit history of one repository.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chunking::chunk_file;
use crate::commits::CommitAnalyzer;
use crate::config::Config;
use crate::docs::DocumentationGenerator;
use crate::git::{walk_repo_files, SharedVersionControl};
use crate::llm::{Clock, SharedEmbedder, SharedGenerator};
use crate::models::{Chunk, Repository};
use crate::search::Indexer;
use crate::store::SharedStore;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub url: String,
    /// Defaults to the last path segment of the URL.
    pub title: Option<String>,
    pub user_id: String,
    pub analyze_commits: bool,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub repository: Repository,
    pub files: usize,
    pub chunks: usize,
    pub indexed: usize,
    /// `None` when commit analysis was not requested.
    pub commits: Option<usize>,
}

pub struct Ingestor {
    vcs: SharedVersionControl,
    store: SharedStore,
    embedder: SharedEmbedder,
    generator: SharedGenerator,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Ingestor {
    pub fn new(
        vcs: SharedVersionControl,
        store: SharedStore,
        embedder: SharedEmbedder,
        generator: SharedGenerator,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            vcs,
            store,
            embedder,
            generator,
            clock,
            config,
        }
    }

    /// Run the whole pipeline. The working clone is removed afterwards,
    /// whether or not the run succeeded.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestReport> {
        let repository_id = Uuid::new_v4();
        let repo_dir = self.config.repos_dir().join(repository_id.to_string());

        let result = self.run(repository_id, &repo_dir, request).await;

        if repo_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&repo_dir).await {
                tracing::warn!("Failed to remove clone {}: {e}", repo_dir.display());
            }
        }
        if let Err(e) = &result {
            tracing::error!("Failed to ingest {}: {e:#}", request.url);
        }
        result
    }

    async fn run(
        &self,
        repository_id: Uuid,
        repo_dir: &Path,
        request: &IngestRequest,
    ) -> Result<IngestReport> {
        let title = request
            .title
            .clone()
            .unwrap_or_else(|| title_from_url(&request.url));

        if let Some(parent) = repo_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let timeout = Duration::from_secs(self.config.clone_timeout_secs);
        tokio::time::timeout(timeout, self.vcs.clone_repo(&request.url, repo_dir))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Clone timed out after {}s",
                    self.config.clone_timeout_secs
                )
            })??;

        let walk_dir = repo_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_repo_files(&walk_dir))
            .await
            .context("File walk task failed")?;
        tracing::info!("Found {} indexable files in {title}", files.len());

        let chunks: Vec<Chunk> = files
            .iter()
            .flat_map(|f| chunk_file(&f.relative_path, &f.content))
            .collect();
        tracing::info!("Created {} chunks for {title}", chunks.len());

        let docs = match DocumentationGenerator::new(self.generator.clone())
            .generate(&chunks)
            .await
        {
            Ok(docs) => Some(docs),
            Err(e) => {
                tracing::warn!("Documentation generation failed for {title}: {e:#}");
                None
            }
        };

        let repository = Repository {
            id: repository_id,
            title: title.clone(),
            url: request.url.clone(),
            user_id: request.user_id.clone(),
            overview: docs.as_ref().map(|d| d.overview.clone()),
            architecture: docs.as_ref().map(|d| d.architecture.clone()),
            components: docs.map(|d| d.components).unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.store.put_repository(&repository).await?;

        let indexer = Indexer::new(
            self.embedder.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.config.indexing.clone(),
        );
        let indexed = indexer.index(&chunks, repository_id).await?;
        tracing::info!("Vector indexing complete for {title}");

        let commits = if request.analyze_commits {
            let analyzer = CommitAnalyzer::new(
                self.vcs.clone(),
                self.generator.clone(),
                self.clock.clone(),
                self.config.commits.clone(),
            );
            let commits = analyzer.analyze_history(repo_dir).await?;
            let count = commits.len();
            self.store.save_commits(repository_id, commits).await?;
            Some(count)
        } else {
            None
        };

        tracing::info!("Repository {title} ({repository_id}) is ready");
        Ok(IngestReport {
            repository,
            files: files.len(),
            chunks: chunks.len(),
            indexed,
            commits,
        })
    }
}

/// `https://host/org/name.git` -> `name`.
pub fn title_from_url(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        url.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::git::history::fixtures::commit_files;
    use crate::git::LibGit;
    use crate::llm::{Embedder, Generator, ManualClock};
    use crate::store::{LocalStore, Store};
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CallError> {
            if prompt.contains("Mermaid") {
                Ok("flowchart TD\n  Main --> Greeter".into())
            } else {
                Ok("A greeting library.".into())
            }
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl Generator for DownGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CallError> {
            Err(anyhow::anyhow!("connection refused").into())
        }
    }

    fn origin() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        commit_files(
            &repo,
            &[(
                "src/greet.js",
                "function greet(name) {\n  return `hi ${name}`;\n}\n\nclass Greeter {\n  hello() { return greet('x'); }\n}\n",
            )],
            "add greeter",
        );
        commit_files(
            &repo,
            &[("node_modules/dep/index.js", "function dep() {}\n")],
            "vendor dependency",
        );
        dir
    }

    fn ingestor(
        data: &Path,
        store: Arc<LocalStore>,
        generator: SharedGenerator,
    ) -> Ingestor {
        let config = Config {
            data_dir: data.to_path_buf(),
            ..Config::default()
        };
        Ingestor::new(
            Arc::new(LibGit),
            store,
            Arc::new(LengthEmbedder),
            generator,
            Arc::new(ManualClock::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_ingest_indexes_documents_and_cleans_up() {
        let origin = origin();
        let data = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let ingestor = ingestor(data.path(), store.clone(), Arc::new(FixedGenerator));

        let report = ingestor
            .ingest(&IngestRequest {
                url: origin.path().to_string_lossy().to_string(),
                title: Some("greeter".into()),
                user_id: "alice".into(),
                analyze_commits: true,
            })
            .await
            .unwrap();

        assert_eq!(report.files, 1);
        // greet, Greeter, Greeter.hello
        assert_eq!(report.chunks, 3);
        assert_eq!(report.indexed, 3);
        assert_eq!(report.commits, Some(2));

        let stored = store
            .get_repository(report.repository.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.overview.as_deref(), Some("A greeting library."));
        assert_eq!(
            stored.architecture.as_deref(),
            Some("flowchart TD\n  Main --> Greeter")
        );
        let documented: Vec<&str> = stored.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(documented, vec!["greet", "Greeter"]);
        assert_eq!(store.code_embeddings(stored.id).await.unwrap().len(), 3);
        assert_eq!(store.commits(stored.id).await.unwrap().len(), 2);

        let clone_dir = data.path().join("repos").join(stored.id.to_string());
        assert!(!clone_dir.exists());
    }

    #[tokio::test]
    async fn test_documentation_failure_is_not_fatal() {
        let origin = origin();
        let data = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let ingestor = ingestor(data.path(), store.clone(), Arc::new(DownGenerator));

        let report = ingestor
            .ingest(&IngestRequest {
                url: origin.path().to_string_lossy().to_string(),
                title: None,
                user_id: "alice".into(),
                analyze_commits: false,
            })
            .await
            .unwrap();

        assert!(report.repository.overview.is_none());
        assert!(report.repository.components.is_empty());
        assert_eq!(report.indexed, 3);
        assert_eq!(report.commits, None);
    }

    #[tokio::test]
    async fn test_failed_clone_persists_nothing() {
        let data = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::in_memory());
        let ingestor = ingestor(data.path(), store.clone(), Arc::new(FixedGenerator));

        let result = ingestor
            .ingest(&IngestRequest {
                url: data.path().join("missing").to_string_lossy().to_string(),
                title: None,
                user_id: "alice".into(),
                analyze_commits: false,
            })
            .await;

        assert!(result.is_err());
        assert!(store.list_repositories().await.unwrap().is_empty());
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(title_from_url("https://github.com/acme/shop.git"), "shop");
        assert_eq!(title_from_url("https://github.com/acme/shop/"), "shop");
        assert_eq!(title_from_url("git@github.com:acme/shop.git"), "shop");
        assert_eq!(title_from_url("/tmp/work/origin"), "origin");
    }
}
