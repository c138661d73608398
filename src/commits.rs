//! Commit history analysis.
//!
//! Walks the full log in batches, parses each commit's patch into file
//! changes and stats, and attaches a best-effort generated summary. One bad
//! commit (patch timeout, git error, empty diff) is dropped without
//! affecting the rest of its batch.

use anyhow::Result;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CommitConfig;
use crate::diff::parse_diff;
use crate::error::CallError;
use crate::git::SharedVersionControl;
use crate::llm::{Clock, SharedGenerator};
use crate::models::{Commit, CommitInfo, CommitStats, CommitSummary};

const QUOTA_OVERVIEW: &str = "API quota exceeded. Using basic analysis.";
const QUOTA_ARCHITECTURE: &str = "Quota exceeded. Please try later.";
const BASIC_OVERVIEW: &str = "Basic analysis only";
const BASIC_ARCHITECTURE: &str = "Service temporarily unavailable";

/// Once tripped by a throttling error, keeps summaries on the local
/// fallback until the cooldown has passed.
pub struct QuotaGuard {
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    tripped_until: Mutex<Option<Instant>>,
}

impl QuotaGuard {
    pub fn new(clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            clock,
            cooldown,
            tripped_until: Mutex::new(None),
        }
    }

    pub fn is_tripped(&self) -> bool {
        let mut until = self.tripped_until.lock();
        match *until {
            Some(t) if self.clock.now() < t => true,
            Some(_) => {
                *until = None;
                tracing::info!("Quota cooldown over, resuming generated commit summaries");
                false
            }
            None => false,
        }
    }

    pub fn trip(&self) {
        *self.tripped_until.lock() = Some(self.clock.now() + self.cooldown);
    }
}

pub struct CommitAnalyzer {
    vcs: SharedVersionControl,
    generator: SharedGenerator,
    clock: Arc<dyn Clock>,
    config: CommitConfig,
    quota: QuotaGuard,
}

impl CommitAnalyzer {
    pub fn new(
        vcs: SharedVersionControl,
        generator: SharedGenerator,
        clock: Arc<dyn Clock>,
        config: CommitConfig,
    ) -> Self {
        let quota = QuotaGuard::new(
            clock.clone(),
            Duration::from_secs(config.quota_cooldown_secs),
        );
        Self {
            vcs,
            generator,
            clock,
            config,
            quota,
        }
    }

    /// Analyse every commit reachable from HEAD, newest first.
    ///
    /// Only a failure to read the log itself is an error.
    pub async fn analyze_history(&self, repo_path: &Path) -> Result<Vec<Commit>> {
        let log = self.vcs.log(repo_path).await?;
        tracing::info!("Analysing {} commits in {}", log.len(), repo_path.display());

        let batch_size = self.config.batch_size.max(1);
        let mut commits = Vec::with_capacity(log.len());

        for (n, batch) in log.chunks(batch_size).enumerate() {
            if n > 0 {
                self.clock
                    .sleep(Duration::from_millis(self.config.batch_pause_ms))
                    .await;
            }
            let results = join_all(batch.iter().map(|info| self.process(repo_path, info))).await;
            commits.extend(results.into_iter().flatten());
        }

        tracing::info!(
            "Analysed {}/{} commits in {}",
            commits.len(),
            log.len(),
            repo_path.display()
        );
        Ok(commits)
    }

    async fn process(&self, repo_path: &Path, info: &CommitInfo) -> Option<Commit> {
        let timeout = Duration::from_secs(self.config.show_timeout_secs);
        let patch = match tokio::time::timeout(timeout, self.vcs.show(repo_path, &info.sha)).await
        {
            Ok(Ok(patch)) => patch,
            Ok(Err(e)) => {
                tracing::warn!("Dropping commit {}: {e:#}", info.sha);
                return None;
            }
            Err(_) => {
                tracing::warn!("Dropping commit {}: patch timed out after {timeout:?}", info.sha);
                return None;
            }
        };

        let files = parse_diff(&patch);
        if files.is_empty() {
            tracing::warn!("Dropping commit {}: no file changes", info.sha);
            return None;
        }

        let mut commit = Commit {
            sha: info.sha.clone(),
            parent_sha: info.parent_sha.clone(),
            message: info.message.clone(),
            author: info.author.clone(),
            stats: CommitStats::from_files(&files),
            files,
            summary: None,
        };
        commit.summary = Some(self.summarize(&commit).await);
        Some(commit)
    }

    /// Generated summary, or a deterministic one when generation is
    /// unavailable. Never fails.
    pub async fn summarize(&self, commit: &Commit) -> CommitSummary {
        if self.quota.is_tripped() {
            return quota_summary(commit);
        }

        match self.generator.generate(&summary_prompt(commit)).await {
            Ok(text) => parse_summary(&text),
            Err(CallError::Throttled(reason)) => {
                tracing::warn!(
                    "Quota exceeded while summarising {}: {reason}; using basic analysis for {:?}",
                    commit.sha,
                    Duration::from_secs(self.config.quota_cooldown_secs)
                );
                self.quota.trip();
                quota_summary(commit)
            }
            Err(e) => {
                tracing::warn!("Summary generation failed for {}: {e:#}", commit.sha);
                CommitSummary {
                    overview: BASIC_OVERVIEW.to_string(),
                    impact: basic_impact(commit),
                    architecture: BASIC_ARCHITECTURE.to_string(),
                }
            }
        }
    }
}

/// File count and changed-line total, plus the message.
pub fn basic_impact(commit: &Commit) -> String {
    let total_changes: usize = commit
        .files
        .iter()
        .map(|f| f.stats.additions + f.stats.deletions)
        .sum();
    format!(
        "This commit affects {} files with {total_changes} total changes. Commit message: {}",
        commit.files.len(),
        commit.message
    )
}

fn quota_summary(commit: &Commit) -> CommitSummary {
    CommitSummary {
        overview: QUOTA_OVERVIEW.to_string(),
        impact: basic_impact(commit),
        architecture: QUOTA_ARCHITECTURE.to_string(),
    }
}

fn summary_prompt(commit: &Commit) -> String {
    let changes: String = commit
        .files
        .iter()
        .map(|f| {
            format!(
                "File: {} ({:?})\nChanges: +{}/-{}\n",
                f.filename, f.change_type, f.stats.additions, f.stats.deletions
            )
        })
        .collect();
    format!(
        "Analyze this commit:\nMessage: {}\nChanges:\n{changes}\n\
         Reply with three paragraphs separated by blank lines: an overview of the \
         changes, their impact, and their architectural implications.",
        commit.message
    )
}

/// Overview, impact and architecture are the first three paragraphs.
fn parse_summary(text: &str) -> CommitSummary {
    let mut sections = text.split("\n\n").map(str::trim);
    let mut next = || sections.next().unwrap_or_default().to_string();
    CommitSummary {
        overview: next(),
        impact: next(),
        architecture: next(),
    }
}
