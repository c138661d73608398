//! Persistence capability.
//!
//! The [`Store`] trait is everything the pipeline needs from storage:
//! repositories, the two embedding spaces (code and conversation),
//! conversations and analysed commits. Embedding spaces are append-only.
//!
//! [`LocalStore`] keeps everything in memory and, when opened on a
//! directory, mirrors each collection to JSON files.

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Commit, Conversation, ConversationEmbeddingRecord, EmbeddingRecord, Repository,
};

pub use local::LocalStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_repository(&self, repository: &Repository) -> Result<()>;
    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>>;
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Append vectors to a repository's code space.
    async fn append_code_embeddings(
        &self,
        repository_id: Uuid,
        records: Vec<EmbeddingRecord>,
    ) -> Result<()>;
    async fn code_embeddings(&self, repository_id: Uuid) -> Result<Vec<EmbeddingRecord>>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Append one question/answer vector to a repository's conversation space.
    async fn append_conversation_embedding(
        &self,
        repository_id: Uuid,
        record: ConversationEmbeddingRecord,
    ) -> Result<()>;
    async fn conversation_embeddings(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<ConversationEmbeddingRecord>>;

    /// Replace the analysed commit history of a repository.
    async fn save_commits(&self, repository_id: Uuid, commits: Vec<Commit>) -> Result<()>;
    async fn commits(&self, repository_id: Uuid) -> Result<Vec<Commit>>;
}

pub type SharedStore = Arc<dyn Store>;
