use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::Store;
use crate::models::{
    Commit, Conversation, ConversationEmbeddingRecord, EmbeddingRecord, Repository,
};

const REPOSITORIES_FILE: &str = "repositories.json";
const CONVERSATIONS_FILE: &str = "conversations.json";
const CODE_DIR: &str = "code";
const CONVERSATION_VECTORS_DIR: &str = "conversation_vectors";
const COMMITS_DIR: &str = "commits";

/// In-memory store with optional JSON persistence.
///
/// Layout under the store directory:
/// ```text
/// repositories.json
/// conversations.json
/// code/<repository-id>.json
/// conversation_vectors/<repository-id>.json
/// commits/<repository-id>.json
/// ```
pub struct LocalStore {
    dir: Option<PathBuf>,
    repositories: RwLock<HashMap<Uuid, Repository>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    code: RwLock<HashMap<Uuid, Vec<EmbeddingRecord>>>,
    conversation_vectors: RwLock<HashMap<Uuid, Vec<ConversationEmbeddingRecord>>>,
    commits: RwLock<HashMap<Uuid, Vec<Commit>>>,
}

impl LocalStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            repositories: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            code: RwLock::new(HashMap::new()),
            conversation_vectors: RwLock::new(HashMap::new()),
            commits: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) a store directory and load whatever it holds.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store dir {}", dir.display()))?;

        let store = Self {
            dir: Some(dir.to_path_buf()),
            repositories: RwLock::new(read_json(&dir.join(REPOSITORIES_FILE))?.unwrap_or_default()),
            conversations: RwLock::new(
                read_json(&dir.join(CONVERSATIONS_FILE))?.unwrap_or_default(),
            ),
            code: RwLock::new(read_per_repository(&dir.join(CODE_DIR))?),
            conversation_vectors: RwLock::new(read_per_repository(
                &dir.join(CONVERSATION_VECTORS_DIR),
            )?),
            commits: RwLock::new(read_per_repository(&dir.join(COMMITS_DIR))?),
        };

        tracing::info!(
            "Opened store at {} ({} repositories, {} conversations)",
            dir.display(),
            store.repositories.read().len(),
            store.conversations.read().len()
        );
        Ok(store)
    }

    fn persist<T: Serialize + ?Sized>(&self, relative: &Path, value: &T) -> Result<()> {
        match &self.dir {
            Some(dir) => write_json(&dir.join(relative), value),
            None => Ok(()),
        }
    }
}

/// Undo a map insert after a failed write.
fn restore<T>(map: &mut HashMap<Uuid, T>, id: Uuid, previous: Option<T>) {
    match previous {
        Some(value) => map.insert(id, value),
        None => map.remove(&id),
    };
}

fn repository_file(dir: &str, repository_id: Uuid) -> PathBuf {
    Path::new(dir).join(format!("{repository_id}.json"))
}

/// Atomic write via temp file + rename.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Load every `<uuid>.json` in `dir`; other files are ignored.
fn read_per_repository<T: DeserializeOwned>(dir: &Path) -> Result<HashMap<Uuid, Vec<T>>> {
    let mut map = HashMap::new();
    if !dir.exists() {
        return Ok(map);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            continue;
        };
        if let Some(records) = read_json(&path)? {
            map.insert(id, records);
        }
    }
    Ok(map)
}

#[async_trait]
impl Store for LocalStore {
    async fn put_repository(&self, repository: &Repository) -> Result<()> {
        let mut repositories = self.repositories.write();
        let previous = repositories.insert(repository.id, repository.clone());
        let written = self.persist(Path::new(REPOSITORIES_FILE), &*repositories);
        if written.is_err() {
            restore(&mut repositories, repository.id, previous);
        }
        written
    }

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        Ok(self.repositories.read().get(&id).cloned())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut list: Vec<Repository> = self.repositories.read().values().cloned().collect();
        list.sort_by_key(|r| r.created_at);
        Ok(list)
    }

    async fn append_code_embeddings(
        &self,
        repository_id: Uuid,
        records: Vec<EmbeddingRecord>,
    ) -> Result<()> {
        let mut code = self.code.write();
        let space = code.entry(repository_id).or_default();
        let before = space.len();
        space.extend(records);
        let written = self.persist(&repository_file(CODE_DIR, repository_id), space.as_slice());
        if written.is_err() {
            space.truncate(before);
        }
        written
    }

    async fn code_embeddings(&self, repository_id: Uuid) -> Result<Vec<EmbeddingRecord>> {
        Ok(self
            .code
            .read()
            .get(&repository_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(&id).cloned())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.write();
        let previous = conversations.insert(conversation.id, conversation.clone());
        let written = self.persist(Path::new(CONVERSATIONS_FILE), &*conversations);
        if written.is_err() {
            restore(&mut conversations, conversation.id, previous);
        }
        written
    }

    async fn append_conversation_embedding(
        &self,
        repository_id: Uuid,
        record: ConversationEmbeddingRecord,
    ) -> Result<()> {
        let mut vectors = self.conversation_vectors.write();
        let space = vectors.entry(repository_id).or_default();
        space.push(record);
        let written = self.persist(
            &repository_file(CONVERSATION_VECTORS_DIR, repository_id),
            space.as_slice(),
        );
        if written.is_err() {
            space.pop();
        }
        written
    }

    async fn conversation_embeddings(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<ConversationEmbeddingRecord>> {
        Ok(self
            .conversation_vectors
            .read()
            .get(&repository_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_commits(&self, repository_id: Uuid, commits: Vec<Commit>) -> Result<()> {
        let mut all = self.commits.write();
        let stored = all.entry(repository_id).or_default();
        let previous = std::mem::replace(stored, commits);
        let written = self.persist(&repository_file(COMMITS_DIR, repository_id), stored.as_slice());
        if written.is_err() {
            *stored = previous;
        }
        written
    }

    async fn commits(&self, repository_id: Uuid) -> Result<Vec<Commit>> {
        Ok(self
            .commits
            .read()
            .get(&repository_id)
            .cloned()
            .unwrap_or_default())
    }
}
