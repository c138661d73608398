use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Code chunks ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    FileBlock,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::FileBlock => "file_block",
        }
    }
}

/// A named, typed slice of a source file used as a retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub name: String,
    pub content: String,
    /// Path of the file the chunk was cut from.
    pub location: String,
    /// Position of the chunk among the chunks of its file (0-based).
    pub ordinal: usize,
    /// Byte span in the original file.
    pub start_byte: usize,
    pub end_byte: usize,
    /// 1-based line span in the original file.
    pub start_line: usize,
    pub end_line: usize,
}

impl Chunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            kind: self.kind,
            name: self.name.clone(),
            location: self.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub kind: ChunkKind,
    pub name: String,
    pub location: String,
}

/// A stored code vector. Append-only per repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

// ─── Repositories ────────────────────────────────────────

/// A tracked repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub user_id: String,
    /// Generated project overview, used as the question-answering preamble.
    pub overview: Option<String>,
    /// Generated Mermaid architecture diagram.
    pub architecture: Option<String>,
    /// Generated documentation of each class and function.
    #[serde(default)]
    pub components: Vec<ComponentDoc>,
    pub created_at: DateTime<Utc>,
}

/// Generated documentation of one class or function chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDoc {
    pub name: String,
    pub kind: ChunkKind,
    pub location: String,
    pub documentation: String,
}

// ─── Conversations ───────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Code chunks the answer was grounded on. Empty on user turns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_chunks: Vec<ChunkMetadata>,
}

/// Ordered turns owned by one (repository, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub user_id: String,
    pub turns: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    pub fn new(repository_id: Uuid, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repository_id,
            user_id: user_id.to_string(),
            turns: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Append a question and its answer as one user/assistant pair. The
    /// chunks retrieved for the answer are kept on the assistant turn.
    pub fn push_exchange(
        &mut self,
        question: &str,
        answer: &str,
        relevant_chunks: Vec<ChunkMetadata>,
    ) {
        let now = Utc::now();
        self.turns.push(ConversationTurn {
            role: Role::User,
            content: question.to_string(),
            timestamp: now,
            relevant_chunks: Vec::new(),
        });
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            content: answer.to_string(),
            timestamp: now,
            relevant_chunks,
        });
        self.last_updated = now;
    }

    /// Text of the latest user/assistant pair, if the conversation ends with one.
    pub fn latest_pair_text(&self) -> Option<String> {
        let [.., question, answer] = self.turns.as_slice() else {
            return None;
        };
        if question.role != Role::User || answer.role != Role::Assistant {
            return None;
        }
        Some(format!(
            "User: {}\nAssistant: {}",
            question.content, answer.content
        ))
    }
}

/// Vector of one question/answer pair, searchable across conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEmbeddingRecord {
    pub conversation_id: Uuid,
    pub text: String,
    pub vector: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Result of answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub conversation_id: Uuid,
    /// Code chunks that made it into the prompt.
    pub code_items_used: usize,
    /// Prior question/answer pairs that made it into the prompt.
    pub conversation_items_used: usize,
}

// ─── Commits and diffs ───────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Delete,
    Context,
}

/// One line of a hunk. `Add` carries only `new_line`, `Delete` only
/// `old_line`, `Context` both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    /// Raw hunk body lines, newline-joined.
    pub content: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStats {
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileChange {
    pub filename: String,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
    pub stats: FileStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitStats {
    pub total_files: usize,
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
}

impl CommitStats {
    pub fn from_files(files: &[FileChange]) -> Self {
        files.iter().fold(Self::default(), |mut stats, file| {
            stats.total_files += 1;
            stats.additions += file.stats.additions;
            stats.deletions += file.stats.deletions;
            stats.changes += file.stats.changes;
            stats
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

/// Commit metadata as listed by the version-control log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub parent_sha: Option<String>,
    pub message: String,
    pub author: Author,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitSummary {
    pub overview: String,
    pub impact: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    pub sha: String,
    pub parent_sha: Option<String>,
    pub message: String,
    pub author: Author,
    pub stats: CommitStats,
    pub files: Vec<FileChange>,
    pub summary: Option<CommitSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_kind_serializes_to_snake_case() {
        let json = serde_json::to_value(ChunkKind::FileBlock).unwrap();
        assert_eq!(json, "file_block");
    }

    #[test]
    fn test_latest_pair_text() {
        let mut conv = Conversation::new(Uuid::new_v4(), "alice");
        assert!(conv.latest_pair_text().is_none());

        conv.push_exchange("what does main do?", "it starts the server", Vec::new());
        assert_eq!(
            conv.latest_pair_text().unwrap(),
            "User: what does main do?\nAssistant: it starts the server"
        );
        assert_eq!(conv.turns.len(), 2);
    }

    #[test]
    fn test_relevant_chunks_stay_on_assistant_turn() {
        let mut conv = Conversation::new(Uuid::new_v4(), "alice");
        let meta = ChunkMetadata {
            kind: ChunkKind::Function,
            name: "main".to_string(),
            location: "src/main.rs".to_string(),
        };
        conv.push_exchange("what does main do?", "it starts the server", vec![meta.clone()]);

        assert!(conv.turns[0].relevant_chunks.is_empty());
        assert_eq!(conv.turns[1].relevant_chunks, vec![meta]);

        // Turns saved before chunks were recorded still load
        let json = serde_json::json!({
            "role": "user",
            "content": "hi",
            "timestamp": "2024-01-01T00:00:00Z"
        });
        let turn: ConversationTurn = serde_json::from_value(json).unwrap();
        assert!(turn.relevant_chunks.is_empty());
    }

    #[test]
    fn test_commit_stats_sum_files() {
        let file = |a, d| FileChange {
            filename: "f".into(),
            old_path: Some("f".into()),
            new_path: Some("f".into()),
            change_type: ChangeType::Modify,
            hunks: vec![],
            stats: FileStats {
                additions: a,
                deletions: d,
                changes: a + d,
            },
        };
        let stats = CommitStats::from_files(&[file(2, 1), file(0, 4)]);
        assert_eq!(
            stats,
            CommitStats {
                total_files: 2,
                additions: 2,
                deletions: 5,
                changes: 7,
            }
        );
    }
}
