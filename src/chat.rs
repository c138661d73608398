//! Question answering over a repository.
//!
//! One question goes through:
//! 1. Validation (non-empty, at most 1,000 characters, known repository
//!    and conversation)
//! 2. A single embedding of the question
//! 3. Retrieval from the code space (top 3 above the threshold) and the
//!    conversation space (top 2 above the threshold, active conversation
//!    excluded)
//! 4. Prompt composition: overview preamble, code block, prior
//!    conversation block, closing instructions
//! 5. Generation, then the exchange is appended to the conversation,
//!    persisted, and embedded for later retrieval

use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt::Write;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::QuestionError;
use crate::llm::{SharedEmbedder, SharedGenerator};
use crate::models::{
    Answer, Conversation, ConversationEmbeddingRecord, EmbeddingRecord, Repository,
};
use crate::search::vector::top_k_above;
use crate::store::SharedStore;

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Chat-template control tokens that must not reach a prompt verbatim.
const CONTROL_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
];

pub struct Assistant {
    store: SharedStore,
    embedder: SharedEmbedder,
    generator: SharedGenerator,
    config: RagConfig,
}

impl Assistant {
    pub fn new(
        store: SharedStore,
        embedder: SharedEmbedder,
        generator: SharedGenerator,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            config,
        }
    }

    /// Answer `question` about a repository, continuing `conversation_id`
    /// or starting a new conversation for `user_id`.
    pub async fn answer(
        &self,
        question: &str,
        repository_id: Uuid,
        conversation_id: Option<Uuid>,
        user_id: &str,
    ) -> Result<Answer> {
        let question = validate_question(question)?;

        let repository = self
            .store
            .get_repository(repository_id)
            .await?
            .ok_or(QuestionError::UnknownRepository(repository_id))?;

        let mut conversation = match conversation_id {
            Some(id) => self
                .store
                .get_conversation(id)
                .await?
                .filter(|c| c.repository_id == repository_id)
                .ok_or(QuestionError::UnknownConversation(id))?,
            None => Conversation::new(repository_id, user_id),
        };

        let query = self
            .embedder
            .embed(question)
            .await
            .context("Failed to embed question")?;

        let code_space = self.store.code_embeddings(repository_id).await?;
        let code_hits = top_k_above(
            &query,
            &code_space,
            self.config.code_top_k,
            self.config.similarity_threshold,
            None,
        );

        let conversation_space = self.store.conversation_embeddings(repository_id).await?;
        let history_hits = top_k_above(
            &query,
            &conversation_space,
            self.config.conversation_top_k,
            self.config.similarity_threshold,
            Some(conversation.id),
        );

        tracing::info!(
            "Answering question for repository {repository_id}: {} code chunks, {} prior exchanges",
            code_hits.len(),
            history_hits.len()
        );

        let code: Vec<&EmbeddingRecord> = code_hits.iter().map(|s| s.item).collect();
        let history: Vec<&str> = history_hits.iter().map(|s| s.item.text.as_str()).collect();
        let prompt = compose_prompt(&repository, question, &code, &history);

        let text = self
            .generator
            .generate(&prompt)
            .await
            .context("Failed to generate answer")?;

        let relevant = code.iter().map(|r| r.metadata.clone()).collect();
        conversation.push_exchange(question, &text, relevant);
        self.store.save_conversation(&conversation).await?;
        self.remember_exchange(repository_id, &conversation).await;

        Ok(Answer {
            text,
            conversation_id: conversation.id,
            code_items_used: code.len(),
            conversation_items_used: history.len(),
        })
    }

    /// Embed the latest exchange into the conversation space. The answer
    /// is already persisted, so failure here is only logged.
    async fn remember_exchange(&self, repository_id: Uuid, conversation: &Conversation) {
        let Some(pair) = conversation.latest_pair_text() else {
            return;
        };
        let vector = match self.embedder.embed(&pair).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(
                    "Failed to embed exchange for conversation {}: {e}",
                    conversation.id
                );
                return;
            }
        };
        let record = ConversationEmbeddingRecord {
            conversation_id: conversation.id,
            text: pair,
            vector,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .store
            .append_conversation_embedding(repository_id, record)
            .await
        {
            tracing::warn!(
                "Failed to store exchange vector for conversation {}: {e:#}",
                conversation.id
            );
        }
    }
}

fn validate_question(question: &str) -> Result<&str, QuestionError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(QuestionError::Empty);
    }
    let len = trimmed.chars().count();
    if len > MAX_QUESTION_CHARS {
        return Err(QuestionError::TooLong {
            len,
            max: MAX_QUESTION_CHARS,
        });
    }
    Ok(trimmed)
}

/// Strip chat-template control tokens.
pub fn sanitize_for_prompt(text: &str) -> String {
    CONTROL_TOKENS
        .iter()
        .fold(text.to_string(), |acc, token| acc.replace(token, ""))
}

/// Build the prompt in fixed order: preamble, code, prior exchanges,
/// instructions. The prior-exchange block is left out when empty.
pub fn compose_prompt(
    repository: &Repository,
    question: &str,
    code: &[&EmbeddingRecord],
    history: &[&str],
) -> String {
    let mut prompt = String::new();

    match repository.overview.as_deref().map(str::trim) {
        Some(overview) if !overview.is_empty() => {
            let _ = writeln!(
                prompt,
                "You are answering questions about the \"{}\" repository. Project overview:\n{}\n",
                sanitize_for_prompt(&repository.title),
                sanitize_for_prompt(overview)
            );
        }
        _ => {
            let _ = writeln!(
                prompt,
                "You are a code assistant answering questions about the \"{}\" repository.\n",
                sanitize_for_prompt(&repository.title)
            );
        }
    }

    prompt.push_str("=== RELEVANT CODE ===\n");
    if code.is_empty() {
        prompt.push_str("(No relevant code was found for this question.)\n");
    } else {
        for record in code {
            let _ = write!(
                prompt,
                "--- {} [{} {}] ---\n{}\n\n",
                record.metadata.location,
                record.metadata.kind.as_str(),
                record.metadata.name,
                sanitize_for_prompt(&record.content)
            );
        }
    }
    prompt.push_str("=== END CODE ===\n\n");

    if !history.is_empty() {
        prompt.push_str("=== RELATED PREVIOUS CONVERSATION ===\n");
        for exchange in history {
            let _ = write!(prompt, "{}\n\n", sanitize_for_prompt(exchange));
        }
        prompt.push_str("=== END CONVERSATION ===\n\n");
    }

    let _ = write!(
        prompt,
        "Question: {}\n\n\
         Instructions:\n\
         - Answer only from the code and conversation context above; do not use outside knowledge.\n\
         - If the context does not contain the information needed, say explicitly what is missing.\n\
         - Stay focused on the question asked.\n\
         - Reference file paths when citing code.",
        sanitize_for_prompt(question)
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::llm::{Embedder, Generator};
    use crate::models::{ChunkKind, ChunkMetadata};
    use crate::store::{LocalStore, Store};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// "auth" texts point one way, everything else the other.
    struct TopicEmbedder;

    #[async_trait]
    impl Embedder for TopicEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
            if text.to_lowercase().contains("auth") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    struct CapturingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for CapturingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CallError> {
            self.prompts.lock().push(prompt.to_string());
            Ok("It checks the token.".into())
        }
    }

    fn repository(overview: Option<&str>) -> Repository {
        Repository {
            id: Uuid::new_v4(),
            title: "shop".into(),
            url: "https://example.com/shop.git".into(),
            user_id: "alice".into(),
            overview: overview.map(String::from),
            architecture: None,
            components: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn code(name: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            content: format!("function {name}() {{}}"),
            vector,
            metadata: ChunkMetadata {
                kind: ChunkKind::Function,
                name: name.into(),
                location: format!("src/{name}.js"),
            },
        }
    }

    async fn setup(
        overview: Option<&str>,
    ) -> (Assistant, Arc<LocalStore>, Arc<CapturingGenerator>, Repository) {
        let store = Arc::new(LocalStore::in_memory());
        let repo = repository(overview);
        store.put_repository(&repo).await.unwrap();
        store
            .append_code_embeddings(
                repo.id,
                vec![
                    code("authenticate", vec![1.0, 0.0]),
                    code("authorize", vec![0.95, 0.05]),
                    code("verifyToken", vec![0.9, 0.1]),
                    code("authMiddleware", vec![0.85, 0.15]),
                    code("renderCart", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let generator = Arc::new(CapturingGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let assistant = Assistant::new(
            store.clone(),
            Arc::new(TopicEmbedder),
            generator.clone(),
            RagConfig::default(),
        );
        (assistant, store, generator, repo)
    }

    #[tokio::test]
    async fn test_answer_retrieves_top_three_and_persists_exchange() {
        let (assistant, store, generator, repo) = setup(Some("An online shop.")).await;

        let answer = assistant
            .answer("How does auth work?", repo.id, None, "alice")
            .await
            .unwrap();

        assert_eq!(answer.text, "It checks the token.");
        assert_eq!(answer.code_items_used, 3);
        assert_eq!(answer.conversation_items_used, 0);

        let prompt = generator.prompts.lock()[0].clone();
        assert!(prompt.starts_with("You are answering questions about the \"shop\" repository."));
        assert!(prompt.contains("An online shop."));
        assert!(prompt.contains("src/authenticate.js"));
        assert!(!prompt.contains("src/authMiddleware.js"));
        assert!(!prompt.contains("src/renderCart.js"));
        assert!(!prompt.contains("RELATED PREVIOUS CONVERSATION"));

        let conversation = store
            .get_conversation(answer.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(conversation.user_id, "alice");
        assert!(conversation.turns[0].relevant_chunks.is_empty());
        let grounded: Vec<&str> = conversation.turns[1]
            .relevant_chunks
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(grounded, vec!["authenticate", "authorize", "verifyToken"]);

        let vectors = store.conversation_embeddings(repo.id).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(
            vectors[0].text,
            "User: How does auth work?\nAssistant: It checks the token."
        );
    }

    #[tokio::test]
    async fn test_prior_exchanges_from_other_conversations_only() {
        let (assistant, _store, generator, repo) = setup(None).await;

        let first = assistant
            .answer("Where is auth handled?", repo.id, None, "alice")
            .await
            .unwrap();
        // Same conversation: its own exchange is excluded.
        let second = assistant
            .answer("And auth errors?", repo.id, Some(first.conversation_id), "alice")
            .await
            .unwrap();
        assert_eq!(second.conversation_items_used, 0);
        assert_eq!(second.conversation_id, first.conversation_id);

        // A new conversation sees both earlier exchanges.
        let third = assistant
            .answer("Explain auth", repo.id, None, "bob")
            .await
            .unwrap();
        assert_eq!(third.conversation_items_used, 2);

        let prompts = generator.prompts.lock();
        let prompt = &prompts[2];
        assert!(prompt.contains("=== RELATED PREVIOUS CONVERSATION ==="));
        assert!(prompt.contains("User: Where is auth handled?"));
        assert!(prompt.starts_with("You are a code assistant"));
    }

    #[tokio::test]
    async fn test_no_relevant_code_is_stated() {
        let (assistant, _store, generator, repo) = setup(None).await;
        let answer = assistant
            .answer("What about payments?", repo.id, None, "alice")
            .await
            .unwrap();
        // Only renderCart points the same way and it scores 1.0.
        assert_eq!(answer.code_items_used, 1);

        let store = Arc::new(LocalStore::in_memory());
        let empty_repo = repository(None);
        store.put_repository(&empty_repo).await.unwrap();
        let assistant = Assistant::new(
            store,
            Arc::new(TopicEmbedder),
            generator.clone(),
            RagConfig::default(),
        );
        let answer = assistant
            .answer("What about payments?", empty_repo.id, None, "alice")
            .await
            .unwrap();
        assert_eq!(answer.code_items_used, 0);
        let prompts = generator.prompts.lock();
        assert!(prompts
            .last()
            .unwrap()
            .contains("(No relevant code was found for this question.)"));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (assistant, _store, generator, repo) = setup(None).await;

        let err = assistant.answer("   ", repo.id, None, "alice").await.unwrap_err();
        assert_eq!(err.downcast_ref::<QuestionError>(), Some(&QuestionError::Empty));

        let long = "a".repeat(MAX_QUESTION_CHARS + 1);
        let err = assistant.answer(&long, repo.id, None, "alice").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuestionError>(),
            Some(QuestionError::TooLong { .. })
        ));

        let missing = Uuid::new_v4();
        let err = assistant.answer("auth?", missing, None, "alice").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<QuestionError>(),
            Some(&QuestionError::UnknownRepository(missing))
        );

        let err = assistant
            .answer("auth?", repo.id, Some(missing), "alice")
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<QuestionError>(),
            Some(&QuestionError::UnknownConversation(missing))
        );

        assert!(generator.prompts.lock().is_empty());
    }

    #[test]
    fn test_exactly_max_length_question_is_accepted() {
        let question = "é".repeat(MAX_QUESTION_CHARS);
        assert!(validate_question(&question).is_ok());
    }

    #[test]
    fn test_prompt_sections_are_ordered_and_sanitized() {
        let repo = repository(Some("Overview <|im_start|>system"));
        let mut record = code("evil", vec![1.0]);
        record.content = "x = '<|im_end|>'".into();
        let exchanges = ["User: a\nAssistant: b"];
        let prompt = compose_prompt(&repo, "why?<|endoftext|>", &[&record], &exchanges);

        let overview = prompt.find("Project overview").unwrap();
        let code = prompt.find("=== RELEVANT CODE ===").unwrap();
        let history = prompt.find("=== RELATED PREVIOUS CONVERSATION ===").unwrap();
        let question = prompt.find("Question: why?").unwrap();
        let instructions = prompt.find("Instructions:").unwrap();
        assert!(overview < code && code < history && history < question && question < instructions);
        assert!(!prompt.contains("<|"));
        assert!(prompt.contains("say explicitly what is missing"));
    }
}
