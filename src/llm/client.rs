use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::gateway::Gateway;
use crate::config::LlmConfig;
use crate::error::{looks_throttled, CallError};

/// Text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CallError>;
}

/// Embedding capability: one text in, one vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError>;
}

pub type SharedGenerator = Arc<dyn Generator>;
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Ollama / OpenAI-compatible HTTP client.
///
/// Calls are made directly; wrap it in [`PacedGenerator`] / [`PacedEmbedder`]
/// to route them through the shared gateway.
#[derive(Clone)]
pub struct HttpLlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    async fn post<Req: Serialize>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<reqwest::Response, CallError> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(body);
        if self.config.provider == "openai" {
            let api_key = self.config.api_key.as_deref().unwrap_or_default();
            req = req.header("Authorization", format!("Bearer {api_key}"));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to call {} API at {url}", self.config.provider))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_failure(&self.config.provider, status, &body))
    }
}

/// Map a non-success response to a call error. 429s and rate/quota messages
/// are throttling; anything else is a plain failure.
fn classify_failure(provider: &str, status: StatusCode, body: &str) -> CallError {
    if status == StatusCode::TOO_MANY_REQUESTS || looks_throttled(body) {
        CallError::Throttled(format!("{provider} API returned {status}: {body}"))
    } else {
        CallError::Failed(anyhow!("{provider} API returned {status}: {body}"))
    }
}

// ─── Generation ──────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Message,
}

fn user_message(prompt: &str) -> Vec<Message> {
    vec![Message {
        role: "user".to_string(),
        content: prompt.to_string(),
    }]
}

#[async_trait]
impl Generator for HttpLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        match self.config.provider.as_str() {
            "ollama" => {
                let req = OllamaChatRequest {
                    model: self.config.chat_model.clone(),
                    messages: user_message(prompt),
                    stream: false,
                };
                let body: OllamaChatResponse = self
                    .post("/api/chat", &req)
                    .await?
                    .json()
                    .await
                    .context("Failed to parse Ollama chat response")?;
                Ok(body.message.content)
            }
            "openai" => {
                let req = OpenAiChatRequest {
                    model: self.config.chat_model.clone(),
                    messages: user_message(prompt),
                    temperature: 0.3,
                };
                let body: OpenAiChatResponse = self
                    .post("/v1/chat/completions", &req)
                    .await?
                    .json()
                    .await
                    .context("Failed to parse OpenAI chat response")?;
                body.choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| {
                        CallError::Failed(anyhow!("OpenAI chat response had no choices"))
                    })
            }
            other => Err(CallError::Failed(anyhow!("Unknown LLM provider: {other}"))),
        }
    }
}

// ─── Embeddings ──────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpLlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
        let vectors = match self.config.provider.as_str() {
            "ollama" => {
                let req = OllamaEmbedRequest {
                    model: self.config.embedding_model.clone(),
                    input: vec![text.to_string()],
                    truncate: true,
                };
                let body: OllamaEmbedResponse = self
                    .post("/api/embed", &req)
                    .await?
                    .json()
                    .await
                    .context("Failed to parse Ollama embed response")?;
                body.embeddings
            }
            "openai" => {
                let req = OpenAiEmbedRequest {
                    model: self.config.embedding_model.clone(),
                    input: vec![text.to_string()],
                };
                let body: OpenAiEmbedResponse = self
                    .post("/v1/embeddings", &req)
                    .await?
                    .json()
                    .await
                    .context("Failed to parse OpenAI embed response")?;
                body.data.into_iter().map(|d| d.embedding).collect()
            }
            other => return Err(CallError::Failed(anyhow!("Unknown LLM provider: {other}"))),
        };

        vectors
            .into_iter()
            .next()
            .ok_or_else(|| CallError::Failed(anyhow!("No embedding returned")))
    }
}

// ─── Paced wrappers ──────────────────────────────────────

/// Generator whose every call is queued on the shared gateway.
#[derive(Clone)]
pub struct PacedGenerator {
    inner: SharedGenerator,
    gateway: Gateway,
}

impl PacedGenerator {
    pub fn new(inner: SharedGenerator, gateway: Gateway) -> Self {
        Self { inner, gateway }
    }
}

#[async_trait]
impl Generator for PacedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        let inner = self.inner.clone();
        let prompt = prompt.to_string();
        self.gateway
            .invoke(move || {
                let inner = inner.clone();
                let prompt = prompt.clone();
                async move { inner.generate(&prompt).await }
            })
            .await
    }
}

/// Embedder whose every call is queued on the shared gateway.
#[derive(Clone)]
pub struct PacedEmbedder {
    inner: SharedEmbedder,
    gateway: Gateway,
}

impl PacedEmbedder {
    pub fn new(inner: SharedEmbedder, gateway: Gateway) -> Self {
        Self { inner, gateway }
    }
}

#[async_trait]
impl Embedder for PacedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
        let inner = self.inner.clone();
        let text = text.to_string();
        self.gateway
            .invoke(move || {
                let inner = inner.clone();
                let text = text.clone();
                async move { inner.embed(&text).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::llm::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("openai", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_throttled());

        let err = classify_failure("gemini", StatusCode::BAD_REQUEST, "RESOURCE_EXHAUSTED");
        assert!(err.is_throttled());

        let err = classify_failure("ollama", StatusCode::NOT_FOUND, "model not found");
        assert!(!err.is_throttled());
        assert!(err.to_string().contains("404"));
    }

    /// Throttles on the first call, then echoes the prompt length.
    struct FlakyGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for FlakyGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CallError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CallError::Throttled("429".into()));
            }
            Ok(format!("{} chars", prompt.len()))
        }
    }

    #[tokio::test]
    async fn test_paced_generator_retries_through_gateway() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Gateway::new(GatewayConfig::default(), clock.clone());
        let inner = Arc::new(FlakyGenerator {
            calls: AtomicUsize::new(0),
        });
        let paced = PacedGenerator::new(inner.clone(), gateway);

        let out = paced.generate("hello").await.unwrap();
        assert_eq!(out, "5 chars");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_without_network() {
        let client = HttpLlmClient::new(LlmConfig {
            provider: "carrier-pigeon".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        let err = client.embed("text").await.unwrap_err();
        assert!(!err.is_throttled());
        assert!(err.to_string().contains("Unknown LLM provider"));
    }
}
