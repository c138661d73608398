use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where cloned repos and the local store live
    pub data_dir: PathBuf,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Outbound call pacing
    pub gateway: GatewayConfig,
    /// Embedding batch settings
    pub indexing: IndexingConfig,
    /// Retrieval settings for question answering
    pub rag: RagConfig,
    /// Commit history analysis settings
    pub commits: CommitConfig,
    /// Clone timeout in seconds
    pub clone_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for generation
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
}

/// Pacing for the single outbound lane to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum calls in flight at once.
    pub max_concurrent: usize,
    /// Minimum gap between two dispatches.
    pub min_delay_ms: u64,
    /// Base cooldown after a throttled call; doubles per consecutive throttle.
    pub throttle_cooldown_ms: u64,
    /// Consecutive throttles tolerated before the caller sees the error.
    pub max_throttle_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Characters of chunk content sent to the embedding API.
    pub embed_char_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub code_top_k: usize,
    pub conversation_top_k: usize,
    /// Minimum cosine similarity for a retrieved item to reach the prompt.
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Per-commit patch retrieval timeout.
    pub show_timeout_secs: u64,
    /// How long summaries stay on the local fallback after a quota error.
    pub quota_cooldown_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            llm: LlmConfig::default(),
            gateway: GatewayConfig::default(),
            indexing: IndexingConfig::default(),
            rag: RagConfig::default(),
            commits: CommitConfig::default(),
            clone_timeout_secs: 300,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_delay_ms: 1000,
            throttle_cooldown_ms: 2000,
            max_throttle_retries: 5,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause_ms: 1000,
            embed_char_limit: 5000,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            code_top_k: 3,
            conversation_top_k: 2,
            similarity_threshold: 0.7,
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause_ms: 1000,
            show_timeout_secs: 30,
            quota_cooldown_secs: 3600,
        }
    }
}

impl GatewayConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }
}

impl Config {
    /// Defaults overridden by environment variables. Unparsable numbers
    /// are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = var("CODE_FLOW_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(provider) = var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Some(url) = var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Some(model) = var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Some(key) = var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Some(val) = var("CODE_FLOW_MAX_CONCURRENT_CALLS") {
            if let Ok(v) = val.parse::<usize>() {
                config.gateway.max_concurrent = v.max(1);
            }
        }
        if let Some(val) = var("CODE_FLOW_MIN_CALL_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.gateway.min_delay_ms = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_THROTTLE_COOLDOWN_MS") {
            if let Ok(v) = val.parse() {
                config.gateway.throttle_cooldown_ms = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_MAX_THROTTLE_RETRIES") {
            if let Ok(v) = val.parse() {
                config.gateway.max_throttle_retries = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_BATCH_PAUSE_MS") {
            if let Ok(v) = val.parse() {
                config.indexing.batch_pause_ms = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_SIMILARITY_THRESHOLD") {
            if let Ok(v) = val.parse() {
                config.rag.similarity_threshold = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_SHOW_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.commits.show_timeout_secs = v;
            }
        }
        if let Some(val) = var("CODE_FLOW_CLONE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.clone_timeout_secs = v;
            }
        }

        config
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}
