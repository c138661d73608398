use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use code_flow::chat::Assistant;
use code_flow::chunking::chunk_file;
use code_flow::commits::CommitAnalyzer;
use code_flow::config::Config;
use code_flow::diff::parse_diff;
use code_flow::git::LibGit;
use code_flow::ingest::{IngestRequest, Ingestor};
use code_flow::llm::{
    Clock, Gateway, HttpLlmClient, PacedEmbedder, PacedGenerator, SharedEmbedder,
    SharedGenerator, TokioClock,
};
use code_flow::store::LocalStore;

#[derive(Parser)]
#[command(name = "code-flow", about = "Ask questions about git repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone, chunk, document and index a repository
    Ingest {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "local")]
        user: String,
        /// Also analyse the commit history
        #[arg(long)]
        commits: bool,
    },
    /// Ask a question about an ingested repository
    Ask {
        repository: Uuid,
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<Uuid>,
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Analyse the commit history of a local checkout
    Commits { path: PathBuf },
    /// Print the chunks of one source file
    Chunk { file: PathBuf },
    /// Parse a unified diff file
    Diff { file: PathBuf },
}

/// Provider clients sharing one gateway.
fn paced_clients(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<(SharedGenerator, SharedEmbedder)> {
    let client = Arc::new(HttpLlmClient::new(config.llm.clone())?);
    let gateway = Gateway::new(config.gateway.clone(), clock);
    let generator: SharedGenerator =
        Arc::new(PacedGenerator::new(client.clone(), gateway.clone()));
    let embedder: SharedEmbedder = Arc::new(PacedEmbedder::new(client, gateway));
    Ok((generator, embedder))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());

    match cli.command {
        Command::Ingest {
            url,
            title,
            user,
            commits,
        } => {
            tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
            let clock: Arc<dyn Clock> = Arc::new(TokioClock);
            let (generator, embedder) = paced_clients(&config, clock.clone())?;
            let store = Arc::new(LocalStore::open(&config.store_dir())?);
            let ingestor =
                Ingestor::new(Arc::new(LibGit), store, embedder, generator, clock, config);
            let report = ingestor
                .ingest(&IngestRequest {
                    url,
                    title,
                    user_id: user,
                    analyze_commits: commits,
                })
                .await?;
            println!("repository: {}", report.repository.id);
            println!(
                "files: {}  chunks: {}  indexed: {}",
                report.files, report.chunks, report.indexed
            );
            if let Some(n) = report.commits {
                println!("commits analysed: {n}");
            }
        }
        Command::Ask {
            repository,
            question,
            conversation,
            user,
        } => {
            let (generator, embedder) = paced_clients(&config, Arc::new(TokioClock))?;
            let store = Arc::new(LocalStore::open(&config.store_dir())?);
            let assistant = Assistant::new(store, embedder, generator, config.rag.clone());
            let answer = assistant
                .answer(&question, repository, conversation, &user)
                .await?;
            println!("{}", answer.text);
            println!();
            println!(
                "conversation: {} (code: {}, history: {})",
                answer.conversation_id, answer.code_items_used, answer.conversation_items_used
            );
        }
        Command::Commits { path } => {
            let clock: Arc<dyn Clock> = Arc::new(TokioClock);
            let (generator, _) = paced_clients(&config, clock.clone())?;
            let analyzer =
                CommitAnalyzer::new(Arc::new(LibGit), generator, clock, config.commits.clone());
            let commits = analyzer.analyze_history(&path).await?;
            print_json(&commits)?;
        }
        Command::Chunk { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            print_json(&chunk_file(&file.to_string_lossy(), &content))?;
        }
        Command::Diff { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            print_json(&parse_diff(&text))?;
        }
    }

    Ok(())
}
