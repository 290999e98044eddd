//! Operator CLI for the consolidation loop.
//!
//! ```text
//! consolidate run --topics topics.jsonl
//! consolidate retry-failed
//! consolidate status
//! ```
//!
//! Settings come from flags, then environment (a `.env` file is loaded
//! first), then defaults.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consolidation::checkpoint::{CHECKPOINT_FILE, FAILURES_FILE};
use consolidation::{
    open_topics, Checkpoint, CheckpointCounts, ConsolidationConfig, Consolidator, DocumentMode,
    DocumentStore, Embedder, EmbedderExt, FailureQueue, OpenAIEmbedder, OpenAIVerifier,
    PostgresStore, ProviderCredentials, RunSummary, SqliteStore,
};

#[derive(Parser)]
#[command(name = "consolidate")]
#[command(about = "Merge extracted topics into a deduplicated knowledge base")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// sqlite:... or postgres://...
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory holding checkpoint.json and failures.json
    #[arg(long, global = true, env = "CONSOLIDATION_STATE_DIR", default_value = ".consolidation")]
    state_dir: PathBuf,

    /// Merge without verification at or above this similarity
    #[arg(long, global = true, env = "CONSOLIDATION_HIGH_THRESHOLD")]
    high_threshold: Option<f32>,

    /// Create without verification at or below this similarity
    #[arg(long, global = true, env = "CONSOLIDATION_LOW_THRESHOLD")]
    low_threshold: Option<f32>,

    /// Mode searched for candidates: full_doc or paragraph
    #[arg(long, global = true, env = "CONSOLIDATION_SEARCH_MODE")]
    search_mode: Option<String>,

    /// Embedding dimension
    #[arg(long, global = true, env = "CONSOLIDATION_EMBEDDING_DIM")]
    embedding_dim: Option<usize>,

    /// Keep stored embeddings when re-embedding a merged row fails
    #[arg(long, global = true, env = "CONSOLIDATION_ALLOW_STALE_EMBEDDINGS")]
    allow_stale_embeddings: bool,

    /// Embedding requests per second (unlimited when unset)
    #[arg(long, global = true, env = "CONSOLIDATION_EMBED_RPS")]
    embed_rps: Option<u32>,

    #[arg(long, global = true, env = "OPENAI_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[arg(long, global = true, env = "OPENAI_CHAT_MODEL")]
    chat_model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consolidate a JSON Lines topic stream
    Run {
        #[arg(long)]
        topics: PathBuf,
    },

    /// Re-attempt failed topics that still have retries left
    RetryFailed,

    /// Print checkpoint and failure-queue counts
    Status,
}

/// Work that needs a store and providers.
enum Job<'a> {
    Run(&'a Path),
    RetryFailed,
}

#[derive(Serialize)]
struct StatusReport {
    checkpoint: CheckpointCounts,
    failures: usize,
    retryable: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,consolidation=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli.global)?;

    let job = match &cli.command {
        Commands::Status => return status(&cli.global.state_dir, &config),
        Commands::Run { topics } => Job::Run(topics),
        Commands::RetryFailed => Job::RetryFailed,
    };

    let url = cli
        .global
        .database_url
        .as_deref()
        .context("DATABASE_URL or --database-url is required")?;
    connect_and_run(url, &cli.global, job, config).await
}

fn build_config(args: &GlobalArgs) -> Result<ConsolidationConfig> {
    let mut config = ConsolidationConfig::default();

    let low = args.low_threshold.unwrap_or(config.thresholds.low);
    let high = args.high_threshold.unwrap_or(config.thresholds.high);
    config = config.with_thresholds(low, high);

    if let Some(mode) = &args.search_mode {
        let mode: DocumentMode = mode.parse()?;
        config = config.with_search_mode(mode);
    }
    if let Some(dim) = args.embedding_dim {
        config = config.with_embedding_dim(dim);
    }
    if args.allow_stale_embeddings {
        config = config.allow_stale_embeddings();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn status(state_dir: &Path, config: &ConsolidationConfig) -> Result<()> {
    let checkpoint = Checkpoint::load(state_dir.join(CHECKPOINT_FILE))?;
    let failures = FailureQueue::load(state_dir.join(FAILURES_FILE))?;

    let report = StatusReport {
        checkpoint: checkpoint.counts(),
        failures: failures.len(),
        retryable: failures.eligible(config.max_failure_retries).len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn connect_and_run(
    url: &str,
    args: &GlobalArgs,
    job: Job<'_>,
    config: ConsolidationConfig,
) -> Result<()> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStore::with_dimension(url, config.embedding_dim)
            .await
            .context("Failed to connect to Postgres")?;
        with_providers(store, args, job, config).await
    } else if url.starts_with("sqlite:") {
        let store = SqliteStore::new(url)
            .await
            .context("Failed to open SQLite database")?;
        with_providers(store, args, job, config).await
    } else {
        bail!("unsupported database URL scheme: {}", url)
    }
}

async fn with_providers<S: DocumentStore>(
    store: S,
    args: &GlobalArgs,
    job: Job<'_>,
    config: ConsolidationConfig,
) -> Result<()> {
    let creds = ProviderCredentials::from_env()?;

    let mut embedder = OpenAIEmbedder::new(creds.clone())?.with_dimension(config.embedding_dim);
    if let Some(model) = &args.embedding_model {
        embedder = embedder.with_model(model);
    }

    let mut verifier = OpenAIVerifier::new(creds)?;
    if let Some(model) = &args.chat_model {
        verifier = verifier.with_model(model);
    }

    match args.embed_rps {
        Some(rps) => execute(store, embedder.rate_limited(rps)?, verifier, args, job, config).await,
        None => execute(store, embedder, verifier, args, job, config).await,
    }
}

async fn execute<S: DocumentStore, E: Embedder>(
    store: S,
    embedder: E,
    verifier: OpenAIVerifier,
    args: &GlobalArgs,
    job: Job<'_>,
    config: ConsolidationConfig,
) -> Result<()> {
    let state_dir = &args.state_dir;
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let mut checkpoint = Checkpoint::load(state_dir.join(CHECKPOINT_FILE))?;
    let mut failures = FailureQueue::load(state_dir.join(FAILURES_FILE))?;

    let consolidator = Consolidator::new(store, embedder, verifier, config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current topic");
            on_signal.cancel();
        }
    });

    let summary: RunSummary = match job {
        Job::Run(topics) => {
            let topics = open_topics(topics)
                .await
                .with_context(|| format!("Failed to open {}", topics.display()))?;
            consolidator
                .run(topics, &mut checkpoint, &mut failures, &cancel)
                .await?
        }
        Job::RetryFailed => {
            consolidator
                .retry_failed(&mut checkpoint, &mut failures, &cancel)
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
