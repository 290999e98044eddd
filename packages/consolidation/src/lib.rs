//! Incremental Knowledge-Base Consolidation Library
//!
//! Absorbs a stream of extracted topics into a deduplicated set of
//! documents. For each topic the library either CREATEs a new document or
//! MERGEs the topic into the single most similar existing one.
//!
//! # Design
//!
//! - Every logical document is stored twice: a flat `full_doc` row and a
//!   header-segmented `paragraph` row. Both are written together or not at all.
//! - Similarity decides the clear cases; an LLM verifier is asked only when
//!   the score falls between the two thresholds, and a verifier failure falls
//!   back to CREATE.
//! - The loop is sequential and resumable: a crash-safe checkpoint records
//!   processed topics and a failure queue holds topics to retry.
//!
//! # Usage
//!
//! ```rust,ignore
//! use consolidation::{Checkpoint, Consolidator, ConsolidationConfig, FailureQueue, MemoryStore};
//! use consolidation::testing::{MockEmbedder, MockVerifier};
//! use tokio_util::sync::CancellationToken;
//!
//! let consolidator = Consolidator::new(
//!     MemoryStore::new(),
//!     MockEmbedder::new(),
//!     MockVerifier::merging(),
//!     ConsolidationConfig::default(),
//! )?;
//!
//! // One topic
//! let outcome = consolidator.consolidate(&topic).await?;
//!
//! // A whole stream, resumable
//! let mut checkpoint = Checkpoint::load("state/checkpoint.json")?;
//! let mut failures = FailureQueue::load("state/failures.json")?;
//! let topics = consolidation::open_topics("topics.jsonl").await?;
//! let summary = consolidator
//!     .run(topics, &mut checkpoint, &mut failures, &CancellationToken::new())
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Embedder, MergeVerifier, DocumentStore)
//! - [`types`] - Topics, documents, configuration
//! - [`pipeline`] - Search, arbitration, dual-mode sync, the run loop
//! - [`checkpoint`] - Checkpoint and failure queue files
//! - [`resilience`] - Retry, circuit breaker, rate limiting
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore, PostgresStore)
//! - [`security`] - Credential handling
//! - [`testing`] - Mock implementations for testing

pub mod checkpoint;
pub mod error;
pub mod pipeline;
pub mod resilience;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{ConsolidationError, Result, Service};
pub use traits::{
    embedder::Embedder,
    store::{DocumentRows, DocumentStore, SourceLog, VectorSearch},
    verifier::{MergeVerifier, Verdict},
};
pub use types::{
    config::{ConsolidationConfig, MergeThresholds, DEFAULT_EMBEDDING_DIM},
    document::{Document, DocumentMode, DocumentPair, DocumentSource, RowKey, SearchHit},
    topic::Topic,
};

// Re-export pipeline components
pub use pipeline::{
    // Consolidator
    Consolidator, ConsolidationOutcome, OutcomeKind, RunSummary,
    // Arbitration
    Action, Decision, DecisionPath, MergeArbiter,
    // Sections
    merge_sections, parse_sections, render_sections, Section,
    // Topic streams
    open_topics, topics_from_reader, TopicStream,
};

pub use checkpoint::{Checkpoint, CheckpointCounts, FailureQueue, FailureRecord, SourceStatus};
pub use resilience::{CircuitBreakerConfig, CircuitState, EmbedderExt, RetryPolicy};
pub use security::{ProviderCredentials, SecretString};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;

#[cfg(feature = "openai")]
pub use ai::{OpenAIEmbedder, OpenAIVerifier};

// Re-export testing utilities
pub use testing::{FlakyStore, MockEmbedder, MockVerifier};
