//! Consolidation pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Similarity search (single best candidate)
//! - Merge arbitration (thresholds + LLM verifier for the ambiguous band)
//! - Dual-mode synchronization (`full_doc` + `paragraph`, both or neither)
//! - The resumable run loop (checkpoint + failure queue)
//! - JSON Lines topic streams

pub mod arbiter;
pub mod consolidate;
pub mod prompts;
pub mod run;
pub mod search;
pub mod sections;
pub mod sync;
pub mod topics;

pub use arbiter::{classify, Action, Band, Decision, DecisionPath, MergeArbiter};
pub use consolidate::{ConsolidationOutcome, Consolidator, OutcomeKind};
pub use prompts::{format_verify_prompt, parse_verdict, VerifyResponse, VERIFY_PROMPT};
pub use run::RunSummary;
pub use search::{SearchResult, SimilaritySearch};
pub use sections::{
    append_flat, headers_match, merge_sections, parse_sections, render_sections, Section,
    SectionMergeStats,
};
pub use sync::{DualModeSynchronizer, PreparedWrite};
pub use topics::{open_topics, parse_topic_line, topics_from_reader, TopicStream};
