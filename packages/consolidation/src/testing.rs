//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the consolidation
//! library without making real embedding, LLM, or database calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use crate::error::{ConsolidationError, Result, Service};
use crate::stores::MemoryStore;
use crate::traits::{
    embedder::Embedder,
    store::{DocumentRows, SourceLog, VectorSearch},
    verifier::{MergeVerifier, Verdict},
};
use crate::types::{
    document::{Document, DocumentMode, DocumentSource, SearchHit},
    topic::Topic,
};

/// First dimension used by generated (hash-based) mock embeddings.
///
/// Explicit vectors built with [`vector`] live in the dimensions below this,
/// so a generated vector is orthogonal to every explicit one.
pub const GENERATED_OFFSET: usize = 16;

/// Zero-padded vector of `dim` values starting with `head`.
pub fn vector(dim: usize, head: &[f32]) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    for (slot, value) in v.iter_mut().zip(head) {
        *slot = *value;
    }
    v
}

/// Unit vector in the plane of dims 0 and 1 at the given cosine to dim 0.
///
/// `unit_at(1.0)` and `unit_at(c)` have cosine similarity `c`.
pub fn unit_at(dim: usize, cosine: f32) -> Vec<f32> {
    let sine = (1.0 - cosine * cosine).max(0.0).sqrt();
    vector(dim, &[cosine, sine])
}

/// A mock embedding provider.
///
/// Returns explicit vectors for registered texts and deterministic
/// sha256-seeded vectors for everything else. Clones share state, so a
/// test can keep a handle after moving the mock into a consolidator.
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: usize,
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    fail_patterns: Arc<RwLock<Vec<String>>>,
    transient_failures: Arc<AtomicU32>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    /// Create a mock with the default 768 dimensions.
    pub fn new() -> Self {
        Self {
            dimension: crate::types::config::DEFAULT_EMBEDDING_DIM,
            embeddings: Arc::new(RwLock::new(HashMap::new())),
            fail_patterns: Arc::new(RwLock::new(Vec::new())),
            transient_failures: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set the dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Register an explicit embedding for an exact text.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.into(), embedding);
        self
    }

    /// Fail permanently for any text containing `pattern`.
    pub fn fail_when_contains(self, pattern: impl Into<String>) -> Self {
        self.fail_patterns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pattern.into());
        self
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Texts embedded so far, including failed attempts.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of embed calls, including failed attempts.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn generated(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let hash = Sha256::digest(text.as_bytes());
        let mut v = vec![0.0; self.dimension];
        let start = if self.dimension > GENERATED_OFFSET {
            GENERATED_OFFSET
        } else {
            0
        };
        for (i, slot) in v.iter_mut().enumerate().skip(start) {
            let byte = hash[(i - start) % 32] as f32;
            *slot = (byte / 127.5) - 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());

        let pending = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(ConsolidationError::transient(
                Service::Embedding,
                "503 service unavailable",
            ));
        }

        let fails = self
            .fail_patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| text.contains(p.as_str()));
        if fails {
            return Err(ConsolidationError::Embedding(format!(
                "mock failure for text of {} chars",
                text.len()
            )));
        }

        Ok(self
            .embeddings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.generated(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Record of a call made to the mock verifier.
#[derive(Debug, Clone)]
pub struct MockVerifierCall {
    pub topic_title: String,
    pub candidate_id: Uuid,
    pub score: f32,
}

#[derive(Debug, Clone)]
enum Scripted {
    Verdict(Verdict),
    Fail,
}

/// A mock merge verifier.
///
/// Answers from a script first, then with the default answer.
#[derive(Clone)]
pub struct MockVerifier {
    default: Scripted,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<RwLock<Vec<MockVerifierCall>>>,
}

impl MockVerifier {
    fn with_default(default: Scripted) -> Self {
        Self {
            default,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Always answers MERGE.
    pub fn merging() -> Self {
        Self::with_default(Scripted::Verdict(Verdict::Merge {
            reason: "same subject".into(),
        }))
    }

    /// Always answers CREATE.
    pub fn creating() -> Self {
        Self::with_default(Scripted::Verdict(Verdict::Create {
            reason: "different subject".into(),
        }))
    }

    /// Always fails with a permanent verifier error.
    pub fn failing() -> Self {
        Self::with_default(Scripted::Fail)
    }

    /// Always answers with text that is not a decision.
    pub fn unparsable() -> Self {
        Self::with_default(Scripted::Verdict(Verdict::Unparsable {
            raw: "Hmm, hard to say.".into(),
        }))
    }

    /// Queue a verdict for the next call.
    pub fn then(self, verdict: Verdict) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Scripted::Verdict(verdict));
        self
    }

    /// Queue a failure for the next call.
    pub fn then_fail(self) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Scripted::Fail);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockVerifierCall> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of verify calls.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl MergeVerifier for MockVerifier {
    async fn verify(&self, topic: &Topic, candidate: &Document, score: f32) -> Result<Verdict> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockVerifierCall {
                topic_title: topic.title.clone(),
                candidate_id: candidate.id,
                score,
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match next {
            Scripted::Verdict(v) => Ok(v),
            Scripted::Fail => Err(ConsolidationError::Verifier("mock verifier failure".into())),
        }
    }
}

/// A store that wraps [`MemoryStore`] and injects faults.
///
/// It does not override `upsert_pair`, so pair writes go through the
/// generic write-then-compensate path.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    paragraph_failures: Arc<AtomicUsize>,
    paragraph_failures_transient: Arc<std::sync::atomic::AtomicBool>,
    rollback_broken: Arc<std::sync::atomic::AtomicBool>,
    search_outages: Arc<AtomicUsize>,
}

impl FlakyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail the next `n` paragraph-row upserts with a permanent error.
    pub fn fail_paragraph_upserts(&self, n: usize) {
        self.paragraph_failures_transient
            .store(false, Ordering::SeqCst);
        self.paragraph_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` paragraph-row upserts with a transient error.
    pub fn fail_paragraph_upserts_transient(&self, n: usize) {
        self.paragraph_failures_transient
            .store(true, Ordering::SeqCst);
        self.paragraph_failures.store(n, Ordering::SeqCst);
    }

    /// Make every rollback (`replace`/`remove`) fail.
    pub fn break_rollback(&self) {
        self.rollback_broken.store(true, Ordering::SeqCst);
    }

    /// Report the store as unreachable for the next `n` searches.
    pub fn fail_searches(&self, n: usize) {
        self.search_outages.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_rollback(&self) -> Result<()> {
        if self.rollback_broken.load(Ordering::SeqCst) {
            return Err(ConsolidationError::storage("rollback write rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentRows for FlakyStore {
    async fn upsert(&self, document: &Document) -> Result<Uuid> {
        if document.mode == DocumentMode::Paragraph && Self::take(&self.paragraph_failures) {
            if self.paragraph_failures_transient.load(Ordering::SeqCst) {
                return Err(ConsolidationError::transient(
                    Service::Store,
                    "connection reset",
                ));
            }
            return Err(ConsolidationError::storage("paragraph row rejected"));
        }
        self.inner.upsert(document).await
    }

    async fn replace(&self, document: &Document) -> Result<()> {
        self.check_rollback()?;
        self.inner.replace(document).await
    }

    async fn remove(&self, id: Uuid, mode: DocumentMode) -> Result<()> {
        self.check_rollback()?;
        self.inner.remove(id, mode).await
    }

    async fn get(&self, id: Uuid, mode: DocumentMode) -> Result<Option<Document>> {
        self.inner.get(id, mode).await
    }

    async fn list(&self, mode: DocumentMode) -> Result<Vec<Document>> {
        self.inner.list(mode).await
    }
}

#[async_trait]
impl VectorSearch for FlakyStore {
    async fn search_best(
        &self,
        embedding: &[f32],
        mode: DocumentMode,
    ) -> Result<Option<SearchHit>> {
        if Self::take(&self.search_outages) {
            return Err(ConsolidationError::StoreUnavailable(
                "connection refused".into(),
            ));
        }
        self.inner.search_best(embedding, mode).await
    }
}

#[async_trait]
impl SourceLog for FlakyStore {
    async fn record_source(&self, source: &DocumentSource) -> Result<bool> {
        self.inner.record_source(source).await
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        self.inner.has_source(source_id).await
    }

    async fn sources_for(&self, document_id: Uuid) -> Result<Vec<DocumentSource>> {
        self.inner.sources_for(document_id).await
    }
}
