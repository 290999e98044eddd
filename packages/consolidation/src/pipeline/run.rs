//! The consolidation loop: a sequential, resumable pass over a topic stream.

use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, FailureQueue};
use crate::error::Result;
use crate::pipeline::consolidate::{Consolidator, OutcomeKind};
use crate::traits::{embedder::Embedder, store::DocumentStore, verifier::MergeVerifier};
use crate::types::topic::Topic;

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Topics attempted this run (created + merged + failed)
    pub processed_count: usize,
    pub created_count: usize,
    pub merged_count: usize,
    pub failed_count: usize,

    /// Already processed, already absorbed, or empty
    pub skipped_count: usize,

    /// The run stopped early on cancellation
    pub cancelled: bool,
}

impl<S: DocumentStore, E: Embedder, V: MergeVerifier> Consolidator<S, E, V> {
    /// Consolidate a stream of topics, in order, one at a time.
    ///
    /// Topics whose source id is already processed in `checkpoint` are
    /// skipped. A failed topic is recorded in `failures` and the loop moves
    /// on; a fatal error, or an `Err` from the stream itself, flushes both
    /// files and is returned. Cancellation is checked between topics.
    pub async fn run<T>(
        &self,
        topics: T,
        checkpoint: &mut Checkpoint,
        failures: &mut FailureQueue,
        cancel: &CancellationToken,
    ) -> Result<RunSummary>
    where
        T: Stream<Item = Result<Topic>>,
    {
        let mut summary = RunSummary::default();
        let mut since_flush = 0usize;
        futures::pin_mut!(topics);

        info!("Consolidation run started");

        while let Some(item) = topics.next().await {
            let topic = match item {
                Ok(topic) => topic,
                Err(e) => {
                    error!(error = %e, "Topic stream failed, stopping run");
                    if let Err(flush_err) = flush(checkpoint, failures) {
                        error!(error = %flush_err, "Could not flush state after stream error");
                    }
                    return Err(e);
                }
            };
            let source_id = topic.source_id();

            if checkpoint.is_processed(&source_id) {
                debug!(source_id = %source_id, "Already processed, skipping");
                summary.skipped_count += 1;
                continue;
            }

            checkpoint.discover(&source_id);

            if cancel.is_cancelled() {
                info!(source_id = %source_id, "Cancelled, leaving topic pending");
                summary.cancelled = true;
                break;
            }

            if topic.is_empty() {
                debug!(source_id = %source_id, "Empty topic, skipping");
                checkpoint.mark_skipped(&source_id);
                summary.skipped_count += 1;
                continue;
            }

            // A topic absorbed before a crash but not yet checkpointed
            let absorbed = self
                .store_guard
                .call("has_source", || self.store.has_source(&source_id))
                .await;

            let result = match absorbed {
                Ok(true) => {
                    debug!(source_id = %source_id, "Source already absorbed, skipping");
                    checkpoint.mark_skipped(&source_id);
                    failures.resolve(&source_id);
                    summary.skipped_count += 1;
                    continue;
                }
                Ok(false) => self.consolidate(&topic).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => {
                    summary.processed_count += 1;
                    match outcome.kind {
                        OutcomeKind::Created => summary.created_count += 1,
                        OutcomeKind::Merged => summary.merged_count += 1,
                    }
                    checkpoint.mark_success(&source_id);
                    failures.resolve(&source_id);

                    since_flush += 1;
                    if since_flush >= self.config.flush_every {
                        flush(checkpoint, failures)?;
                        since_flush = 0;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(source_id = %source_id, error = %e, "Fatal error, stopping run");
                    if let Err(flush_err) = flush(checkpoint, failures) {
                        error!(error = %flush_err, "Could not flush state after fatal error");
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        source_id = %source_id,
                        error = %e,
                        service = ?e.service(),
                        "Topic failed"
                    );
                    summary.processed_count += 1;
                    summary.failed_count += 1;
                    checkpoint.mark_failure(&source_id);
                    failures.record(&topic, &e.to_string());
                }
            }
        }

        flush(checkpoint, failures)?;

        info!(
            processed = summary.processed_count,
            created = summary.created_count,
            merged = summary.merged_count,
            failed = summary.failed_count,
            skipped = summary.skipped_count,
            cancelled = summary.cancelled,
            "Consolidation run finished"
        );

        Ok(summary)
    }

    /// Re-attempt failed topics whose retry counter is below
    /// `max_failure_retries`.
    ///
    /// Eligible ids are moved from processed-failure back to pending before
    /// the run starts, then only those topics are processed.
    pub async fn retry_failed(
        &self,
        checkpoint: &mut Checkpoint,
        failures: &mut FailureQueue,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let eligible: Vec<Topic> = failures
            .eligible(self.config.max_failure_retries)
            .into_iter()
            .map(|r| r.topic.clone())
            .collect();

        let source_ids: Vec<String> = eligible.iter().map(Topic::source_id).collect();
        let requeued = checkpoint.requeue(source_ids.iter().map(String::as_str))?;

        info!(
            eligible = eligible.len(),
            requeued = requeued,
            exhausted = failures.len() - eligible.len(),
            "Retrying failed topics"
        );

        self.run(
            stream::iter(eligible.into_iter().map(Ok)),
            checkpoint,
            failures,
            cancel,
        )
            .await
    }
}

fn flush(checkpoint: &Checkpoint, failures: &FailureQueue) -> Result<()> {
    checkpoint.flush()?;
    failures.flush()?;
    Ok(())
}
