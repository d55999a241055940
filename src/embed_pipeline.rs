//! Batched, concurrent, order-preserving embedding.
//!
//! [`EmbeddingPipeline::embed_batch`] splits its input into batches no
//! larger than the configured batch size (or the provider's own limit),
//! runs up to `concurrency` provider calls at once, and reassembles the
//! results by batch position, never by completion order. Each batch call
//! runs under the shared [`RetryPolicy`]; a batch that still fails marks
//! each of its items as failed while other batches carry on.
//!
//! Dropping the returned future aborts every in-flight batch task.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::EmbedError;
use crate::models::{Chunk, EmbeddedChunk};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

/// Outcome of embedding a set of chunks.
#[derive(Debug, Default)]
pub struct EmbedReport {
    pub embedded: Vec<EmbeddedChunk>,
    pub failed: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            retry,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(
        provider: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        config: &EmbeddingConfig,
    ) -> Self {
        Self::new(provider, retry, config.batch_size, config.concurrency)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Effective batch size: the configured size clamped by the provider limit.
    pub fn effective_batch_size(&self) -> usize {
        match self.provider.max_batch_size() {
            Some(limit) => self.batch_size.min(limit.max(1)),
            None => self.batch_size,
        }
    }

    /// Embed `texts`, returning exactly one result per input in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let batch_size = self.effective_batch_size();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (position, batch) in texts.chunks(batch_size).enumerate() {
            let batch = batch.to_vec();
            let provider = Arc::clone(&self.provider);
            let retry = self.retry;
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => embed_one_batch(provider.as_ref(), &retry, &batch, position).await,
                    Err(e) => Err(EmbedError::Task(e.to_string())),
                };
                (position, batch.len(), outcome)
            });
        }

        let mut results: Vec<Result<Vec<f32>, EmbedError>> = (0..texts.len())
            .map(|_| Err(EmbedError::Task("embedding task did not complete".to_string())))
            .collect();

        while let Some(joined) = tasks.join_next().await {
            let (position, len, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    // Slot keeps its placeholder error
                    tracing::warn!(error = %e, "embedding task panicked");
                    continue;
                }
            };
            let start = position * batch_size;
            match outcome {
                Ok(vectors) => {
                    for (offset, item) in vectors.into_iter().enumerate() {
                        results[start + offset] = item;
                    }
                }
                Err(err) => {
                    for slot in &mut results[start..start + len] {
                        *slot = Err(err.clone());
                    }
                }
            }
        }

        results
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut results = self.embed_batch(&[text.to_string()]).await;
        results
            .pop()
            .unwrap_or(Err(EmbedError::CountMismatch { expected: 1, got: 0 }))
    }

    /// Embed chunks, keeping those that succeed and counting the rest.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> EmbedReport {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let results = self.embed_batch(&texts).await;

        let mut report = EmbedReport::default();
        for (chunk, result) in chunks.into_iter().zip(results) {
            match result {
                Ok(vector) => report.embedded.push(EmbeddedChunk { chunk, vector }),
                Err(_) => report.failed += 1,
            }
        }

        if report.failed > 0 {
            tracing::warn!(
                failed = report.failed,
                embedded = report.embedded.len(),
                "some chunks could not be embedded and were excluded"
            );
        }
        report
    }
}

/// One provider call under the retry policy.
///
/// Outer `Err` fails every item of the batch; inner results carry
/// per-item dimensionality failures.
async fn embed_one_batch(
    provider: &dyn EmbeddingProvider,
    retry: &RetryPolicy,
    batch: &[String],
    position: usize,
) -> Result<Vec<Result<Vec<f32>, EmbedError>>, EmbedError> {
    let label = format!("{} embedding batch {}", provider.name(), position);
    let vectors = match retry.run(&label, || provider.embed(batch)).await {
        Ok(v) => v,
        Err(failure) => {
            tracing::warn!(
                batch = position,
                size = batch.len(),
                attempts = failure.attempts,
                error = %failure.source,
                "embedding batch failed"
            );
            return Err(failure.into());
        }
    };

    if vectors.len() != batch.len() {
        tracing::warn!(
            batch = position,
            expected = batch.len(),
            got = vectors.len(),
            "provider returned wrong number of vectors"
        );
        return Err(EmbedError::CountMismatch {
            expected: batch.len(),
            got: vectors.len(),
        });
    }

    let dims = provider.dims();
    Ok(vectors
        .into_iter()
        .map(|v| {
            if v.len() == dims {
                Ok(v)
            } else {
                Err(EmbedError::Dimension {
                    expected: dims,
                    got: v.len(),
                })
            }
        })
        .collect())
}
