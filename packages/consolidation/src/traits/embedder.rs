//! Embedding provider trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ConsolidationError, Result};

/// Text → fixed-dimension vector.
///
/// Implementations wrap a specific provider (OpenAI, a local model, a mock).
/// Transient failures should be reported as `ConsolidationError::Transient`
/// so the retry policy can pick them up.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of the vectors this provider returns.
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

/// Reject vectors whose length differs from the expected dimension.
pub fn check_dimension(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(ConsolidationError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(&[0.0; 768], 768).is_ok());
        let err = check_dimension(&[0.0; 3], 768).unwrap_err();
        assert!(matches!(
            err,
            ConsolidationError::DimensionMismatch {
                expected: 768,
                actual: 3
            }
        ));
    }
}
