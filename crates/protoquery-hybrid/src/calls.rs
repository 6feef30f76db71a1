//! Time-bounded calls into external collaborators.
use std::time::Duration;

use protoquery_core::answer::ReasoningRequest;
use protoquery_core::error::{CollaboratorError, Error, Result};
use protoquery_core::traits::{Embedder, Reasoner};

/// Embed `texts`, retrying once if the first attempt fails transiently.
/// Timeouts are not retried. Every returned vector must be `dim` long.
pub async fn embed_with_retry(embedder: &dyn Embedder, texts: &[String], dim: usize, timeout: Duration, context: &str) -> Result<Vec<Vec<f32>>> {
    let unavailable = |reason: String| Error::EmbeddingUnavailable { context: context.to_string(), reason };
    let mut attempt = 0;
    let vectors = loop {
        attempt += 1;
        match tokio::time::timeout(timeout, embedder.embed_batch(texts)).await {
            Err(_) => return Err(unavailable(format!("timed out after {}ms", timeout.as_millis()))),
            Ok(Ok(v)) => break v,
            Ok(Err(CollaboratorError::Transient(reason))) if attempt == 1 => {
                tracing::warn!(context, %reason, "transient embedding failure; retrying once");
            }
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
        }
    };
    if vectors.len() != texts.len() {
        return Err(unavailable(format!("{} vectors returned for {} texts", vectors.len(), texts.len())));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::DimensionMismatch { expected: dim, actual: bad.len(), context: context.to_string() });
    }
    Ok(vectors)
}

/// Single reasoning call; any failure or timeout is `ReasoningUnavailable`.
pub async fn reason_once(reasoner: &dyn Reasoner, request: &ReasoningRequest, timeout: Duration, context: &str) -> Result<String> {
    let unavailable = |reason: String| Error::ReasoningUnavailable { context: context.to_string(), reason };
    match tokio::time::timeout(timeout, reasoner.complete(request)).await {
        Err(_) => Err(unavailable(format!("timed out after {}ms", timeout.as_millis()))),
        Ok(Err(e)) => Err(unavailable(e.to_string())),
        Ok(Ok(raw)) => Ok(raw),
    }
}
