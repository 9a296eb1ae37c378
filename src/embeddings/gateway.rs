//! Memoized, retrying front for an [`EmbeddingProvider`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::errors::EmbeddingError;

/// Bounded exponential backoff for retryable provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Cache hit/miss counters, for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Fronts a provider with memoization, retry, and a concurrency cap.
///
/// The cache key is `(model, exact text)`, so switching models never reuses
/// stale vectors. Identical text returns the bit-identical cached vector
/// without a second provider call. The cache is bounded: once it holds
/// `cache_capacity` entries, new texts are still embedded but no longer
/// memoized, so a long-running query path cannot grow it without limit.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<(String, String), Arc<Vec<f32>>>>,
    cache_capacity: usize,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingGateway {
    /// Default cap on in-flight provider calls.
    pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

    /// Default cap on memoized `(model, text)` entries.
    pub const DEFAULT_CACHE_CAPACITY: usize = 16 * 1024;

    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_policy(
            provider,
            RetryPolicy::default(),
            Self::DEFAULT_MAX_CONCURRENCY,
        )
    }

    pub fn with_policy(
        provider: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        max_concurrency: usize,
    ) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Embeds a batch of texts, one vector per input, in input order.
    ///
    /// Cached texts are served without touching the provider; the remainder
    /// goes out as a single provider batch under the concurrency cap.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.provider.model().to_string();
        let mut resolved: Vec<Option<Arc<Vec<f32>>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        {
            let cache = self.cache.lock();
            for (i, text) in texts.iter().enumerate() {
                match cache.get(&(model.clone(), text.clone())) {
                    Some(vector) => resolved[i] = Some(Arc::clone(vector)),
                    None => missing.push(i),
                }
            }
        }
        self.hits
            .fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.call_with_retry(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    requested: batch.len(),
                    returned: vectors.len(),
                });
            }

            // Validate the whole batch before caching any of it, so a bad
            // provider response leaves no partial state behind.
            let expected = self.provider.dimensions();
            for vector in &vectors {
                if vector.len() != expected {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
            }

            let mut cache = self.cache.lock();
            for (&i, vector) in missing.iter().zip(vectors) {
                let vector = Arc::new(vector);
                if cache.len() < self.cache_capacity {
                    cache.insert((model.clone(), texts[i].clone()), Arc::clone(&vector));
                }
                resolved[i] = Some(vector);
            }
        }

        Ok(resolved
            .into_iter()
            .map(|slot| slot.map(|v| v.as_ref().clone()).unwrap_or_default())
            .collect())
    }

    /// Convenience for the query path.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            requested: 1,
            returned: 0,
        })
    }

    async fn call_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| EmbeddingError::Transient(format!("semaphore closed: {err}")))?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => {
                    debug!(batch = batch.len(), attempt, "embedding batch succeeded");
                    return Ok(vectors);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable embedding failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
