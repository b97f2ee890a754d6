// crates/vitrina-server/src/embeddings.rs
// Embedding API client with payload-shape fallback, caching and bounded concurrency

use crate::cache::TtlCache;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Retry attempts per payload shape
const RETRY_ATTEMPTS: usize = 3;
/// Base backoff between retries (doubles each attempt)
const BASE_BACKOFF_SECS: u64 = 1;
/// Backoff ceiling
const MAX_BACKOFF_SECS: u64 = 10;

/// Embedding client: text in, fixed-dimension vector out.
///
/// The upstream accepts several request shapes depending on the serving
/// stack, so each call tries `{model, prompt}`, `{model, input}` and
/// `{model, input: [text]}` in order, accepting the first structurally
/// valid response of the configured dimension. Failures degrade to `None`;
/// callers must tolerate missing vectors.
pub struct EmbeddingClient {
    http_client: reqwest::Client,
    api_url: String,
    model: String,
    dimension: usize,
    single_timeout: Duration,
    max_concurrent: usize,
    cache: TtlCache<Vec<f32>>,
}

impl EmbeddingClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http_client: reqwest::Client,
        api_url: String,
        model: String,
        dimension: usize,
        single_timeout: Duration,
        max_concurrent: usize,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http_client,
            api_url,
            model,
            dimension,
            single_timeout,
            max_concurrent: max_concurrent.max(1),
            cache: TtlCache::new(cache_capacity, cache_ttl),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimension
    }

    /// Process-wide embedding cache (exposed for /cache endpoints and the janitor).
    pub fn cache(&self) -> &TtlCache<Vec<f32>> {
        &self.cache
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update(self.dimension.to_le_bytes());
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Embed a single text. Empty text and upstream failures yield `None`.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let key = self.cache_key(text);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Embedding cache hit");
            return Some(cached);
        }

        let embedding = self.call_api(text).await?;
        self.cache.put(key, embedding.clone()).await;
        Some(embedding)
    }

    /// Embed many texts concurrently, preserving input order. Concurrency is
    /// bounded by a semaphore so a burst of subqueries cannot overload the
    /// upstream.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let futures: Vec<_> = texts
            .iter()
            .map(|text| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    // Semaphore lives for the whole call; never closed, so
                    // acquire cannot fail.
                    let _permit = semaphore.acquire().await.ok()?;
                    self.embed(text).await
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        let ok = results.iter().filter(|r| r.is_some()).count();
        debug!(
            total = texts.len(),
            ok,
            max_concurrent = self.max_concurrent,
            "Parallel embedding finished"
        );
        results
    }

    /// Try each payload shape with per-shape retries.
    async fn call_api(&self, text: &str) -> Option<Vec<f32>> {
        let payloads = [
            json!({ "model": self.model, "prompt": text }),
            json!({ "model": self.model, "input": text }),
            json!({ "model": self.model, "input": [text] }),
        ];

        for (shape, payload) in payloads.iter().enumerate() {
            match self.call_shape(payload).await {
                Some(embedding) => return Some(embedding),
                None => {
                    debug!(shape, "Embedding payload shape rejected, trying next");
                }
            }
        }

        warn!("All embedding payload shapes failed for text: '{:.50}'", text);
        None
    }

    /// One payload shape: up to RETRY_ATTEMPTS on transport/timeout errors,
    /// no retry on HTTP 4xx or structurally invalid responses.
    async fn call_shape(&self, payload: &Value) -> Option<Vec<f32>> {
        let mut backoff = Duration::from_secs(BASE_BACKOFF_SECS);

        for attempt in 0..RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
            }

            let request = self.http_client.post(&self.api_url).json(payload).send();
            let response = match tokio::time::timeout(self.single_timeout, request).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) if e.is_connect() || e.is_timeout() => {
                    warn!(attempt, error = %e, "Embedding transport error");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Embedding request error");
                    return None;
                }
                Err(_) => {
                    warn!(attempt, "Embedding call timed out");
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() {
                warn!(attempt, %status, "Embedding server error");
                continue;
            }
            if !status.is_success() {
                // 4xx means this payload shape is not accepted; no retry.
                return None;
            }

            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Embedding response is not JSON");
                    return None;
                }
            };
            return parse_embedding_response(&body, self.dimension);
        }

        None
    }
}

/// Extract a vector from any of the known response layouts:
/// `embedding`, `embeddings` (possibly a list of rows), or
/// `data[0].embedding`. Rejects vectors of the wrong dimension.
fn parse_embedding_response(body: &Value, dimension: usize) -> Option<Vec<f32>> {
    let raw = body
        .get("embedding")
        .or_else(|| body.get("embeddings"))
        .or_else(|| body.get("data")?.get(0)?.get("embedding"))?;

    let list = raw.as_array()?;
    // A list of lists means one row per input; take the first.
    let values = match list.first() {
        Some(Value::Array(first_row)) => first_row,
        _ => list,
    };

    let vector: Vec<f32> = values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if vector.len() != dimension {
        warn!(
            got = vector.len(),
            expected = dimension,
            "Embedding dimension mismatch, rejecting"
        );
        return None;
    }
    Some(vector)
}
