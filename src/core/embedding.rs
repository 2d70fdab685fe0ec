//! Embedding Service: text -> fixed-dimension unit vector, with pluggable backends
//! and a signature-keyed result cache.

use crate::config::{EmbeddingBackendKind, EmbeddingConfig};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Identifies a cache entry's provenance so changing backend/model/dim invalidates
/// stale entries rather than silently mixing incompatible vectors.
fn cache_signature(provider: &str, model: &str, dim: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(model.as_bytes());
    hasher.update(dim.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct ResultCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, Vec<f32>>,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: std::collections::HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: String, value: Vec<f32>) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Deterministic hash-based pseudo-embedding. Acceptable for tests and degraded
/// environments only — its vectors must never be mixed with a real backend's in the
/// same index (the Index enforces dimensionality, not provenance, so this is a
/// caller discipline the Sync Engine honors by never switching backends in place).
fn fallback_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dim];
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut digest = hasher.finalize().to_vec();

    let mut i = 0;
    while digest.len() < dim {
        let mut next = Sha256::new();
        next.update(&digest);
        next.update((i as u32).to_le_bytes());
        digest.extend(next.finalize());
        i += 1;
    }

    for (slot, byte) in out.iter_mut().zip(digest.iter()) {
        *slot = (*byte as f32 / 255.0) * 2.0 - 1.0;
    }
    normalize(out)
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
}

/// Wraps any backend selection behind one cache + batching policy, matching the
/// Embedding Service's contract regardless of which concrete provider is behind it.
pub struct EmbeddingServiceImpl {
    config: EmbeddingConfig,
    client: reqwest::Client,
    cache: Mutex<ResultCache>,
    last: Mutex<Option<(String, Vec<f32>)>>,
    concurrency: Arc<Semaphore>,
}

impl EmbeddingServiceImpl {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        let concurrency = Arc::new(Semaphore::new(config.batch_concurrency.max(1)));
        Self {
            cache: Mutex::new(ResultCache::new(config.cache_capacity)),
            last: Mutex::new(None),
            concurrency,
            client,
            config,
        }
    }

    fn provider_tag(&self) -> &'static str {
        match self.config.backend {
            EmbeddingBackendKind::Local => "local",
            EmbeddingBackendKind::Remote => "remote",
            EmbeddingBackendKind::Fallback => "fallback",
        }
    }

    async fn embed_remote(&self, text: &str) -> CoreResult<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            input: &'a str,
            model: &'a str,
        }

        let url = format!(
            "{}/embeddings",
            self.config.remote_base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .json(&Req {
                input: text,
                model: &self.config.remote_model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::EmbeddingUnavailable(format!(
                "remote embedding backend returned {status}: {body}"
            )));
        }

        let parsed: OpenAiEmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                CoreError::EmbeddingUnavailable("remote backend returned no vectors".to_string())
            })?;

        if vector.len() != self.config.dimension {
            return Err(CoreError::IndexConflict(format!(
                "remote backend returned dimension {}, expected {}",
                vector.len(),
                self.config.dimension
            )));
        }

        Ok(normalize(vector))
    }

    async fn embed_uncached(&self, text: &str) -> CoreResult<Vec<f32>> {
        match self.config.backend {
            EmbeddingBackendKind::Remote => self.embed_remote(text).await,
            EmbeddingBackendKind::Local | EmbeddingBackendKind::Fallback => {
                Ok(fallback_embed(text, self.config.dimension))
            }
        }
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingServiceImpl {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let signature = cache_signature(
            self.provider_tag(),
            &self.config.remote_model,
            self.config.dimension,
            text,
        );

        {
            let last = self.last.lock().await;
            if let Some((sig, vec)) = last.as_ref() {
                if sig == &signature {
                    return Ok(vec.clone());
                }
            }
        }

        {
            let cache = self.cache.lock().await;
            if let Some(vec) = cache.get(&signature) {
                debug!("embedding cache hit");
                return Ok(vec);
            }
        }

        let vector = self.embed_uncached(text).await?;

        {
            let mut cache = self.cache.lock().await;
            cache.put(signature.clone(), vector.clone());
        }
        {
            let mut last = self.last.lock().await;
            *last = Some((signature, vector.clone()));
        }

        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.len() < 10 {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            return Ok(out);
        }

        let mut handles = Vec::with_capacity(texts.len());
        for text in texts {
            let permit = self.concurrency.clone().acquire_owned().await.map_err(|e| {
                CoreError::Internal(format!("embedding concurrency semaphore closed: {e}"))
            })?;
            let text = text.clone();
            let backend = self.config.backend;
            let dim = self.config.dimension;
            let remote_cfg = (
                self.config.remote_base_url.clone(),
                self.config.remote_model.clone(),
            );
            let client = self.client.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match backend {
                    EmbeddingBackendKind::Remote => {
                        embed_remote_standalone(&client, &remote_cfg.0, &remote_cfg.1, dim, &text)
                            .await
                    }
                    _ => Ok(fallback_embed(&text, dim)),
                }
            }));
        }

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let vector = handle
                .await
                .map_err(|e| CoreError::Internal(format!("embedding task panicked: {e}")))??;
            out.push(vector);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

async fn embed_remote_standalone(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    dimension: usize,
    text: &str,
) -> CoreResult<Vec<f32>> {
    #[derive(serde::Serialize)]
    struct Req<'a> {
        input: &'a str,
        model: &'a str,
    }

    let url = format!("{}/embeddings", base_url.trim_end_matches('/'));
    let response = client.post(&url).json(&Req { input: text, model }).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        warn!("remote embedding batch item failed with status {status}");
        return Err(CoreError::EmbeddingUnavailable(format!(
            "remote embedding backend returned {status}"
        )));
    }

    let parsed: OpenAiEmbeddingResponse = response.json().await?;
    let vector = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| {
            CoreError::EmbeddingUnavailable("remote backend returned no vectors".to_string())
        })?;

    if vector.len() != dimension {
        return Err(CoreError::IndexConflict(format!(
            "remote backend returned dimension {}, expected {}",
            vector.len(),
            dimension
        )));
    }

    Ok(normalize(vector))
}
