//! Semantic Router: fuses vector similarity, keyword boosts, and learned feedback
//! bias into a ranked candidate list.

use crate::config::RouterConfig;
use crate::core::embedding::EmbeddingService;
use crate::core::index::{SearchOptions, VectorIndex};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "in", "on", "at", "to", "for", "of", "with",
    "my", "me", "i", "it", "what", "whats", "and", "or", "do", "does", "did", "please", "can",
    "you",
];

const VERB_PREFIXES: &[&str] = &[
    "get", "list", "show", "create", "delete", "remove", "run", "commit", "search", "find",
    "update", "status", "draft", "write", "build", "deploy", "install", "check", "fix", "start",
    "stop", "watch", "sync",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCandidate {
    pub id: String,
    pub score: f32,
    pub sim: f32,
    pub kw_bonus: f32,
    pub verb_bonus: f32,
    pub feedback: f32,
}

/// Tokenizes, lowercases, and strips stopwords — used both for explicit `keywords`
/// input and for deriving keywords from the raw query text.
pub fn tokenize_keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn query_fingerprint(query: &str, keywords: &[String]) -> String {
    let mut sorted = keywords.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(sorted.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last-write-wins, per-key feedback bias store, keyed on `(query_fingerprint, candidate_id)`.
///
/// A `+1`/`-1` signal nudges the bias by `alpha` in that direction; a `0` signal
/// decays the existing bias toward neutral by the same factor. `alpha` is kept
/// `<= clip` (§ config defaults) so a single nonzero signal never saturates the
/// clip — that's what makes `record(+1)` immediately followed by `record(-1)`
/// exactly cancel out rather than landing off by `alpha^2`, the way a plain
/// EMA-toward-the-signal update would.
struct FeedbackStore {
    alpha: f32,
    clip: f32,
    biases: RwLock<HashMap<(String, String), f32>>,
}

impl FeedbackStore {
    fn new(alpha: f32, clip: f32) -> Self {
        Self {
            alpha,
            clip,
            biases: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, fingerprint: &str, candidate_id: &str) -> f32 {
        let biases = self.biases.read().await;
        biases
            .get(&(fingerprint.to_string(), candidate_id.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    async fn record(&self, fingerprint: &str, candidate_id: &str, signal: f32) {
        let key = (fingerprint.to_string(), candidate_id.to_string());
        let mut biases = self.biases.write().await;
        let current = biases.get(&key).copied().unwrap_or(0.0);
        let updated = if signal == 0.0 {
            current * (1.0 - self.alpha)
        } else {
            (current + self.alpha * signal).clamp(-self.clip, self.clip)
        };
        biases.insert(key, updated);
    }
}

struct CachedResult {
    candidates: Vec<RankedCandidate>,
    inserted_at: Instant,
}

struct ResultCache {
    ttl: Duration,
    capacity: usize,
    order: Vec<String>,
    entries: HashMap<String, CachedResult>,
}

impl ResultCache {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<RankedCandidate>> {
        self.entries.get(key).and_then(|cached| {
            if cached.inserted_at.elapsed() < self.ttl {
                Some(cached.candidates.clone())
            } else {
                None
            }
        })
    }

    fn put(&mut self, key: String, candidates: Vec<RankedCandidate>) {
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.capacity {
                let oldest = self.order.remove(0);
                self.entries.remove(&oldest);
            }
            self.order.push(key.clone());
        }
        self.entries.insert(
            key,
            CachedResult {
                candidates,
                inserted_at: Instant::now(),
            },
        );
    }

    fn invalidate_all(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

pub struct Router {
    config: RouterConfig,
    embedding: Arc<dyn EmbeddingService>,
    index: Arc<VectorIndex>,
    feedback: FeedbackStore,
    cache: RwLock<ResultCache>,
}

impl Router {
    pub fn new(config: RouterConfig, embedding: Arc<dyn EmbeddingService>, index: Arc<VectorIndex>) -> Self {
        let feedback = FeedbackStore::new(config.feedback_alpha, config.feedback_clip);
        let cache = RwLock::new(ResultCache::new(config.cache_ttl, config.cache_capacity));
        Self {
            config,
            embedding,
            index,
            feedback,
            cache,
        }
    }

    /// Any write to the underlying index invalidates every cached query — this
    /// core only ever manages one collection, so a full clear is equivalent to a
    /// collection-scoped invalidation.
    pub async fn invalidate_cache(&self) {
        self.cache.write().await.invalidate_all();
    }

    pub async fn route(
        &self,
        query: &str,
        k: usize,
        explicit_keywords: Option<&[String]>,
        min_score: Option<f32>,
    ) -> CoreResult<Vec<RankedCandidate>> {
        if query.trim().is_empty() {
            return Err(CoreError::InputValidation("query must not be empty".to_string()));
        }
        if k == 0 {
            return Err(CoreError::InputValidation("k must be positive".to_string()));
        }

        let mut keywords = tokenize_keywords(query);
        if let Some(extra) = explicit_keywords {
            for kw in extra {
                let lowered = kw.to_lowercase();
                if !keywords.contains(&lowered) {
                    keywords.push(lowered);
                }
            }
        }

        let mut sorted_keywords = keywords.clone();
        sorted_keywords.sort();
        let cache_key = format!("{}|{}|{k}", query.trim().to_lowercase(), sorted_keywords.join(","));

        if let Some(cached) = self.cache.read().await.get(&cache_key) {
            debug!("router cache hit for query");
            return Ok(apply_min_score(cached, min_score.unwrap_or(self.config.min_score)));
        }

        let query_vector = self.embedding.embed(query).await?;
        let oversample = k * self.config.oversample_factor.max(1);

        let candidates = match self.index.search_hybrid(&query_vector, &keywords, oversample).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let fingerprint = query_fingerprint(query, &keywords);
        let mut ranked = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let kw_bonus = (self.config.keyword_bonus_per_match * candidate.keyword_overlap as f32)
                .min(self.config.keyword_bonus_cap);

            let tool_name = candidate.id.rsplit('.').next().unwrap_or(&candidate.id);
            let verb_bonus = if keywords.iter().any(|kw| tool_name.starts_with(kw.as_str())
                || VERB_PREFIXES.contains(&kw.as_str()) && tool_name.starts_with(kw.as_str()))
            {
                self.config.verb_bonus
            } else {
                0.0
            };

            let feedback = self.feedback.get(&fingerprint, &candidate.id).await;

            let score = (candidate.sim + kw_bonus + verb_bonus + feedback).clamp(0.0, 1.0);

            ranked.push(RankedCandidate {
                id: candidate.id,
                score,
                sim: candidate.sim,
                kw_bonus,
                verb_bonus,
                feedback,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.sim.partial_cmp(&a.sim).unwrap_or(std::cmp::Ordering::Equal))
        });
        ranked.truncate(k);

        self.cache.write().await.put(cache_key, ranked.clone());

        Ok(apply_min_score(ranked, min_score.unwrap_or(self.config.min_score)))
    }

    /// `+1` on successful execution, `-1` on explicit user correction, `0` to
    /// decay a stale bias back toward neutral.
    pub async fn record_feedback(&self, query: &str, candidate_id: &str, signal: f32) -> CoreResult<()> {
        if !(-1.0..=1.0).contains(&signal) {
            return Err(CoreError::InputValidation("signal must be in [-1, 1]".to_string()));
        }
        let keywords = tokenize_keywords(query);
        let fingerprint = query_fingerprint(query, &keywords);
        self.feedback.record(&fingerprint, candidate_id, signal).await;
        Ok(())
    }
}

fn apply_min_score(candidates: Vec<RankedCandidate>, min_score: f32) -> Vec<RankedCandidate> {
    candidates.into_iter().filter(|c| c.score >= min_score).collect()
}

/// Options accepted by the transport-agnostic `search` surface (§4.4) beyond the
/// hybrid router's own query knobs — kept separate so `Router` stays decoupled
/// from `VectorIndex`'s projection/filter vocabulary.
pub type IndexSearchOptions = SearchOptions;
