//! Layered configuration: defaults, optional config file, environment variables,
//! explicit constructor overrides — in that order of increasing precedence.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Embedding backend selection (§6 `EMBEDDING_BACKEND`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    Local,
    Remote,
    Fallback,
}

impl Default for EmbeddingBackendKind {
    fn default() -> Self {
        EmbeddingBackendKind::Fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendKind,
    /// Fixed dimensionality `D`; every vector in the index must match this exactly.
    pub dimension: usize,
    pub remote_base_url: String,
    pub remote_model: String,
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Bounded LRU size for the embedding result cache.
    pub cache_capacity: usize,
    /// Max batch fan-out width for `embed_batch`.
    pub batch_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            dimension: 256,
            remote_base_url: "http://localhost:11434/v1".to_string(),
            remote_model: "text-embedding-3-small".to_string(),
            request_timeout: Duration::from_secs(5),
            cache_capacity: 64,
            batch_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub watch_paths: Vec<PathBuf>,
    #[serde(with = "duration_millis")]
    pub debounce: Duration,
    pub supported_extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_paths: Vec::new(),
            debounce: Duration::from_secs(1),
            supported_extensions: vec![
                "md".to_string(),
                "py".to_string(),
                "js".to_string(),
                "sh".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub memory_cap_mb: usize,
    /// Environment variables copied through from the host into the scrubbed child env.
    pub passthrough_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_cap_mb: 256,
            passthrough_env: vec!["PATH".to_string()],
        }
    }
}

/// Fixed hybrid-ranking constants (§9 open question: kept as configurable constants,
/// not learned per-collection). `feedback_alpha` is kept `<= feedback_clip` so a
/// single `+1`/`-1` signal never saturates the clip on its own — that's what keeps
/// a `+1` immediately followed by a `-1` an exact round trip back to the prior bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub min_score: f32,
    pub keyword_bonus_per_match: f32,
    pub keyword_bonus_cap: f32,
    pub verb_bonus: f32,
    pub feedback_clip: f32,
    pub feedback_alpha: f32,
    pub oversample_factor: usize,
    #[serde(with = "duration_millis")]
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            keyword_bonus_per_match: 0.1,
            keyword_bonus_cap: 0.3,
            verb_bonus: 0.05,
            feedback_clip: 0.2,
            feedback_alpha: 0.15,
            oversample_factor: 2,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// `SKILLS_ROOT` — required at runtime; defaulted here only so `Default` is total.
    pub skills_root: PathBuf,
    pub quarantine_dir: PathBuf,
    pub index_path: PathBuf,
    pub manifest_path: PathBuf,
    pub embedding: EmbeddingConfig,
    pub watcher: WatcherConfig,
    pub sandbox: SandboxConfig,
    pub router: RouterConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            skills_root: PathBuf::from("./skills"),
            quarantine_dir: PathBuf::from("./quarantine"),
            index_path: PathBuf::from("./skillcore.sqlite"),
            manifest_path: PathBuf::from("./skillcore-manifest.json"),
            embedding: EmbeddingConfig::default(),
            watcher: WatcherConfig::default(),
            sandbox: SandboxConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Layer defaults, then an optional config file, then recognized environment
    /// variables (§6), mirroring the teacher's `ServiceConfig` assembly but driven
    /// by the `config` crate instead of ad-hoc field-by-field overrides.
    pub fn load(config_file: Option<&std::path::Path>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&CoreConfig::default()).map_err(|e| {
                CoreError::Internal(format!("failed to seed config defaults: {e}"))
            })?);

        if let Some(path) = config_file {
            if path.exists() {
                builder = builder.add_source(config::File::from(path.to_path_buf()));
            }
        }

        let assembled = builder
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to assemble config: {e}")))?;

        let mut cfg: CoreConfig = assembled
            .try_deserialize()
            .map_err(|e| CoreError::Internal(format!("failed to deserialize config: {e}")))?;

        cfg.apply_env_overrides();
        if cfg.watcher.watch_paths.is_empty() {
            cfg.watcher.watch_paths.push(cfg.skills_root.clone());
        }
        Ok(cfg)
    }

    /// Applies the environment variables named in §6 on top of whatever was loaded
    /// from defaults/config file. Unset variables leave the existing value untouched.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SKILLS_ROOT") {
            self.skills_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("EMBEDDING_BACKEND") {
            self.embedding.backend = match v.to_lowercase().as_str() {
                "local" => EmbeddingBackendKind::Local,
                "remote" => EmbeddingBackendKind::Remote,
                _ => EmbeddingBackendKind::Fallback,
            };
        }
        if let Ok(v) = std::env::var("EMBEDDING_DIM") {
            if let Ok(d) = v.parse() {
                self.embedding.dimension = d;
            }
        }
        if let Ok(v) = std::env::var("WATCHER_DEBOUNCE_MS") {
            if let Ok(ms) = v.parse() {
                self.watcher.debounce = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("SANDBOX_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.sandbox.timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("ROUTER_MIN_SCORE") {
            if let Ok(f) = v.parse() {
                self.router.min_score = f;
            }
        }
    }
}

/// (De)serializes a [`Duration`] as whole milliseconds so config files stay plain JSON/TOML.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.router.min_score, 0.3);
        assert_eq!(cfg.sandbox.timeout, Duration::from_secs(10));
        assert_eq!(cfg.watcher.debounce, Duration::from_secs(1));
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let cfg = CoreConfig::load(None).unwrap();
        assert_eq!(cfg.embedding.dimension, 256);
    }
}
