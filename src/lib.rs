//! # Skill Registry & Routing Core
//!
//! This crate is the embeddable core behind a skill registry: it discovers
//! declaratively-defined skills on disk, keeps a content-addressed index of
//! their tools in sync with the filesystem, routes natural-language queries to
//! the best matching tool with a hybrid semantic + keyword ranking, and gates
//! any new skill behind a static-analysis and sandboxed-execution admission
//! check before it ever reaches the active registry.
//!
//! A thin request/response transport (CLI, RPC) is expected to sit on top of
//! [`Engine`] — building one is out of scope for this crate.
//!
//! ## Example usage
//!
//! ```rust,no_run
//! use skillcore::{config::CoreConfig, core::engine::Engine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::load(None)?;
//!     let engine = Engine::new(config)?;
//!
//!     engine.sync(false).await?;
//!     let matches = engine.route("extract text from a PDF", 5, None, None).await?;
//!     println!("top matches: {:?}", matches);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod security;

pub use config::CoreConfig;
pub use core::engine::Engine;
pub use error::{CoreError, CoreResult};

/// Version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes `tracing` for the process (safe to call more than once, and
/// safe from tests). Honors `RUST_LOG`, falling back to `skillcore=info`.
pub fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "skillcore=info".into());
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn engine_initializes_from_default_config_against_empty_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = CoreConfig::default();
        config.skills_root = temp_dir.path().join("skills");
        config.index_path = temp_dir.path().join("index.sqlite");
        config.manifest_path = temp_dir.path().join("manifest.json");
        config.embedding.dimension = 8;

        let engine = Engine::new(config).unwrap();
        let summary = engine.sync(false).await.unwrap();
        assert_eq!(summary.added, 0);
    }
}
