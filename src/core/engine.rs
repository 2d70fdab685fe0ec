//! Wiring layer: assembles the Embedding Service, Vector Index, Router, Sync
//! Engine, Immune Controller, and Watcher from a [`CoreConfig`] and exposes the
//! transport-agnostic query surface described in SPEC_FULL.md §6. A thin
//! request/response transport (CLI, RPC) is expected to sit on top of this and
//! is explicitly out of scope here.

use crate::config::CoreConfig;
use crate::core::embedding::{EmbeddingService, EmbeddingServiceImpl};
use crate::core::immune::{ImmuneController, ImmuneReport};
use crate::core::index::VectorIndex;
use crate::core::router::{RankedCandidate, Router};
use crate::core::sandbox::DynamicSandbox;
use crate::core::sync::{SyncEngine, SyncSummary};
use crate::core::watcher::{BackgroundWatcher, SyncSubscriber};
use crate::error::CoreResult;
use std::path::Path;
use std::sync::Arc;

/// Owns every long-lived collaborator and is the one type a caller (CLI or
/// otherwise) needs to hold.
pub struct Engine {
    config: CoreConfig,
    router: Arc<Router>,
    sync: Arc<SyncEngine>,
    immune: Arc<ImmuneController>,
    watcher: Arc<BackgroundWatcher>,
}

impl Engine {
    /// Builds every collaborator from `config`. Does not perform an initial
    /// sync or start the watcher — callers decide when to do that (§6).
    pub fn new(config: CoreConfig) -> CoreResult<Self> {
        let embedding: Arc<dyn EmbeddingService> =
            Arc::new(EmbeddingServiceImpl::new(config.embedding.clone()));
        let index = Arc::new(VectorIndex::open(&config.index_path, config.embedding.dimension)?);
        let router = Arc::new(Router::new(config.router.clone(), Arc::clone(&embedding), Arc::clone(&index)));

        let sync = Arc::new(
            SyncEngine::new(
                config.skills_root.clone(),
                config.manifest_path.clone(),
                Arc::clone(&index),
                Arc::clone(&embedding),
            )
            .with_router(Arc::clone(&router)),
        );

        let sandbox = DynamicSandbox::new(config.sandbox.clone());
        let immune = Arc::new(ImmuneController::new(
            config.skills_root.clone(),
            Arc::clone(&sync),
            sandbox,
        ));

        let watcher = Arc::new(BackgroundWatcher::new(config.watcher.clone(), Arc::clone(&sync)));

        Ok(Self { config, router, sync, immune, watcher })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Hybrid semantic + keyword route over the active index (§4.5).
    pub async fn route(
        &self,
        query: &str,
        k: usize,
        explicit_keywords: Option<&[String]>,
        min_score: Option<f32>,
    ) -> CoreResult<Vec<RankedCandidate>> {
        self.router.route(query, k, explicit_keywords, min_score).await
    }

    pub async fn record_feedback(&self, query: &str, candidate_id: &str, signal: f32) -> CoreResult<()> {
        self.router.record_feedback(query, candidate_id, signal).await
    }

    /// Full (or scoped, via [`Self::sync_path`]) reconciliation of the skills
    /// root against the manifest and index (§4.7).
    pub async fn sync(&self, clean: bool) -> CoreResult<SyncSummary> {
        self.sync.sync(clean).await
    }

    pub async fn sync_path(&self, changed_path: &Path) -> CoreResult<SyncSummary> {
        self.sync.sync_path(changed_path).await
    }

    /// Runs the three-stage admission gate against one quarantined candidate
    /// and, on success, promotes and syncs it (§4.10).
    pub async fn submit_candidate(&self, candidate_dir: &Path) -> CoreResult<ImmuneReport> {
        self.immune.process_candidate(candidate_dir).await
    }

    /// Batch admission over every candidate in a quarantine directory (§2.2).
    pub async fn scan_quarantine(&self, quarantine_dir: &Path) -> CoreResult<Vec<ImmuneReport>> {
        self.immune.scan_directory(quarantine_dir).await
    }

    pub fn start_watcher(&self) -> CoreResult<()> {
        self.watcher.start()
    }

    pub async fn stop_watcher(&self) {
        self.watcher.stop().await;
    }

    pub fn watcher_running(&self) -> bool {
        self.watcher.is_running()
    }

    pub fn subscribe_sync(&self, callback: SyncSubscriber) {
        self.watcher.subscribe(callback);
    }
}
