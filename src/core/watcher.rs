//! Live-Wire Watcher: a filesystem watch loop that debounces change bursts and
//! drives the Sync Engine, with a small state machine so overlapping bursts
//! coalesce into a single re-sync instead of queuing (§4.11, §2.2).

use crate::config::WatcherConfig;
use crate::core::sync::{SyncEngine, SyncSummary};
use crate::error::{CoreError, CoreResult};
use notify::{RecursiveMode, Watcher as NotifyWatcherTrait};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SYNCING: u8 = 2;

/// Callback invoked after a debounced sync the watcher drives finds at least
/// one add/modify/delete (§4.6). A sync that completes with no changes does
/// not notify. Subscribers never see raw filesystem events, only the
/// resulting [`SyncSummary`].
pub type SyncSubscriber = Arc<dyn Fn(&SyncSummary) + Send + Sync>;

/// Watches `config.watch_paths` for changes to files with a recognized
/// extension, collapsing every event inside a debounce window into one sync.
/// Only one sync runs at a time; a burst that arrives mid-sync sets a pending
/// flag rather than spawning a second overlapping sync (§4.11 invariant: the
/// Sync Engine's own lock would serialize them anyway, but coalescing here
/// avoids queuing up redundant re-scans of an unchanged tree).
pub struct BackgroundWatcher {
    config: WatcherConfig,
    sync: Arc<SyncEngine>,
    state: Arc<AtomicU8>,
    pending: Arc<AtomicBool>,
    subscribers: Arc<std::sync::Mutex<Vec<SyncSubscriber>>>,
    shutdown: Arc<std::sync::Mutex<Option<mpsc::Sender<()>>>>,
}

impl BackgroundWatcher {
    pub fn new(config: WatcherConfig, sync: Arc<SyncEngine>) -> Self {
        Self {
            config,
            sync,
            state: Arc::new(AtomicU8::new(STATE_STOPPED)),
            pending: Arc::new(AtomicBool::new(false)),
            subscribers: Arc::new(std::sync::Mutex::new(Vec::new())),
            shutdown: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub fn subscribe(&self, callback: SyncSubscriber) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(callback);
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) != STATE_STOPPED
    }

    /// Starts the watch loop on a background task. Returns immediately; call
    /// [`Self::stop`] to tear it down. A second call while already running is a
    /// no-op rather than an error, matching the idempotent start semantics of
    /// the teacher's other long-running services.
    pub fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.state.swap(STATE_RUNNING, Ordering::SeqCst) != STATE_STOPPED {
            warn!("watcher start() called while already running, ignoring");
            self.state.store(STATE_RUNNING, Ordering::SeqCst);
            return Ok(());
        }

        if !self.config.enabled {
            info!("watcher disabled by configuration, not starting");
            self.state.store(STATE_STOPPED, Ordering::SeqCst);
            return Ok(());
        }
        if self.config.watch_paths.is_empty() {
            return Err(CoreError::InputValidation(
                "watcher has no configured watch paths".to_string(),
            ));
        }

        let (event_tx, mut event_rx) = mpsc::channel::<notify::Event>(256);
        let mut notify_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        })
        .map_err(|e| CoreError::Internal(format!("failed to create filesystem watcher: {e}")))?;

        for path in &self.config.watch_paths {
            notify_watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| CoreError::Internal(format!("failed to watch {}: {e}", path.display())))?;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown.lock().map_err(|_| CoreError::Internal("watcher shutdown lock poisoned".to_string()))? =
            Some(shutdown_tx);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Keep the notify::Watcher alive for the duration of the loop.
            let _notify_watcher = notify_watcher;
            let debounce = this.config.debounce;
            let mut dirty = false;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("watcher received shutdown signal");
                        break;
                    }
                    event = event_rx.recv() => {
                        match event {
                            Some(event) => {
                                if this.relevant(&event) {
                                    if this.passes_pre_sync_validation(&event) {
                                        dirty = true;
                                    } else {
                                        warn!(
                                            "watcher: dropping event with invalid syntax: {:?}",
                                            event.paths
                                        );
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(debounce), if dirty => {
                        dirty = false;
                        this.run_debounced_sync().await;
                    }
                }
            }

            this.state.store(STATE_STOPPED, Ordering::SeqCst);
            info!("watcher loop exited");
        });

        Ok(())
    }

    /// Signals the background loop to exit and blocks the caller only long
    /// enough to hand off the shutdown signal, not for the loop to finish.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().ok().and_then(|mut guard| guard.take());
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }

    fn relevant(&self, event: &notify::Event) -> bool {
        event.paths.iter().any(|p| self.has_supported_extension(p) && !self.is_ignored_name(p))
            || matches!(event.kind, notify::EventKind::Remove(_))
    }

    fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.config.supported_extensions.iter().any(|s| s == ext) || ext == "md")
            .unwrap_or(false)
    }

    /// Qualifying events never name a file prefixed with `_` or `.` (§4.6) —
    /// private helpers and dotfiles never drive a resync.
    fn is_ignored_name(&self, path: &Path) -> bool {
        path.file_stem()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('_') || n.starts_with('.'))
            .unwrap_or(false)
    }

    /// Best-effort syntax validation of every changed file named by `event`
    /// before it's allowed to mark the watcher dirty (§4.6 pre-sync
    /// validation). Deletions are always valid — there's nothing left to
    /// parse, and the deletion itself is the thing that needs to propagate.
    fn passes_pre_sync_validation(&self, event: &notify::Event) -> bool {
        if matches!(event.kind, notify::EventKind::Remove(_)) {
            return true;
        }

        event.paths.iter().all(|path| match std::fs::read_to_string(path) {
            Ok(content) => {
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    crate::core::scanner::parse_frontmatter(&content).is_some()
                } else {
                    crate::core::scanner::quick_syntax_check(&content)
                }
            }
            // File already gone by the time we got to read it (e.g. a rename
            // chased by a delete) — don't block the resync on a race.
            Err(_) => true,
        })
    }

    async fn run_debounced_sync(&self) {
        if self.state.swap(STATE_SYNCING, Ordering::SeqCst) == STATE_SYNCING {
            self.pending.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            match self.sync.sync(false).await {
                Ok(summary) => {
                    info!(
                        "watcher-driven sync: +{} ~{} -{}",
                        summary.added, summary.modified, summary.deleted
                    );
                    if summary.has_changes() {
                        if let Ok(subs) = self.subscribers.lock() {
                            for sub in subs.iter() {
                                sub(&summary);
                            }
                        }
                    }
                }
                Err(e) => error!("watcher-driven sync failed: {e}"),
            }

            if self.pending.swap(false, Ordering::SeqCst) {
                continue;
            }
            break;
        }

        self.state.store(STATE_RUNNING, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::core::embedding::EmbeddingServiceImpl;
    use crate::core::index::VectorIndex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn make_sync(root: &Path) -> Arc<SyncEngine> {
        let embedding = Arc::new(EmbeddingServiceImpl::new(EmbeddingConfig {
            dimension: 8,
            ..EmbeddingConfig::default()
        }));
        let index = Arc::new(VectorIndex::open_in_memory(8).unwrap());
        Arc::new(SyncEngine::new(
            root.to_path_buf(),
            root.join("manifest.json"),
            index,
            embedding,
        ))
    }

    #[tokio::test]
    async fn start_stop_toggles_running_state() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig {
            watch_paths: vec![dir.path().to_path_buf()],
            debounce: Duration::from_millis(10),
            ..WatcherConfig::default()
        };
        let watcher = Arc::new(BackgroundWatcher::new(config, sync));
        watcher.start().unwrap();
        assert!(watcher.is_running());
        watcher.stop().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn disabled_watcher_does_not_start() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig { enabled: false, ..WatcherConfig::default() };
        let watcher = Arc::new(BackgroundWatcher::new(config, sync));
        watcher.start().unwrap();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent_when_already_running() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig {
            watch_paths: vec![dir.path().to_path_buf()],
            ..WatcherConfig::default()
        };
        let watcher = Arc::new(BackgroundWatcher::new(config, sync));
        watcher.start().unwrap();
        watcher.start().unwrap();
        assert!(watcher.is_running());
        watcher.stop().await;
    }

    #[tokio::test]
    async fn invalid_syntax_event_is_dropped_not_synced() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig::default();
        let watcher = BackgroundWatcher::new(config, sync);

        let broken = dir.path().join("broken.py");
        std::fs::write(&broken, "def run(:\n    return [1, 2\n").unwrap();
        let event = notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(broken);
        assert!(!watcher.passes_pre_sync_validation(&event));
    }

    #[tokio::test]
    async fn valid_syntax_event_passes_pre_sync_validation() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig::default();
        let watcher = BackgroundWatcher::new(config, sync);

        let fine = dir.path().join("fine.py");
        std::fs::write(&fine, "def run():\n    return []\n").unwrap();
        let event = notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(fine);
        assert!(watcher.passes_pre_sync_validation(&event));
    }

    fn write_skill(root: &Path) {
        let dir = root.join("git");
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            "---\nname: git\ndescription: Show git status\nversion: 1.0.0\n---\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("scripts").join("status.py"),
            "def status():\n    \"\"\"Show git status\"\"\"\n    pass\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn subscriber_is_invoked_after_sync_that_finds_changes() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path());
        let sync = make_sync(dir.path());
        let config = WatcherConfig { debounce: Duration::from_millis(5), ..WatcherConfig::default() };
        let watcher = Arc::new(BackgroundWatcher::new(config, sync));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        watcher.subscribe(Arc::new(move |_summary| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        watcher.run_debounced_sync().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_is_not_invoked_after_a_no_op_sync() {
        let dir = TempDir::new().unwrap();
        let sync = make_sync(dir.path());
        let config = WatcherConfig { debounce: Duration::from_millis(5), ..WatcherConfig::default() };
        let watcher = Arc::new(BackgroundWatcher::new(config, sync));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        watcher.subscribe(Arc::new(move |_summary| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        watcher.run_debounced_sync().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
