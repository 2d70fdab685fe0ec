//! Sync Engine: diffs the filesystem against the manifest and drives the
//! Scanner → Index → Manifest transaction that keeps the two consistent.

use crate::core::embedding::EmbeddingService;
use crate::core::hash_manifest::ManifestStore;
use crate::core::index::{IndexEntry, VectorIndex};
use crate::core::router::Router;
use crate::core::scanner::{scan_skills_root, ToolRecord};
use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// `{added, modified, deleted, total}` plus timing, returned from every `sync`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub total: usize,
    pub duration_ms: u64,
}

impl SyncSummary {
    pub(crate) fn has_changes(&self) -> bool {
        self.added > 0 || self.modified > 0 || self.deleted > 0
    }
}

/// Owns the Manifest and Index on behalf of the rest of the core. The watcher
/// and the CLI's `sync` command both call through here; a `Mutex` around the
/// whole run serializes concurrent syncs so step 4/5 ordering (§4.7) is never
/// interleaved across two callers.
pub struct SyncEngine {
    skills_root: PathBuf,
    manifest: ManifestStore,
    index: Arc<VectorIndex>,
    embedding: Arc<dyn EmbeddingService>,
    router: Option<Arc<Router>>,
    lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        skills_root: PathBuf,
        manifest_path: PathBuf,
        index: Arc<VectorIndex>,
        embedding: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            skills_root,
            manifest: ManifestStore::new(manifest_path),
            index,
            embedding,
            router: None,
            lock: Mutex::new(()),
        }
    }

    /// Wires in the Router so a successful sync can invalidate its result cache.
    /// Optional: the engine works without it (e.g. in tests exercising sync alone).
    pub fn with_router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn skills_root(&self) -> &Path {
        &self.skills_root
    }

    /// Runs a full sync over the whole skills root. `clean` drops the index
    /// table first, forcing every discovered tool to be treated as added.
    pub async fn sync(&self, clean: bool) -> CoreResult<SyncSummary> {
        let _guard = self.lock.lock().await;
        let start = Instant::now();

        if clean {
            self.index.drop_table().await?;
        }

        let scan = scan_skills_root(&self.skills_root)?;
        for skipped in &scan.skipped {
            warn!("sync: skipped {}: {}", skipped.path.display(), skipped.reason);
        }

        // Only tool source files get manifest entries — an index entry exists
        // for every one of them, which is what keeps §8 invariant 2 (every
        // manifest entry has a referencing index entry) true. Stray files like
        // `SKILL.md` never get their own manifest entry; their content is
        // folded into each tool's combined hash instead (see `scanner::scan_skill_dir`).
        let current_files = tool_current_files(&scan.tools, &self.skills_root);
        let diff = self.manifest.diff(&current_files)?;

        if diff.is_empty() {
            return Ok(SyncSummary {
                duration_ms: start.elapsed().as_millis() as u64,
                total: self.index.count().await? as usize,
                ..Default::default()
            });
        }

        let result = self
            .apply(&diff.deleted, &diff.added, &diff.modified, &scan.tools, &current_files)
            .await;

        let mut summary = match result {
            Ok(s) => s,
            Err(e) => {
                warn!("sync aborted, manifest left at prior state: {e}");
                return Err(CoreError::SyncAborted(e.to_string()));
            }
        };
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "sync: added={} modified={} deleted={} total={} in {}ms",
            summary.added, summary.modified, summary.deleted, summary.total, summary.duration_ms
        );

        if summary.has_changes() {
            if let Some(router) = &self.router {
                router.invalidate_cache().await;
            }
        }

        Ok(summary)
    }

    /// Runs a sync scoped to a single changed path (e.g. one file the watcher
    /// observed, or the path the Immune Controller just promoted). Falls back
    /// to a full scan internally since the scanner works skill-directory-wise,
    /// but only touches the manifest/index entries whose source lives under
    /// `changed_path`.
    pub async fn sync_path(&self, changed_path: &Path) -> CoreResult<SyncSummary> {
        let _guard = self.lock.lock().await;
        let start = Instant::now();

        let scan = scan_skills_root(&self.skills_root)?;
        let current_files = tool_current_files(&scan.tools, &self.skills_root);
        let scoped_rel = changed_path
            .strip_prefix(&self.skills_root)
            .unwrap_or(changed_path)
            .to_string_lossy()
            .replace('\\', "/");

        let previous = self.manifest.load()?;
        let mut added = 0usize;
        let mut modified = 0usize;
        let mut deleted = 0usize;

        let in_scope = |p: &str| p == scoped_rel || p.starts_with(&format!("{scoped_rel}/"));

        let mut deletions = Vec::new();
        for path in previous.keys() {
            if in_scope(path) && !current_files.contains_key(path) {
                deletions.push(path.clone());
            }
        }
        for path in &deletions {
            self.index.delete_by_source(path).await?;
            deleted += 1;
        }

        let mut updates: HashMap<String, String> = HashMap::new();
        for tool in scan.tools.iter().filter(|t| {
            let rel = source_rel(&self.skills_root, &t.file_path);
            in_scope(&rel)
        }) {
            let rel = source_rel(&self.skills_root, &tool.file_path);
            match previous.get(&rel) {
                None => added += 1,
                Some(prev) if prev != &tool.file_hash => modified += 1,
                Some(_) => {}
            }
            self.upsert_tool(tool).await?;
            updates.insert(rel, tool.file_hash.clone());
        }

        self.manifest.commit(&updates, &deletions)?;

        let summary = SyncSummary {
            added,
            modified,
            deleted,
            total: self.index.count().await? as usize,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if summary.has_changes() {
            if let Some(router) = &self.router {
                router.invalidate_cache().await;
            }
        }

        Ok(summary)
    }

    async fn apply(
        &self,
        deleted_paths: &[String],
        added_paths: &[String],
        modified_paths: &[String],
        tools: &[ToolRecord],
        current_files: &HashMap<String, String>,
    ) -> CoreResult<SyncSummary> {
        // Step 4: deletes precede inserts (§4.7 ordering guarantee).
        for path in deleted_paths {
            self.index.delete_by_source(path).await?;
        }

        // Step 5: added/modified — batch-embed then upsert.
        let touched: Vec<&ToolRecord> = tools
            .iter()
            .filter(|t| {
                let rel = source_rel(&self.skills_root, &t.file_path);
                added_paths.contains(&rel) || modified_paths.contains(&rel)
            })
            .collect();

        let descriptions: Vec<String> = touched.iter().map(|t| t.description.clone()).collect();
        let vectors = self.embedding.embed_batch(&descriptions).await?;

        if vectors.len() != touched.len() {
            return Err(CoreError::Internal(
                "embed_batch returned a different count than requested".to_string(),
            ));
        }

        for (tool, vector) in touched.iter().zip(vectors.into_iter()) {
            let rel = source_rel(&self.skills_root, &tool.file_path);
            self.index
                .upsert(IndexEntry {
                    id: tool.id(),
                    content: tool.description.clone(),
                    vector,
                    metadata: json!({
                        "skill_name": tool.skill_name,
                        "tool_name": tool.tool_name,
                        "long_docstring": tool.long_docstring,
                        "entry_point": tool.entry_point,
                        "parameters": tool.parameters,
                        "execution_mode": tool.execution_mode,
                        "keywords": tool.keywords,
                        "content_hash": tool.file_hash,
                        "source_path": rel,
                    }),
                    source_path: rel,
                    content_hash: tool.file_hash.clone(),
                })
                .await?;
        }

        // For files whose tool count shrank, any stale ids under that source
        // not re-upserted above are already gone: deletes ran first and we
        // only ever insert what the scanner reports now.
        let mut updates: HashMap<String, String> = HashMap::new();
        for path in added_paths.iter().chain(modified_paths.iter()) {
            if let Some(hash) = current_files.get(path) {
                updates.insert(path.clone(), hash.clone());
            }
        }

        self.manifest.commit(&updates, deleted_paths)?;

        Ok(SyncSummary {
            added: added_paths.len(),
            modified: modified_paths.len(),
            deleted: deleted_paths.len(),
            total: self.index.count().await? as usize,
            duration_ms: 0,
        })
    }

    async fn upsert_tool(&self, tool: &ToolRecord) -> CoreResult<()> {
        let vector = self.embedding.embed(&tool.description).await?;
        let rel = source_rel(&self.skills_root, &tool.file_path);
        self.index
            .upsert(IndexEntry {
                id: tool.id(),
                content: tool.description.clone(),
                vector,
                metadata: json!({
                    "skill_name": tool.skill_name,
                    "tool_name": tool.tool_name,
                    "long_docstring": tool.long_docstring,
                    "entry_point": tool.entry_point,
                    "parameters": tool.parameters,
                    "execution_mode": tool.execution_mode,
                    "keywords": tool.keywords,
                    "content_hash": tool.file_hash,
                    "source_path": rel,
                }),
                source_path: rel,
                content_hash: tool.file_hash.clone(),
            })
            .await
    }
}

/// The diffable `{relative_source_path -> content_hash}` view of a scan: exactly
/// the files that back an index entry, never `SKILL.md` or other stray files —
/// this is what keeps every manifest entry backed by an index entry (§8 invariant 2).
fn tool_current_files(tools: &[ToolRecord], root: &Path) -> HashMap<String, String> {
    tools
        .iter()
        .map(|t| (source_rel(root, &t.file_path), t.file_hash.clone()))
        .collect()
}

fn source_rel(root: &Path, file_path: &Path) -> String {
    file_path
        .strip_prefix(root)
        .unwrap_or(file_path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::core::embedding::EmbeddingServiceImpl;
    use tempfile::TempDir;

    fn write_skill(root: &Path, skill: &str, description: &str, keywords: &[&str]) {
        let dir = root.join(skill);
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!(
                "---\nname: {skill}\ndescription: {description}\nversion: 1.0.0\nrouting_keywords:\n{}\n---\n",
                keywords.iter().map(|k| format!("  - {k}")).collect::<Vec<_>>().join("\n")
            ),
        )
        .unwrap();
        std::fs::write(
            dir.join("scripts").join("run.py"),
            format!("def run():\n    \"\"\"{description}\"\"\"\n    pass\n"),
        )
        .unwrap();
    }

    async fn engine(root: &Path) -> SyncEngine {
        let embedding = Arc::new(EmbeddingServiceImpl::new(EmbeddingConfig {
            dimension: 16,
            ..EmbeddingConfig::default()
        }));
        let index = Arc::new(VectorIndex::open_in_memory(16).unwrap());
        SyncEngine::new(root.to_path_buf(), root.join("manifest.json"), index, embedding)
    }

    #[tokio::test]
    async fn first_sync_reports_added_tools() {
        let root = TempDir::new().unwrap();
        write_skill(root.path(), "git", "Show git status", &["git", "status"]);

        let engine = engine(root.path()).await;
        let summary = engine.sync(false).await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn second_sync_with_no_changes_is_empty() {
        let root = TempDir::new().unwrap();
        write_skill(root.path(), "git", "Show git status", &["git"]);

        let engine = engine(root.path()).await;
        engine.sync(false).await.unwrap();
        let second = engine.sync(false).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.modified, 0);
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn delete_propagates_on_next_sync() {
        let root = TempDir::new().unwrap();
        write_skill(root.path(), "git", "Show git status", &["git"]);

        let engine = engine(root.path()).await;
        engine.sync(false).await.unwrap();

        std::fs::remove_dir_all(root.path().join("git")).unwrap();
        let summary = engine.sync(false).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(engine.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn modify_reindexes_with_new_description() {
        let root = TempDir::new().unwrap();
        write_skill(root.path(), "git", "Show git status", &["git"]);

        let engine = engine(root.path()).await;
        engine.sync(false).await.unwrap();

        write_skill(root.path(), "git", "List modified files in the repository", &["git"]);
        let summary = engine.sync(false).await.unwrap();
        assert_eq!(summary.modified, 1);

        let entry = engine.index.get_by_id("git.run").await.unwrap().unwrap();
        assert_eq!(entry.content, "List modified files in the repository");
    }
}
