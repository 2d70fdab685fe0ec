//! Hash & Manifest Store: the persistent file → content-hash map the Sync Engine
//! diffs the filesystem against.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Hash algorithm stamped into the manifest file. Bumping this forces every file to
/// be treated as added on the next `diff`, per the fixed-hash-function invariant.
pub const HASH_ALGO: &str = "sha256";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestFile {
    hash_algo: String,
    entries: HashMap<String, String>,
}

/// The three buckets a diff against the filesystem produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Persists a `relative_path -> content_hash` map to a single JSON blob adjacent to
/// the index, committed atomically via write-temp + rename.
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns the last committed manifest, or an empty map if none has ever been
    /// written, or (per the fixed-hash-function invariant) if the stamped algorithm
    /// no longer matches [`HASH_ALGO`].
    pub fn load(&self) -> CoreResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let parsed: ManifestFile = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                warn!("manifest at {} is unreadable ({e}); starting fresh", self.path.display());
                return Ok(HashMap::new());
            }
        };

        if parsed.hash_algo != HASH_ALGO {
            warn!(
                "manifest hash_algo drift ({} -> {}); forcing full rebuild",
                parsed.hash_algo, HASH_ALGO
            );
            return Ok(HashMap::new());
        }

        Ok(parsed.entries)
    }

    /// Computes added/modified/deleted against the last committed manifest.
    pub fn diff(&self, current_files: &HashMap<String, String>) -> CoreResult<ManifestDiff> {
        let previous = self.load()?;
        let mut diff = ManifestDiff::default();

        for (path, hash) in current_files {
            match previous.get(path) {
                None => diff.added.push(path.clone()),
                Some(prev_hash) if prev_hash != hash => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }

        for path in previous.keys() {
            if !current_files.contains_key(path) {
                diff.deleted.push(path.clone());
            }
        }

        diff.added.sort();
        diff.modified.sort();
        diff.deleted.sort();
        Ok(diff)
    }

    /// Atomically replaces the manifest on disk. `deletions` are dropped, `updates`
    /// are merged over the previous map. On crash between write and rename, the
    /// previous manifest file remains valid (the OS rename is atomic within a
    /// filesystem).
    pub fn commit(
        &self,
        updates: &HashMap<String, String>,
        deletions: &[String],
    ) -> CoreResult<()> {
        let mut entries = self.load()?;
        for path in deletions {
            entries.remove(path);
        }
        for (path, hash) in updates {
            entries.insert(path.clone(), hash.clone());
        }

        let manifest = ManifestFile {
            hash_algo: HASH_ALGO.to_string(),
            entries,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let serialized = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;

        debug!("committed manifest with {} entries", manifest.entries.len());
        Ok(())
    }
}

/// SHA-256 over a file's bytes, hex-encoded. The fixed hash function for this
/// installation (§4.1) — switching it is a [`HASH_ALGO`] bump, not a config knob.
pub fn hash_file(path: &Path) -> CoreResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Combines two hex-encoded hashes into one, so a tool's effective content hash
/// can fold in its skill's `SKILL.md` (keywords, description) alongside its own
/// script bytes — editing either one is enough to trigger reindexing.
pub fn combine_hashes(a: &str, b: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hashes every regular file under `root`, keyed by path relative to `root`.
pub fn hash_tree(root: &Path) -> CoreResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    if !root.exists() {
        return Ok(out);
    }

    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let hash = hash_file(entry.path())?;
        out.insert(rel, hash);
    }

    info!("hashed {} files under {}", out.len(), root.display());
    Ok(out)
}
