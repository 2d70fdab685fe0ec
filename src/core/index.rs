//! Vector + Keyword Index: a SQLite-backed table of (id, vector, content, metadata)
//! supporting semantic, keyword, and hybrid queries with incremental add/delete.
//!
//! Matches the teacher's vector-index storage pattern (`rusqlite`, bundled,
//! `tokio::task::spawn_blocking` around every synchronous call) with cosine
//! similarity computed in-process over fetched rows rather than in SQL.

use crate::error::{CoreError, CoreResult};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
    pub source_path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMatch {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    /// `1/(1+distance)`; 1.0 is an exact match.
    pub sim: f32,
    /// Count of query keywords present in this entry's keyword list, for the
    /// router's hybrid fusion to weigh on top of `sim`.
    pub keyword_overlap: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Only rows whose `metadata[key] == value` (string comparison) are returned.
    pub metadata_filter: Option<(String, String)>,
}

/// Persistence + query surface for the index. Internally serializes all SQLite
/// access behind `spawn_blocking` since `rusqlite::Connection` is synchronous.
pub struct VectorIndex {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl VectorIndex {
    pub fn open(path: &Path, dimension: usize) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    pub fn open_in_memory(dimension: usize) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    fn init_schema(conn: &Connection) -> CoreResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                vector_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                source_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_skills_source_path ON skills(source_path)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_skills_updated_at ON skills(updated_at)",
            [],
        )?;
        Ok(())
    }

    fn conn_handle(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    pub async fn upsert(&self, entry: IndexEntry) -> CoreResult<()> {
        if entry.vector.len() != self.dimension {
            return Err(CoreError::IndexConflict(format!(
                "vector has dimension {}, index is fixed at {}",
                entry.vector.len(),
                self.dimension
            )));
        }

        let conn = self.conn_handle();
        tokio::task::spawn_blocking(move || -> CoreResult<()> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            let vector_json = serde_json::to_string(&entry.vector)?;
            let metadata_json = serde_json::to_string(&entry.metadata)?;
            conn.execute(
                "INSERT INTO skills (id, content, vector_json, metadata_json, source_path, content_hash, schema_version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    vector_json = excluded.vector_json,
                    metadata_json = excluded.metadata_json,
                    source_path = excluded.source_path,
                    content_hash = excluded.content_hash,
                    schema_version = excluded.schema_version,
                    updated_at = excluded.updated_at",
                params![
                    entry.id,
                    entry.content,
                    vector_json,
                    metadata_json,
                    entry.source_path,
                    entry.content_hash,
                    SCHEMA_VERSION,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;

        Ok(())
    }

    pub async fn delete_by_id(&self, id: &str) -> CoreResult<()> {
        let conn = self.conn_handle();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> CoreResult<()> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            conn.execute("DELETE FROM skills WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(())
    }

    pub async fn delete_by_source(&self, source_path: &str) -> CoreResult<usize> {
        let conn = self.conn_handle();
        let source_path = source_path.to_string();
        let deleted = tokio::task::spawn_blocking(move || -> CoreResult<usize> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            let n = conn.execute("DELETE FROM skills WHERE source_path = ?1", params![source_path])?;
            Ok(n)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(deleted)
    }

    pub async fn count(&self) -> CoreResult<i64> {
        let conn = self.conn_handle();
        let count = tokio::task::spawn_blocking(move || -> CoreResult<i64> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM skills", [], |r| r.get(0))?;
            Ok(n)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(count)
    }

    pub async fn get_by_id(&self, id: &str) -> CoreResult<Option<IndexEntry>> {
        let conn = self.conn_handle();
        let id = id.to_string();
        let row = tokio::task::spawn_blocking(move || -> CoreResult<Option<IndexEntry>> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, content, vector_json, metadata_json, source_path, content_hash FROM skills WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id])?;
            if let Some(row) = rows.next()? {
                Ok(Some(row_to_entry(row)?))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(row)
    }

    pub async fn get_all(&self) -> CoreResult<Vec<IndexEntry>> {
        let conn = self.conn_handle();
        let rows = tokio::task::spawn_blocking(move || -> CoreResult<Vec<IndexEntry>> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, content, vector_json, metadata_json, source_path, content_hash FROM skills",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(rows)
    }

    /// Drops the table entirely — used for a clean rebuild.
    pub async fn drop_table(&self) -> CoreResult<()> {
        let conn = self.conn_handle();
        tokio::task::spawn_blocking(move || -> CoreResult<()> {
            let conn = conn.lock().map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
            conn.execute("DROP TABLE IF EXISTS skills", [])?;
            Self::init_schema(&conn)?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(format!("index task panicked: {e}")))??;
        Ok(())
    }

    /// Top-k by vector distance, optionally filtered by a single metadata field.
    pub async fn search(
        &self,
        vector: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> CoreResult<Vec<SkillMatch>> {
        if vector.len() != self.dimension {
            return Err(CoreError::IndexConflict(format!(
                "query vector has dimension {}, index is fixed at {}",
                vector.len(),
                self.dimension
            )));
        }

        let entries = self.get_all().await?;
        let mut scored: Vec<SkillMatch> = entries
            .into_iter()
            .filter(|e| matches_filter(&e.metadata, options))
            .map(|e| {
                let distance = cosine_distance(vector, &e.vector);
                SkillMatch {
                    id: e.id,
                    content: e.content,
                    metadata: e.metadata,
                    sim: 1.0 / (1.0 + distance),
                    keyword_overlap: 0,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.sim.partial_cmp(&a.sim).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Top-k by an approximate fused score of vector similarity and keyword
    /// overlap — an oversampled candidate set the Router refines with the full
    /// hybrid algorithm (verb bonus, feedback bias).
    pub async fn search_hybrid(
        &self,
        vector: &[f32],
        keywords: &[String],
        k: usize,
    ) -> CoreResult<Vec<SkillMatch>> {
        if vector.len() != self.dimension {
            return Err(CoreError::IndexConflict(format!(
                "query vector has dimension {}, index is fixed at {}",
                vector.len(),
                self.dimension
            )));
        }

        let entries = self.get_all().await?;
        let lowered_keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut scored: Vec<SkillMatch> = entries
            .into_iter()
            .map(|e| {
                let distance = cosine_distance(vector, &e.vector);
                let sim = 1.0 / (1.0 + distance);
                let entry_keywords: Vec<String> = e
                    .metadata
                    .get("keywords")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_lowercase())
                            .collect()
                    })
                    .unwrap_or_default();
                let overlap = lowered_keywords
                    .iter()
                    .filter(|kw| entry_keywords.contains(kw))
                    .count();
                SkillMatch {
                    id: e.id,
                    content: e.content,
                    metadata: e.metadata,
                    sim,
                    keyword_overlap: overlap,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            let a_score = a.sim + (a.keyword_overlap as f32) * 0.1;
            let b_score = b.sim + (b.keyword_overlap as f32) * 0.1;
            b_score.partial_cmp(&a_score).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        debug!("search_hybrid returned {} oversampled candidates", scored.len());
        Ok(scored)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn matches_filter(metadata: &Value, options: &SearchOptions) -> bool {
    match &options.metadata_filter {
        None => true,
        Some((key, expected)) => metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| v == expected)
            .unwrap_or(false),
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<IndexEntry> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let vector_json: String = row.get(2)?;
    let metadata_json: String = row.get(3)?;
    let source_path: String = row.get(4)?;
    let content_hash: String = row.get(5)?;

    let vector: Vec<f32> = serde_json::from_str(&vector_json).unwrap_or_default();
    let metadata: Value = serde_json::from_str(&metadata_json).unwrap_or(Value::Null);

    Ok(IndexEntry {
        id,
        content,
        vector,
        metadata,
        source_path,
        content_hash,
    })
}

/// Non-negative distance where smaller = more similar (0.0 for identical
/// unit vectors, up to 2.0 for opposite vectors). Returns 2.0 (maximally
/// dissimilar) on length mismatch or zero-norm input rather than panicking.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 2.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine
}

#[allow(dead_code)]
pub(crate) fn default_index_path() -> PathBuf {
    PathBuf::from("./skillcore.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, vector: Vec<f32>, keywords: &[&str]) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            content: format!("content for {id}"),
            vector,
            metadata: json!({ "keywords": keywords }),
            source_path: format!("{id}.py"),
            content_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let index = VectorIndex::open_in_memory(4).unwrap();
        let err = index.upsert(entry("a", vec![1.0, 0.0], &[])).await.unwrap_err();
        assert!(matches!(err, CoreError::IndexConflict(_)));
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let index = VectorIndex::open_in_memory(3).unwrap();
        index.upsert(entry("a", vec![1.0, 0.0, 0.0], &["git"])).await.unwrap();
        let fetched = index.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(fetched.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = VectorIndex::open_in_memory(3).unwrap();
        index.upsert(entry("a", vec![1.0, 0.0, 0.0], &[])).await.unwrap();
        index.upsert(entry("a", vec![0.0, 1.0, 0.0], &[])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let fetched = index.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(fetched.vector, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn delete_by_source_removes_matching_rows() {
        let index = VectorIndex::open_in_memory(3).unwrap();
        index.upsert(entry("a", vec![1.0, 0.0, 0.0], &[])).await.unwrap();
        let mut b = entry("b", vec![0.0, 1.0, 0.0], &[]);
        b.source_path = "a.py".to_string();
        index.upsert(b).await.unwrap();

        let deleted = index.delete_by_source("a.py").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_descending() {
        let index = VectorIndex::open_in_memory(2).unwrap();
        index.upsert(entry("close", vec![1.0, 0.0], &[])).await.unwrap();
        index.upsert(entry("far", vec![0.0, 1.0], &[])).await.unwrap();

        let results = index.search(&[1.0, 0.0], 2, &SearchOptions::default()).await.unwrap();
        assert_eq!(results[0].id, "close");
        assert!(results[0].sim > results[1].sim);
    }

    #[tokio::test]
    async fn search_hybrid_rewards_keyword_overlap() {
        let index = VectorIndex::open_in_memory(2).unwrap();
        // Both entries have identical vectors so only keyword overlap differentiates them.
        index.upsert(entry("no_kw", vec![1.0, 0.0], &[])).await.unwrap();
        index.upsert(entry("with_kw", vec![1.0, 0.0], &["git", "commit"])).await.unwrap();

        let results = index
            .search_hybrid(&[1.0, 0.0], &["git".to_string(), "commit".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(results[0].id, "with_kw");
        assert_eq!(results[0].keyword_overlap, 2);
    }

    #[tokio::test]
    async fn drop_table_clears_everything() {
        let index = VectorIndex::open_in_memory(2).unwrap();
        index.upsert(entry("a", vec![1.0, 0.0], &[])).await.unwrap();
        index.drop_table().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_unit_vectors() {
        let d = cosine_distance(&[1.0, 0.0], &[1.0, 0.0]);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_handles_length_mismatch_without_panicking() {
        let d = cosine_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
        assert_eq!(d, 2.0);
    }
}
