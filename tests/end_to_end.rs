//! End-to-end scenarios against the assembled [`Engine`], exercising the
//! invariants and scenarios described for the registry and routing core:
//! bootstrap, incremental modify, delete propagation, hybrid ranking boost,
//! immune rejection, and embedding outage.

use skillcore::config::{CoreConfig, EmbeddingBackendKind};
use skillcore::core::engine::Engine;
use std::path::Path;
use std::time::Duration;
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
}

fn write_tool(root: &Path, skill: &str, tool: &str, description: &str) {
    std::fs::write(
        root.join(skill).join("scripts").join(format!("{tool}.py")),
        format!("def {tool}():\n    \"\"\"{description}\"\"\"\n    pass\n"),
    )
    .unwrap();
}

fn base_config(root: &Path) -> CoreConfig {
    let mut cfg = CoreConfig::default();
    cfg.skills_root = root.join("skills");
    cfg.quarantine_dir = root.join("quarantine");
    cfg.index_path = root.join("index.sqlite");
    cfg.manifest_path = root.join("manifest.json");
    cfg.embedding.backend = EmbeddingBackendKind::Fallback;
    cfg.embedding.dimension = 32;
    cfg.watcher.watch_paths = vec![cfg.skills_root.clone()];
    cfg
}

#[tokio::test]
async fn s1_bootstrap_indexes_and_routes_the_first_skill() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git", "status"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    let summary = engine.sync(false).await.unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.modified, 0);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.total, 1);

    let results = engine.route("what's changed in the repo", 3, None, Some(0.0)).await.unwrap();
    assert_eq!(results[0].id, "git.status");
}

#[tokio::test]
async fn s3_delete_propagation_empties_index_and_route() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    engine.sync(false).await.unwrap();

    std::fs::remove_dir_all(engine.config().skills_root.join("git")).unwrap();
    let summary = engine.sync(false).await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.total, 0);

    let results = engine.route("git status", 3, None, None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn s4_hybrid_boost_prefers_explicit_keyword_match() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Create a commit", &["git", "commit"]);
    write_tool(&config.skills_root, "git", "commit", "Create a commit");
    write_skill(&config.skills_root, "writer", "Write a commit message draft", &["writer", "prose"]);
    write_tool(&config.skills_root, "writer", "draft", "Write a commit message draft");

    let engine = Engine::new(config).unwrap();
    engine.sync(false).await.unwrap();

    let keywords = vec!["git".to_string(), "commit".to_string()];
    let results = engine
        .route("commit my changes", 5, Some(&keywords), Some(0.0))
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].id, "git.commit");
}

#[tokio::test]
async fn s5_immune_rejection_leaves_skills_root_unchanged() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    std::fs::create_dir_all(&config.quarantine_dir).unwrap();

    let candidate = config.quarantine_dir.join("sneaky");
    std::fs::create_dir_all(candidate.join("scripts")).unwrap();
    std::fs::write(
        candidate.join("SKILL.md"),
        "---\nname: sneaky\ndescription: does something\nversion: 1.0.0\n---\n",
    )
    .unwrap();
    std::fs::write(
        candidate.join("scripts").join("run.py"),
        "import subprocess\n\ndef run():\n    \"\"\"does something\"\"\"\n    pass\n",
    )
    .unwrap();

    let engine = Engine::new(config).unwrap();
    let report = engine.submit_candidate(&candidate).await.unwrap();

    assert!(!report.promoted);
    assert!(!report.static_analysis.is_safe);
    assert!(report.static_analysis.violations.iter().any(|v| v.description.contains("subprocess")));
    assert!(!engine.config().skills_root.join("sneaky").exists());
    assert!(candidate.exists());
}

#[tokio::test]
async fn s6_embedding_outage_surfaces_unavailable_without_touching_index() {
    let tmp = TempDir::new().unwrap();
    let mut config = base_config(tmp.path());
    config.embedding.backend = EmbeddingBackendKind::Remote;
    // Nothing listens here; the client fails fast with a connection error.
    config.embedding.remote_base_url = "http://127.0.0.1:1".to_string();
    config.embedding.request_timeout = Duration::from_millis(200);

    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    let sync_err = engine.sync(false).await;
    assert!(sync_err.is_err());

    let route_err = engine.route("anything", 3, None, None).await;
    assert!(route_err.is_err());
}

#[tokio::test]
async fn universal_invariant_3_repeated_sync_on_stable_tree_is_empty() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    engine.sync(false).await.unwrap();
    let second = engine.sync(false).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.modified, 0);
    assert_eq!(second.deleted, 0);
}

#[tokio::test]
async fn universal_invariant_4_identical_queries_return_identical_results() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(tmp.path());
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git", "status"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    engine.sync(false).await.unwrap();

    let first = engine.route("git status", 3, None, None).await.unwrap();
    let second = engine.route("git status", 3, None, None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn feedback_round_trip_restores_score_within_epsilon() {
    let tmp = TempDir::new().unwrap();
    let mut config = base_config(tmp.path());
    // Disable the router's result cache so each route() call reflects the
    // feedback bias recorded since the previous call.
    config.router.cache_ttl = Duration::from_millis(0);
    std::fs::create_dir_all(&config.skills_root).unwrap();
    write_skill(&config.skills_root, "git", "Show git status", &["git"]);
    write_tool(&config.skills_root, "git", "status", "Show git status");

    let engine = Engine::new(config).unwrap();
    engine.sync(false).await.unwrap();

    let before = engine.route("git status", 1, None, Some(0.0)).await.unwrap();
    let original_score = before[0].score;

    engine.record_feedback("git status", "git.status", 1.0).await.unwrap();
    engine.record_feedback("git status", "git.status", -1.0).await.unwrap();

    let after = engine.route("git status", 1, None, Some(0.0)).await.unwrap();
    assert!((after[0].score - original_score).abs() < 0.01);
}
