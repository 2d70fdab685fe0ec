//! Immune Controller: orchestrates Static Validator → Dynamic Sandbox →
//! promotion for every quarantined candidate skill (§4.10).

use crate::core::sandbox::DynamicSandbox;
use crate::core::scanner::{scan_skill_dir, ScanResult};
use crate::core::sync::SyncEngine;
use crate::core::validator::{scan_source, StaticAnalysisOutcome};
use crate::error::{CoreError, CoreResult};
use crate::security::path::validate_path_component;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImmuneReport {
    pub skill_name: String,
    pub path: PathBuf,
    pub static_analysis: StaticAnalysisOutcome,
    pub dynamic_outcome: Option<crate::core::sandbox::DynamicOutcome>,
    pub promoted: bool,
    pub rejection_reason: Option<String>,
}

impl ImmuneReport {
    fn rejected(skill_name: String, path: PathBuf, static_analysis: StaticAnalysisOutcome, reason: String) -> Self {
        Self {
            skill_name,
            path,
            static_analysis,
            dynamic_outcome: None,
            promoted: false,
            rejection_reason: Some(reason),
        }
    }

    /// Human-readable one-paragraph verdict, used by the CLI to print a readable
    /// summary alongside the machine-serializable report (§2.2).
    pub fn summary(&self) -> String {
        if self.promoted {
            format!("PROMOTED: {} ({})", self.skill_name, self.path.display())
        } else {
            format!(
                "REJECTED: {} ({}) — {}",
                self.skill_name,
                self.path.display(),
                self.rejection_reason.as_deref().unwrap_or("unknown reason")
            )
        }
    }
}

pub struct ImmuneController {
    skills_root: PathBuf,
    sync: Arc<SyncEngine>,
    sandbox: DynamicSandbox,
}

impl ImmuneController {
    pub fn new(skills_root: PathBuf, sync: Arc<SyncEngine>, sandbox: DynamicSandbox) -> Self {
        Self { skills_root, sync, sandbox }
    }

    /// Runs the three-stage gate against one quarantined skill directory.
    /// `candidate_dir` must contain a `SKILL.md` and a `scripts/` directory, the
    /// same shape as an active skill (§6).
    pub async fn process_candidate(&self, candidate_dir: &Path) -> CoreResult<ImmuneReport> {
        let skill_name = candidate_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if validate_path_component(&skill_name).is_err() {
            return Err(CoreError::InputValidation(format!(
                "candidate directory name '{skill_name}' is not a valid skill name"
            )));
        }

        let mut scan = ScanResult::default();
        scan_skill_dir(candidate_dir, &mut scan)?;
        if scan.tools.is_empty() {
            let outcome = StaticAnalysisOutcome { is_safe: false, violations: vec![] };
            return Ok(ImmuneReport::rejected(
                skill_name,
                candidate_dir.to_path_buf(),
                outcome,
                "no recognizable tool entry points found in candidate".to_string(),
            ));
        }

        // Stage 1: static validator, across every tool source file in the candidate.
        let mut combined = StaticAnalysisOutcome { is_safe: true, violations: vec![] };
        for tool in &scan.tools {
            let source = std::fs::read_to_string(&tool.file_path)?;
            let outcome = scan_source(&source);
            if !outcome.is_safe {
                combined.is_safe = false;
                combined.violations.extend(outcome.violations);
            }
        }

        if !combined.is_safe {
            warn!("immune: {skill_name} rejected by static validator ({} violations)", combined.violations.len());
            return Ok(ImmuneReport::rejected(
                skill_name,
                candidate_dir.to_path_buf(),
                combined,
                format!("{} static analysis violation(s)", combined.violations.len()),
            ));
        }

        // Stage 2: dynamic sandbox, on the first declared tool (the documented
        // entry point the candidate's smoke test should exercise).
        let primary_tool = &scan.tools[0];
        let dynamic_outcome = self.sandbox.run(primary_tool).await;

        if dynamic_outcome.unavailable {
            return Ok(ImmuneReport {
                skill_name,
                path: candidate_dir.to_path_buf(),
                static_analysis: combined,
                dynamic_outcome: Some(dynamic_outcome),
                promoted: false,
                rejection_reason: Some("sandbox unavailable".to_string()),
            });
        }

        if !dynamic_outcome.pass {
            info!("immune: {skill_name} rejected by dynamic sandbox");
            let reason = format!("dynamic verification failed: {}", dynamic_outcome.stderr.trim());
            return Ok(ImmuneReport {
                skill_name,
                path: candidate_dir.to_path_buf(),
                static_analysis: combined,
                dynamic_outcome: Some(dynamic_outcome),
                promoted: false,
                rejection_reason: Some(reason),
            });
        }

        // Stage 3: promotion — move the candidate directory into the active root.
        let destination = self.skills_root.join(&skill_name);
        if destination.exists() {
            return Err(CoreError::InputValidation(format!(
                "a skill named '{skill_name}' already exists in the active root"
            )));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(candidate_dir, &destination)?;

        // Stage 4: scope the sync to exactly the path that changed.
        let sync_summary = self.sync.sync_path(&destination).await?;
        info!("immune: promoted {skill_name}, sync added {} tools", sync_summary.added);

        Ok(ImmuneReport {
            skill_name,
            path: destination,
            static_analysis: combined,
            dynamic_outcome: Some(dynamic_outcome),
            promoted: true,
            rejection_reason: None,
        })
    }

    /// Batch admission: runs `process_candidate` over every qualifying entry of
    /// a quarantine directory, skipping hidden/test-prefixed entries (§4.10,
    /// a direct counterpart of the pre-distillation source's
    /// `ImmuneSystem.scan_directory`).
    pub async fn scan_directory(&self, quarantine_dir: &Path) -> CoreResult<Vec<ImmuneReport>> {
        let mut reports = Vec::new();
        if !quarantine_dir.exists() {
            return Ok(reports);
        }

        let mut entries: Vec<PathBuf> = std::fs::read_dir(quarantine_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('.') && !n.starts_with('_'))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        let mut promoted = 0usize;
        for candidate in entries {
            match self.process_candidate(&candidate).await {
                Ok(report) => {
                    if report.promoted {
                        promoted += 1;
                    }
                    reports.push(report);
                }
                Err(e) => warn!("immune: skipping candidate {}: {e}", candidate.display()),
            }
        }

        info!("immune: scanned {} candidates, {promoted} promoted", reports.len());
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::core::embedding::EmbeddingServiceImpl;
    use crate::config::EmbeddingConfig;
    use crate::core::index::VectorIndex;
    use tempfile::TempDir;

    fn write_candidate(dir: &Path, skill: &str, body: &str) -> PathBuf {
        let skill_dir = dir.join(skill);
        std::fs::create_dir_all(skill_dir.join("scripts")).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            format!("---\nname: {skill}\ndescription: test skill\nversion: 1.0.0\n---\n"),
        )
        .unwrap();
        std::fs::write(skill_dir.join("scripts").join("run.py"), body).unwrap();
        skill_dir
    }

    async fn controller(skills_root: &Path) -> ImmuneController {
        let embedding = Arc::new(EmbeddingServiceImpl::new(EmbeddingConfig {
            dimension: 8,
            ..EmbeddingConfig::default()
        }));
        let index = Arc::new(VectorIndex::open_in_memory(8).unwrap());
        let sync = Arc::new(SyncEngine::new(
            skills_root.to_path_buf(),
            skills_root.join("manifest.json"),
            index,
            embedding,
        ));
        ImmuneController::new(skills_root.to_path_buf(), sync, DynamicSandbox::new(SandboxConfig::default()))
    }

    #[tokio::test]
    async fn candidate_with_forbidden_import_is_rejected_and_root_unchanged() {
        let quarantine = TempDir::new().unwrap();
        let skills_root = TempDir::new().unwrap();
        let candidate = write_candidate(
            quarantine.path(),
            "sneaky",
            "import subprocess\n\ndef run():\n    \"\"\"Do something\"\"\"\n    pass\n",
        );

        let controller = controller(skills_root.path()).await;
        let report = controller.process_candidate(&candidate).await.unwrap();

        assert!(!report.promoted);
        assert!(!report.static_analysis.is_safe);
        assert!(report.static_analysis.violations.iter().any(|v| v.rule_id == "import-subprocess"));
        assert!(!skills_root.path().join("sneaky").exists());
        assert!(candidate.exists());
    }

    #[tokio::test]
    async fn scan_directory_reports_one_entry_per_candidate() {
        let quarantine = TempDir::new().unwrap();
        let skills_root = TempDir::new().unwrap();
        write_candidate(quarantine.path(), "bad", "import os\n\ndef run():\n    pass\n");
        write_candidate(quarantine.path(), "also_bad", "eval(x)\n\ndef run():\n    pass\n");

        let controller = controller(skills_root.path()).await;
        let reports = controller.scan_directory(quarantine.path()).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.promoted));
    }
}
