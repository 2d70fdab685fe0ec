//! Thin CLI surface over [`skillcore::core::engine::Engine`]. Holds no
//! business logic of its own — every subcommand is a direct call into the
//! library's query surface (§6), consistent with CLI/RPC transports being out
//! of scope as a first-class subsystem.

use clap::{Parser, Subcommand};
use skillcore::config::CoreConfig;
use skillcore::core::engine::Engine;
use skillcore::error::CoreError;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "skillcore")]
#[command(version = skillcore::VERSION)]
#[command(about = "Skill registry discovery, routing, and admission control")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file (TOML/JSON/YAML, layered over defaults and env vars).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the skills root against the manifest and index.
    Sync {
        /// Drop the index first, forcing a full re-embed of every tool.
        #[arg(long)]
        clean: bool,
    },
    /// Route a natural-language query to the best matching tools.
    Route {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        limit: usize,
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        #[arg(long)]
        min_score: Option<f32>,
    },
    /// Record routing feedback for a previously returned candidate.
    Feedback {
        query: String,
        candidate_id: String,
        /// +1 for a successful execution, -1 for an explicit correction, 0 to decay.
        signal: f32,
    },
    /// Run the admission gate against one quarantined candidate skill.
    SubmitCandidate { candidate_dir: PathBuf },
    /// Run the admission gate against every candidate in a quarantine directory.
    ScanQuarantine { quarantine_dir: Option<PathBuf> },
    /// Start the filesystem watcher and block until Ctrl-C.
    Watch,
}

impl Cli {
    pub async fn execute(self) -> Result<(), CoreError> {
        skillcore::init_logging();

        let config = CoreConfig::load(self.config.as_deref())?;
        let engine = Engine::new(config)?;

        match self.command {
            Commands::Sync { clean } => {
                let summary = engine.sync(clean).await?;
                println!(
                    "sync complete: +{} ~{} -{} ({} total, {}ms)",
                    summary.added, summary.modified, summary.deleted, summary.total, summary.duration_ms
                );
            }
            Commands::Route { query, limit, keywords, min_score } => {
                let keyword_opt = if keywords.is_empty() { None } else { Some(keywords.as_slice()) };
                let results = engine.route(&query, limit, keyword_opt, min_score).await?;
                if results.is_empty() {
                    println!("no matches");
                } else {
                    for candidate in results {
                        println!("{:<32} score={:.3} sim={:.3}", candidate.id, candidate.score, candidate.sim);
                    }
                }
            }
            Commands::Feedback { query, candidate_id, signal } => {
                engine.record_feedback(&query, &candidate_id, signal).await?;
                println!("feedback recorded");
            }
            Commands::SubmitCandidate { candidate_dir } => {
                let report = engine.submit_candidate(&candidate_dir).await?;
                println!("{}", report.summary());
            }
            Commands::ScanQuarantine { quarantine_dir } => {
                let dir = quarantine_dir.unwrap_or_else(|| engine.config().quarantine_dir.clone());
                let reports = engine.scan_quarantine(&dir).await?;
                for report in &reports {
                    println!("{}", report.summary());
                }
                println!("{} candidates processed", reports.len());
            }
            Commands::Watch => {
                engine.start_watcher()?;
                println!("watching {} for changes, Ctrl-C to stop", engine.config().skills_root.display());
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|e| CoreError::Internal(format!("failed to listen for ctrl-c: {e}")))?;
                engine.stop_watcher().await;
            }
        }

        Ok(())
    }
}
