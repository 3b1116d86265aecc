//! orbtree - branch/PR dependency trees with CI status
//!
//! ## Commands
//!
//! - `tree`: reconcile a records file into per-repository trees
//! - `fetch`: pull an organization's open PRs via `gh` and write the forest document
//! - `refresh`: run one budgeted CI refresh cycle and print the enriched tree
//! - `suggest`: ask the advisory gateway for parallel work orderings
//! - `watch`: run the periodic refresh loop until Ctrl-C

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, Level};

use orbtree_core::{
    render_text, ForestDocument, ForestInput, GhRecordSource, GhRunner, JsonFileSource, OrbConfig,
    Reconciler, RecordSource, RefreshLoop, RefreshMode, RefreshReport, RepoTree, StructuralWarning,
    METRICS,
};

#[derive(Parser)]
#[command(name = "orbtree")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Branch/PR dependency trees with CI status", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file
    #[arg(long, global = true, default_value = "orbtree.json", env = "ORBTREE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a records file and print the trees
    Tree {
        /// Records file: repository → records
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Fetch an organization's open PRs through `gh`
    Fetch {
        /// Organization (overrides config)
        #[arg(long)]
        org: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the raw records mapping instead of the forest document
        #[arg(long)]
        raw: bool,

        /// Skip the CI refresh cycle
        #[arg(long)]
        no_ci: bool,

        /// Do not list each branch's commits over its parent
        #[arg(long)]
        no_commits: bool,
    },

    /// Run one CI refresh cycle through `gh` and print the enriched trees
    Refresh {
        #[arg(short, long)]
        input: PathBuf,

        /// Ignore TTLs (the request budget still applies)
        #[arg(long)]
        force: bool,

        /// Request budget for this cycle (default: from config)
        #[arg(long)]
        budget: Option<usize>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Ask the advisory gateway for parallel orderings
    Suggest {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Run the periodic refresh loop until Ctrl-C
    Watch {
        /// Records file re-read every tick (default: fetch via `gh`)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Organization when fetching via `gh` (overrides config)
        #[arg(long)]
        org: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let long_running = matches!(cli.command, Commands::Watch { .. });
    orbtree_core::init_tracing(cli.json, level, long_running);

    let config = OrbConfig::load(&cli.config);
    config.validate().context("invalid configuration")?;

    let result = match cli.command {
        Commands::Tree { input, format } => cmd_tree(&config, &input, format).await,
        Commands::Fetch {
            org,
            output,
            raw,
            no_ci,
            no_commits,
        } => cmd_fetch(config, org, output.as_deref(), raw, no_ci, no_commits).await,
        Commands::Refresh {
            input,
            force,
            budget,
            format,
        } => cmd_refresh(config, &input, force, budget, format).await,
        Commands::Suggest { input } => cmd_suggest(config, &input).await,
        Commands::Watch { input, org } => cmd_watch(config, input, org).await,
    };
    METRICS.flush();
    result
}

async fn load_input(path: &Path) -> Result<ForestInput> {
    JsonFileSource::new(path)
        .load()
        .await
        .with_context(|| format!("failed to load records from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct TreeOutput<'a> {
    trees: &'a BTreeMap<String, RepoTree>,
    warnings: &'a [StructuralWarning],
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a RefreshReport>,
}

async fn cmd_tree(config: &OrbConfig, input: &Path, format: Format) -> Result<()> {
    let records = load_input(input).await?;
    let outcome = orbtree_core::build_forest_with_default(&records, &config.default_branch)
        .context("failed to reconcile records")?;
    info!(
        repos = outcome.forest.trees.len(),
        workspaces = outcome.forest.workspace_count(),
        warnings = outcome.warnings.len(),
        default_branch = %config.default_branch,
        "reconciled"
    );
    match format {
        Format::Text => print!("{}", render_text(&outcome.forest, &outcome.warnings)),
        Format::Json => print_json(&TreeOutput {
            trees: &outcome.forest.trees,
            warnings: &outcome.warnings,
            report: None,
        })?,
    }
    Ok(())
}

fn gh_source(config: &OrbConfig, org: Option<String>) -> Result<GhRecordSource> {
    let organization = org.unwrap_or_else(|| config.organization.clone());
    if organization.trim().is_empty() {
        bail!("no organization given: pass --org, set ORBTREE_ORG, or set `organization` in the config");
    }
    let runner = GhRunner::new().with_timeout(config.ci_cache.fetch_timeout());
    Ok(GhRecordSource::new(organization, config.repo_filter())
        .with_runner(runner)
        .with_default_branch(config.default_branch.clone())
        .with_commits(config.fetch_commits))
}

async fn cmd_fetch(
    config: OrbConfig,
    org: Option<String>,
    output: Option<&Path>,
    raw: bool,
    no_ci: bool,
    no_commits: bool,
) -> Result<()> {
    let started = Instant::now();
    let source = gh_source(&config, org)?.with_commits(config.fetch_commits && !no_commits);
    let organization = source.organization().to_string();
    info!(org = %organization, "fetching organization data");

    let fetched = source.fetch().await.context("failed to fetch records via gh")?;
    let stale_minutes = config.stale_minutes;

    let rendered = if raw {
        serde_json::to_string_pretty(&fetched.input)?
    } else {
        let reconciler = Reconciler::from_config(config)?;
        let outcome = reconciler.build_forest(&fetched.input)?;
        let mut forest = outcome.forest;
        if !no_ci {
            let report = reconciler.refresh_ci(&forest, RefreshMode::Normal).await;
            info!(
                fetched = report.fetched.len(),
                deferred = report.deferred,
                "CI refresh finished"
            );
            reconciler.enrich(&mut forest).await;
        }
        ForestDocument::new(
            organization,
            forest,
            outcome.warnings,
            fetched.repos_considered,
            chrono::Utc::now(),
            started.elapsed(),
            stale_minutes,
        )
        .to_json_pretty()?
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "data written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn cmd_refresh(
    config: OrbConfig,
    input: &Path,
    force: bool,
    budget: Option<usize>,
    format: Format,
) -> Result<()> {
    let records = load_input(input).await?;
    let reconciler = Reconciler::from_config(config)?;
    let outcome = reconciler.build_forest(&records)?;
    let mut forest = outcome.forest;

    let mode = if force {
        RefreshMode::Forced
    } else {
        RefreshMode::Normal
    };
    let budget = budget.unwrap_or_else(|| reconciler.ci_cache().max_requests_per_cycle());
    let report = reconciler
        .refresh_ci_with_budget(&forest, mode, budget)
        .await;
    reconciler.enrich(&mut forest).await;

    match format {
        Format::Text => {
            println!(
                "refreshed {} of {} PRs ({} failed, {} deferred)\n",
                report.fetched.len(),
                report.tracked,
                report.failed_count(),
                report.deferred
            );
            print!("{}", render_text(&forest, &outcome.warnings));
        }
        Format::Json => print_json(&TreeOutput {
            trees: &forest.trees,
            warnings: &outcome.warnings,
            report: Some(&report),
        })?,
    }
    Ok(())
}

async fn cmd_suggest(config: OrbConfig, input: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let reconciler = Reconciler::from_config(config)?;
    let response = reconciler.suggest_from_json(&raw).await;
    print_json(&response)
}

async fn cmd_watch(config: OrbConfig, input: Option<PathBuf>, org: Option<String>) -> Result<()> {
    let source: Arc<dyn RecordSource> = match input {
        Some(path) => Arc::new(JsonFileSource::new(path)),
        None => Arc::new(gh_source(&config, org)?),
    };
    let interval = config.refresh.interval();
    let reconciler = Arc::new(Reconciler::from_config(config)?);
    let refresh_loop = Arc::new(RefreshLoop::new(reconciler, source, interval));

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = {
        let refresh_loop = Arc::clone(&refresh_loop);
        tokio::spawn(async move { refresh_loop.run(stop_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    let _ = stop_tx.send(true);
    runner.await.context("refresh loop panicked")?;

    let last = refresh_loop.current();
    print!("{}", render_text(&last.forest, &last.warnings));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const RECORDS: &str = r#"{
        "org/app": [
            {"branch": "a", "pr_number": 1, "ci_status": "passing"},
            {"branch": "b", "parent_branch": "a", "pr_number": 2}
        ]
    }"#;

    fn records_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("records.json");
        std::fs::write(&path, RECORDS).unwrap();
        path
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_refresh_flags_parse() {
        let cli = Cli::try_parse_from([
            "orbtree", "refresh", "--input", "r.json", "--force", "--budget", "3", "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Refresh {
                force, budget, ..
            } => {
                assert!(force);
                assert_eq!(budget, Some(3));
            }
            _ => panic!("expected refresh"),
        }
    }

    #[test]
    fn test_fetch_flags_parse() {
        let cli =
            Cli::try_parse_from(["orbtree", "fetch", "--org", "acme", "--no-commits"]).unwrap();
        match cli.command {
            Commands::Fetch {
                org,
                no_commits,
                no_ci,
                ..
            } => {
                assert_eq!(org.as_deref(), Some("acme"));
                assert!(no_commits);
                assert!(!no_ci);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[tokio::test]
    async fn test_tree_command_reads_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = records_file(&dir);
        let result = cmd_tree(&OrbConfig::default(), &path, Format::Json).await;
        assert!(result.is_ok(), "tree failed: {:?}", result.err());
    }

    #[tokio::test]
    async fn test_missing_records_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_tree(&OrbConfig::default(), &dir.path().join("nope.json"), Format::Text)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to load records"));
    }

    #[tokio::test]
    async fn test_suggest_without_gateway_still_answers() {
        let dir = tempfile::tempdir().unwrap();
        let path = records_file(&dir);
        let result = cmd_suggest(OrbConfig::default(), &path).await;
        assert!(result.is_ok(), "suggest failed: {:?}", result.err());
    }

    #[test]
    fn test_fetch_requires_organization() {
        let err = gh_source(&OrbConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("no organization"));
        assert!(gh_source(&OrbConfig::default(), Some("acme".to_string())).is_ok());
    }
}
