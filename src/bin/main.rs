//! Cartograph CLI - drive and inspect extraction runs
//!
//! Usage:
//!   cartograph extract --project <id> --fixture <schema.json>
//!   cartograph status --run <id>
//!   cartograph runs [--project <id>]
//!   cartograph cancel --run <id>
//!   cartograph orphans
//!
//! Examples:
//!   cartograph extract --project shop --fixture demos/shop.json
//!   cartograph status --run 7f2c...

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cartograph::catalog::{FixtureCatalog, FixtureTable};
use cartograph::config::Settings;
use cartograph::llm::ScriptedClient;
use cartograph::pipeline::Orchestrator;
use cartograph::store::{ExtractionStore, RunStatus};

#[derive(Parser)]
#[command(name = "cartograph")]
#[command(about = "Cartograph - semantic ontology extraction for relational schemas")]
#[command(version)]
struct Cli {
    /// Path to a cartograph.toml settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the state database (overrides settings)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full extraction against a fixture schema file
    Extract {
        /// Project identifier
        #[arg(short, long)]
        project: String,

        /// Path to a JSON file of fixture tables with values
        #[arg(short, long)]
        fixture: PathBuf,
    },

    /// Resume an interrupted run against a fixture schema file
    Resume {
        /// Run identifier
        #[arg(short, long)]
        run: String,

        /// Path to a JSON file of fixture tables with values
        #[arg(short, long)]
        fixture: PathBuf,
    },

    /// Show a run's status, per-stage progress and warnings
    Status {
        /// Run identifier
        #[arg(short, long)]
        run: String,
    },

    /// List runs
    Runs {
        /// Filter by project identifier
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Cancel a run
    Cancel {
        /// Run identifier
        #[arg(short, long)]
        run: String,
    },

    /// List runs abandoned by a crashed process
    Orphans,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match Settings::load_or_default(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match open_store(&cli, &settings) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Extract { project, fixture } => cmd_extract(store, settings, &project, &fixture),
        Commands::Resume { run, fixture } => cmd_resume(store, settings, &run, &fixture),
        Commands::Status { run } => cmd_status(&store, &run),
        Commands::Runs { project } => cmd_runs(&store, project.as_deref()),
        Commands::Cancel { run } => cmd_cancel(&store, &run),
        Commands::Orphans => cmd_orphans(&store, &settings),
    }
}

fn open_store(cli: &Cli, settings: &Settings) -> Result<ExtractionStore, String> {
    if let Some(db) = &cli.db {
        return ExtractionStore::open_at(db).map_err(|e| e.to_string());
    }
    match settings.resolved_store_path().map_err(|e| e.to_string())? {
        Some(path) => ExtractionStore::open_at(&path).map_err(|e| e.to_string()),
        None => ExtractionStore::open().map_err(|e| e.to_string()),
    }
}

fn load_fixture_catalog(fixture: &PathBuf) -> Result<Arc<FixtureCatalog>, String> {
    let raw = fs::read_to_string(fixture)
        .map_err(|e| format!("cannot read {}: {}", fixture.display(), e))?;
    let tables: Vec<FixtureTable> =
        serde_json::from_str(&raw).map_err(|e| format!("invalid fixture file: {}", e))?;
    Ok(Arc::new(FixtureCatalog::new(tables)))
}

/// Run the orchestrator to completion and print the outcome.
async fn drive_run(orchestrator: &Orchestrator, project: &str, run_id: String) -> ExitCode {
    println!("run {} started", run_id);

    let report = match orchestrator.wait(&run_id).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_report(&report);

    if report.run.status != RunStatus::Completed {
        return ExitCode::FAILURE;
    }

    match orchestrator.relationships(project) {
        Ok(rels) => {
            println!("\n{} relationship(s):", rels.len());
            for rel in rels {
                println!(
                    "  {} -> {}  [{}  confidence {:.2}]",
                    rel.source, rel.target, rel.method, rel.confidence
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_extract(
    store: Arc<ExtractionStore>,
    settings: Settings,
    project: &str,
    fixture: &PathBuf,
) -> ExitCode {
    let catalog = match load_fixture_catalog(fixture) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let llm = Arc::new(ScriptedClient::accepting());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let orchestrator = Orchestrator::new(store, catalog, llm, settings);
        let run_id = match orchestrator.start_run(project) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        drive_run(&orchestrator, project, run_id).await
    })
}

fn cmd_resume(
    store: Arc<ExtractionStore>,
    settings: Settings,
    run_id: &str,
    fixture: &PathBuf,
) -> ExitCode {
    let project = match store.get_run(run_id) {
        Ok(run) => run.project_id,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let catalog = match load_fixture_catalog(fixture) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let llm = Arc::new(ScriptedClient::accepting());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let orchestrator = Orchestrator::new(store, catalog, llm, settings);
        if let Err(e) = orchestrator.resume_run(run_id) {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
        drive_run(&orchestrator, &project, run_id.to_string()).await
    })
}

fn cmd_status(store: &Arc<ExtractionStore>, run_id: &str) -> ExitCode {
    let run = match store.get_run(run_id) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let stages = match store.run_stages(run_id) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("run {}  project={}  status={}", run.id, run.project_id, run.status.as_str());
    if let Some(stage) = &run.current_stage {
        println!("current stage: {}", stage);
    }
    if let Some(error) = &run.error {
        println!("error: {}", error);
    }
    for stage in stages {
        println!(
            "  {:10} {:9} progress={:.0}% retries={}",
            stage.name,
            stage.status.as_str(),
            stage.progress * 100.0,
            stage.retry_count
        );
        for warning in &stage.warnings {
            println!("      warning: {}", warning);
        }
    }
    ExitCode::SUCCESS
}

fn cmd_runs(store: &Arc<ExtractionStore>, project: Option<&str>) -> ExitCode {
    match store.list_runs(project) {
        Ok(runs) => {
            for run in runs {
                println!(
                    "{}  {}  {}  owner={}",
                    run.id,
                    run.project_id,
                    run.status.as_str(),
                    run.owner_id.as_deref().unwrap_or("-")
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_cancel(store: &Arc<ExtractionStore>, run_id: &str) -> ExitCode {
    match store.cancel_run(run_id) {
        Ok(true) => {
            println!("run {} cancelled", run_id);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("run {} is already terminal", run_id);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_orphans(store: &Arc<ExtractionStore>, settings: &Settings) -> ExitCode {
    let threshold = settings.pipeline.orphan_threshold_secs();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    match store.find_orphaned(threshold, now) {
        Ok(orphans) => {
            if orphans.is_empty() {
                println!("no orphaned runs");
            }
            for run in orphans {
                println!(
                    "{}  {}  last_heartbeat={}",
                    run.id,
                    run.project_id,
                    run.last_heartbeat
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_report(report: &cartograph::pipeline::RunStatusReport) {
    println!(
        "run {} finished: {}",
        report.run.id,
        report.run.status.as_str()
    );
    for stage in &report.stages {
        println!("  {:10} {}", stage.name, stage.status.as_str());
        for warning in &stage.warnings {
            println!("      warning: {}", warning);
        }
    }
}
