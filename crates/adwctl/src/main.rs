//! adwctl - pipeline driver and operator CLI.
//!
//! `adwctl run` executes one workflow against one issue and exits 0 on
//! success. The remaining subcommands are thin operator shells over the
//! artifact store, the step registry, and the issue store.

use adw_core::{config, paths, AdwId, ArtifactKind, ArtifactStore, IssueStore, WorkflowKind};
use adwctl::registry::get_step_registry;
use adwctl::runner::PipelineRunner;
use adwctl::{notify::Notifier, run_pipeline, AppResult, RunOptions};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// ADW pipeline driver and operator CLI.
#[derive(Parser)]
#[command(name = "adwctl")]
#[command(about = "Autonomous development workflow pipeline driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workflow pipeline against an issue
    Run {
        /// Workflow id (generated when omitted; patch runs derive theirs
        /// from the parent workflow)
        #[arg(long)]
        adw_id: Option<String>,

        /// Workflow type: main, patch, or codereview
        #[arg(long, default_value = "main")]
        workflow_type: String,

        /// Issue id (optional for codereview)
        issue_id: Option<i64>,
    },

    /// Inspect persisted workflow artifacts
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommand,
    },

    /// Inspect the step registry
    Step {
        #[command(subcommand)]
        command: StepCommand,
    },

    /// Issue store utilities
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum ArtifactCommand {
    /// List artifacts present for a workflow
    List { adw_id: String },
    /// Print an artifact's JSON
    Show {
        adw_id: String,
        artifact_type: String,
    },
    /// Delete an artifact file
    Delete {
        adw_id: String,
        artifact_type: String,
    },
    /// List all artifact types
    Types,
    /// Print the path an artifact is stored at
    Path {
        adw_id: String,
        artifact_type: String,
    },
}

#[derive(Subcommand)]
enum StepCommand {
    /// List registered steps
    List,
    /// Show the resolved dependency order for a step (by slug or name)
    Deps { step: String },
    /// Validate the step dependency graph
    Validate,
    /// Run a single step by slug, resuming from stored artifacts
    Run {
        slug: String,
        #[arg(long)]
        adw_id: String,
        issue_id: Option<i64>,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Check connectivity to the issue store
    Status,
}

fn parse_artifact_kind(value: &str) -> AppResult<ArtifactKind> {
    ArtifactKind::parse(value)
        .ok_or_else(|| eyre::eyre!("unknown artifact type: {value} (see `adwctl artifact types`)"))
}

fn open_store(adw_id: &str) -> AppResult<ArtifactStore> {
    let base = paths::workflows_dir(&config::data_dir());
    Ok(ArtifactStore::open(
        &base,
        AdwId::from_string(adw_id),
        None,
    )?)
}

fn artifact_command(command: ArtifactCommand) -> AppResult<()> {
    match command {
        ArtifactCommand::List { adw_id } => {
            let store = open_store(&adw_id)?;
            for kind in store.list() {
                let info = store.info(kind);
                let size = info.map_or(0, |i| i.size_bytes);
                println!("{kind}  ({size} bytes)");
            }
        }
        ArtifactCommand::Show {
            adw_id,
            artifact_type,
        } => {
            let kind = parse_artifact_kind(&artifact_type)?;
            let store = open_store(&adw_id)?;
            let artifact = store.read(kind)?;
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
        ArtifactCommand::Delete {
            adw_id,
            artifact_type,
        } => {
            let kind = parse_artifact_kind(&artifact_type)?;
            let store = open_store(&adw_id)?;
            if store.delete(kind)? {
                println!("deleted {kind}");
            } else {
                println!("{kind} not present");
            }
        }
        ArtifactCommand::Types => {
            for kind in adw_core::ALL_ARTIFACT_KINDS {
                let shared = if kind.is_shared() { "shared" } else { "local" };
                println!("{kind}  [{shared}]");
            }
        }
        ArtifactCommand::Path {
            adw_id,
            artifact_type,
        } => {
            let kind = parse_artifact_kind(&artifact_type)?;
            let dir = paths::workflow_dir(&config::data_dir(), &AdwId::from_string(adw_id.as_str()));
            println!("{}", dir.join(format!("{kind}.json")).display());
        }
    }
    Ok(())
}

async fn step_command(command: StepCommand) -> AppResult<()> {
    let registry = get_step_registry();
    match command {
        StepCommand::List => {
            for metadata in registry.list_steps() {
                let criticality = if metadata.is_critical {
                    "critical"
                } else {
                    "best-effort"
                };
                println!(
                    "{:<18} {:<38} [{criticality}] {}",
                    metadata.slug, metadata.name, metadata.description
                );
            }
        }
        StepCommand::Deps { step } => {
            let name = registry
                .metadata_by_slug(&step)
                .map(|m| m.name.clone())
                .unwrap_or(step);
            let order = registry.resolve_dependencies(&name)?;
            if order.is_empty() {
                println!("{name}: no upstream steps");
            } else {
                for (i, upstream) in order.iter().enumerate() {
                    println!("{}. {upstream}", i + 1);
                }
            }
        }
        StepCommand::Validate => {
            let issues = registry.validate();
            if issues.is_empty() {
                println!("step registry is healthy");
            } else {
                for issue in &issues {
                    println!("issue: {issue}");
                }
                eyre::bail!("step registry validation found {} issue(s)", issues.len());
            }
        }
        StepCommand::Run {
            slug,
            adw_id,
            issue_id,
        } => {
            let metadata = registry
                .metadata_by_slug(&slug)
                .ok_or_else(|| eyre::eyre!("unknown step slug: {slug}"))?;
            let has_dependencies = !metadata.dependencies.is_empty();
            let step_name = metadata.name.clone();

            let issue_store = IssueStore::from_env().ok().map(Arc::new);
            let notifier = Arc::new(Notifier::new(
                issue_store.as_ref().map(|s| (**s).clone()),
            ));
            let runner = PipelineRunner::new(vec![(metadata.factory)()]);
            let mut context = PipelineRunner::create_context(
                issue_id,
                AdwId::from_string(adw_id.as_str()),
                None,
                issue_store,
                notifier,
            )?;

            let ok = runner
                .run_single_step(&step_name, &mut context, has_dependencies)
                .await?;
            if !ok {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn db_command(command: DbCommand) -> AppResult<()> {
    match command {
        DbCommand::Status => {
            let store = IssueStore::from_env()?;
            store.ping().await?;
            println!("issue store reachable");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> AppResult<()> {
    match cli.command {
        Command::Run {
            adw_id,
            workflow_type,
            issue_id,
        } => {
            let kind = WorkflowKind::parse(&workflow_type)
                .ok_or_else(|| eyre::eyre!("unknown workflow type: {workflow_type}"))?;
            let options = RunOptions {
                issue_id,
                adw_id: adw_id.map(AdwId::from_string),
                kind,
            };
            let ok = run_pipeline(options).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Artifact { command } => artifact_command(command),
        Command::Step { command } => step_command(command).await,
        Command::Db { command } => db_command(command).await,
    }
}

fn main() {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run(cli)) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
