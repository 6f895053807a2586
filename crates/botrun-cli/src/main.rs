//! botrun CLI - local runtime manager for multi-bot workspaces
//!
//! Usage:
//!   botrun init                 Write a default .botrun/config.toml
//!   botrun status               Show every project and whether it is listening
//!   botrun start --all          Start skills, then the root bot; Ctrl-C stops them
//!   botrun start <id>           Start one bot; Ctrl-C stops it
//!   botrun run                  Start all bots and follow status changes until Ctrl-C
//!
//! Bots are children of the command that started them and are stopped when
//! it exits.

use anyhow::{bail, Context, Result};
use botrun_core::{BotStatus, WorkspaceConfig};
use botrun_orchestrator::BotOrchestrator;
use botrun_runtime::{ProcessRuntime, StatusBoard, StatusSnapshot};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "botrun")]
#[command(author, version, about = "Start and stop a root bot and its skills in dependency order")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root (defaults to current directory)
    #[arg(short = 'C', long, default_value = ".", global = true)]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default workspace configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show every project and whether its port is answering
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start bots and keep them running until Ctrl-C
    Start(Target),

    /// Start all bots and print every status change until Ctrl-C
    Run,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Every project in the workspace
    #[arg(long)]
    all: bool,

    /// A single project id
    project: Option<String>,
}

/// Everything one CLI invocation needs to drive the workspace
struct Session {
    config: WorkspaceConfig,
    board: StatusBoard,
    runtime: Arc<ProcessRuntime>,
    orchestrator: BotOrchestrator,
}

impl Session {
    fn open(workspace: &Path) -> Result<Self> {
        let config = WorkspaceConfig::load_or_default(workspace)
            .context("Failed to load workspace configuration")?;
        config.validate().context("Invalid workspace configuration")?;

        let board = StatusBoard::from_config(&config);
        let runtime = Arc::new(ProcessRuntime::new(workspace, &config, board.clone()));
        let orchestrator = BotOrchestrator::with_board(runtime.clone(), board.clone())
            .with_completion_callback(|started| {
                if started {
                    info!("All skill start calls issued");
                } else {
                    info!("All bots stopped");
                }
            });

        Ok(Self {
            config,
            board,
            runtime,
            orchestrator,
        })
    }

    fn require_project(&self, project_id: &str) -> Result<()> {
        if self.config.project(project_id).is_none() {
            bail!("No project '{}' in this workspace", project_id);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.workspace, force).await,
        Commands::Status { json } => cmd_status(&cli.workspace, json).await,
        Commands::Start(target) => cmd_start(&cli.workspace, target).await,
        Commands::Run => cmd_run(&cli.workspace).await,
    }
}

async fn cmd_init(workspace: &Path, force: bool) -> Result<()> {
    let config_path = WorkspaceConfig::config_path(workspace);
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let written = WorkspaceConfig::write_default(workspace)
        .context("Failed to write default configuration")?;

    println!("Initialized botrun in {}", workspace.display());
    println!("Created:");
    println!("  {}", written.display());
    println!("\nEdit the project list (root bot first), then run `botrun run`.");
    Ok(())
}

async fn cmd_status(workspace: &Path, json: bool) -> Result<()> {
    let session = Session::open(workspace)?;

    for project in &session.config.projects {
        let Some(port) = project.port else {
            continue;
        };
        if probe_port(port).await {
            session.board.set_status(&project.id, BotStatus::Connected);
        }
    }

    if json {
        let projects: Vec<serde_json::Value> = session
            .config
            .projects
            .iter()
            .map(|project| {
                let state = session.board.runtime_state(&project.id).unwrap_or_default();
                serde_json::json!({
                    "id": project.id,
                    "name": project.display_name(),
                    "port": project.port,
                    "recognizer": project.recognizer.to_string(),
                    "status": state.status.to_string(),
                    "error": state.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    println!("botrun Status");
    println!("=============");
    println!(
        "\n{:<20} {:<24} {:<7} {:<10} {:<12} ERROR",
        "PROJECT", "NAME", "PORT", "RECOGNIZER", "STATUS"
    );
    for (index, project) in session.config.projects.iter().enumerate() {
        let state = session.board.runtime_state(&project.id).unwrap_or_default();
        let id = if index == 0 {
            format!("{} (root)", project.id)
        } else {
            project.id.clone()
        };
        println!(
            "{:<20} {:<24} {:<7} {:<10} {:<12} {}",
            id,
            project.display_name(),
            project
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            project.recognizer.to_string(),
            state.status.to_string(),
            state.error.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

async fn cmd_start(workspace: &Path, target: Target) -> Result<()> {
    let session = Session::open(workspace)?;

    match &target.project {
        Some(project_id) if !target.all => {
            session.require_project(project_id)?;
            println!("Starting {}...", project_id);
            session
                .orchestrator
                .start_single_bot(project_id)
                .await
                .with_context(|| format!("Failed to start {}", project_id))?;
        }
        _ => {
            println!(
                "Starting {} skill(s), then the root bot...",
                session.config.skills().len()
            );
            if let Err(e) = session.orchestrator.start_all_bots().await {
                session.orchestrator.stop_all_bots().await;
                return Err(e).context("Failed to start all bots");
            }
        }
    }

    println!("Press Ctrl-C to stop.");
    serve(&session, false).await?;

    println!("\nStopping all bots...");
    session.orchestrator.stop_all_bots().await;
    Ok(())
}

async fn cmd_run(workspace: &Path) -> Result<()> {
    let session = Session::open(workspace)?;

    let starting = tokio::spawn({
        let orchestrator = session.orchestrator.clone();
        async move { orchestrator.start_all_bots().await }
    });

    println!("Starting all bots, Ctrl-C to stop.");
    serve(&session, true).await?;

    println!("\nStopping all bots...");
    session.orchestrator.stop_all_bots().await;

    match starting.await {
        Ok(Err(e)) if e.is_cancelled() => debug!("Start interrupted: {}", e),
        Ok(Err(e)) => warn!("Start of all bots failed: {}", e),
        Ok(Ok(())) => {}
        Err(e) => warn!("Start task ended abnormally: {}", e),
    }
    Ok(())
}

/// Wait for Ctrl-C, reaping exited bots and optionally printing every
/// status change
async fn serve(session: &Session, follow: bool) -> Result<()> {
    let mut statuses = session.board.subscribe();
    let mut last = statuses.borrow_and_update().clone();
    let mut reap = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
            changed = statuses.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = statuses.borrow_and_update().clone();
                if follow {
                    print_changes(&session.config, &last, &current);
                }
                last = current;
            }
            _ = reap.tick() => {
                let running = session.runtime.running().await;
                debug!("{} bot process(es) running", running.len());
            }
        }
    }
}

fn print_changes(config: &WorkspaceConfig, before: &StatusSnapshot, after: &StatusSnapshot) {
    for project in &config.projects {
        let Some(status) = after.get(&project.id) else {
            continue;
        };
        if before.get(&project.id) != Some(status) {
            println!("  {:<20} {}", project.id, status);
        }
    }
}

async fn probe_port(port: u16) -> bool {
    let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
    matches!(
        tokio::time::timeout(Duration::from_millis(300), connect).await,
        Ok(Ok(_))
    )
}
