// crates/dcyfr-daemon/src/main.rs
// dcyfrd - workspace guardian daemon CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use dcyfr_daemon::config::GuardianConfig;
use dcyfr_daemon::daemon::{Daemon, HeartbeatState};
use dcyfr_daemon::registry::ScannerRegistry;
use dcyfr_daemon::{health, logging, scanners, state};
use dcyfr_types::ScanContext;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "dcyfrd", about = "Workspace guardian daemon", version)]
struct Cli {
    /// Workspace root to guard (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground until a termination signal
    Start,
    /// Signal a running daemon to stop
    Stop,
    /// Show daemon liveness and the latest heartbeat
    Status,
    /// Run one scanner immediately and print its result as JSON
    Scan {
        scanner: String,
        /// Restrict the scan to these files
        #[arg(long)]
        files: Vec<PathBuf>,
    },
    /// Scan, then apply auto-fixes for the violations found
    Fix {
        scanner: String,
        /// Report what would change without touching files
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the latest persisted health snapshot
    Health,
    /// List registered scanners
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Start => Level::INFO,
        _ => Level::WARN,
    };
    logging::init_tracing(log_level)?;

    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let config = GuardianConfig::from_env(&workspace);

    match cli.command {
        Commands::Start => {
            let daemon = Daemon::start(config)?;
            daemon.run().await?;
        }
        Commands::Stop => {
            let state_dir = state::StateDir::new(&workspace);
            if Daemon::signal_stop(&state_dir) {
                println!("Stop signal sent");
            } else {
                println!("Daemon is not running");
            }
        }
        Commands::Status => {
            let state_dir = state::StateDir::new(&workspace);
            match Daemon::is_running(&state_dir) {
                Some(pid) => {
                    println!("Daemon running (pid {})", pid);
                    if let Some(heartbeat) =
                        state::read_json::<HeartbeatState>(&state_dir.heartbeat_path())
                    {
                        println!("  uptime: {} s", heartbeat.uptime_ms / 1000);
                        println!("  queued tasks: {}", heartbeat.tasks_queued);
                        println!("  completed tasks: {}", heartbeat.tasks_completed);
                        println!("  memory: {} MB", heartbeat.memory_usage_mb);
                    }
                }
                None => println!("Daemon is not running"),
            }
        }
        Commands::Scan { scanner, files } => {
            let registry = build_registry(&config)?;
            let mut ctx = ScanContext::full(&workspace);
            if !files.is_empty() {
                ctx.files = Some(files);
            }
            let result = registry.run(&scanner, &ctx).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Fix { scanner, dry_run } => {
            let registry = build_registry(&config)?;
            let mut ctx = ScanContext::full(&workspace);
            ctx.dry_run = dry_run;
            let scan = registry.run(&scanner, &ctx).await?;
            let fix = registry.run_fix(&scanner, &ctx, &scan.violations).await?;
            println!("{}", serde_json::to_string_pretty(&fix)?);
        }
        Commands::Health => {
            let state_dir = state::StateDir::new(&workspace);
            match health::load_snapshot(&state_dir.health_path()) {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("No health snapshot recorded yet"),
            }
        }
        Commands::List => {
            let registry = build_registry(&config)?;
            for scanner in registry.list() {
                println!(
                    "{:<22} {:<14} {}",
                    scanner.id(),
                    format!("{:?}", scanner.category()).to_lowercase(),
                    scanner.description()
                );
            }
        }
    }

    Ok(())
}

fn build_registry(config: &GuardianConfig) -> Result<ScannerRegistry> {
    let mut registry = ScannerRegistry::new();
    for scanner in scanners::builtin(config) {
        registry.register(scanner)?;
    }
    Ok(registry)
}
