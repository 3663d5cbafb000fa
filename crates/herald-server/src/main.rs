//! # Herald
//!
//! One binary, three roles:
//!
//! - `herald run` (default): readiness gates, migrations, then starts and
//!   supervises `herald worker` and `herald api` as child processes.
//! - `herald worker`: drains the notification queue.
//! - `herald api`: serves the HTTP API.
//!
//! The exit code tells operators which step failed (see
//! `herald_core::exit_codes`).

use clap::{Parser, Subcommand};
use herald_config::{AppConfig, ConfigLoader};
use herald_core::telemetry::{bootstrap_subscriber, init_logging};
use herald_core::{exit_codes, HeraldResult};
use herald_server::{run_api, run_orchestrator, run_worker, shutdown_signal};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Notification job queue and process supervisor")]
struct Cli {
    /// Directory holding default.toml and environment overrides.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    role: Option<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Role {
    /// Bootstrap dependencies, then supervise the worker and API processes.
    Run,
    /// Process queued jobs.
    Worker,
    /// Serve the HTTP API.
    Api,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "orchestrator"),
            Self::Worker => write!(f, "worker"),
            Self::Api => write!(f, "api"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let role = cli.role.unwrap_or(Role::Run);

    // The loaded config picks the real subscriber; until then use the default
    let loaded = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        ConfigLoader::new(&cli.config_dir)
    });
    let config = match loaded {
        Ok(loader) => loader.into_config(),
        Err(e) => {
            eprintln!("herald: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("herald: {e}");
        std::process::exit(exit_codes::FAILURE);
    }

    let span = info_span!("herald", role = %role, pid = std::process::id());
    let code = run(role, cli.config_dir, config).instrument(span).await;
    std::process::exit(code);
}

async fn run(role: Role, config_dir: PathBuf, config: AppConfig) -> i32 {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.app.environment,
        "Starting Herald"
    );

    match role {
        Role::Run => run_orchestrator(config, &config_dir, shutdown_signal()).await,
        Role::Worker => exit_code(run_worker(&config).await),
        Role::Api => exit_code(run_api(&config).await),
    }
}

fn exit_code(result: HeraldResult<()>) -> i32 {
    match result {
        Ok(()) => {
            info!("Shutdown complete");
            exit_codes::CLEAN
        }
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Process failed");
            e.exit_code()
        }
    }
}
