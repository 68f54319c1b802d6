//! Playback analytics service
//!
//! `serve` runs ingestion and the HTTP surface in one process;
//! `checkpoint` inspects checkpoint files offline.

mod commands;

use clap::{Parser, Subcommand};
use commands::{CheckpointCommand, ServeCommand};
use playback_config::{LogFormat, ObservabilityConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "playback-analytics",
    version,
    about = "Windowed playback analytics over a partitioned event log"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ingestion and the query API
    #[command(name = "serve")]
    Serve(ServeCommand),

    /// Inspect or verify checkpoint files
    #[command(name = "checkpoint")]
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Serve(command) => command.execute(init_tracing).await,
        Commands::Checkpoint { command } => {
            init_tracing(&ObservabilityConfig::default());
            command.execute().await
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    match observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
