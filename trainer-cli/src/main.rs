mod commands;
mod console;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use commands::config::ConfigArgs;
use commands::relay::RelayArgs;
use commands::run::RunArgs;
use commands::validate::ValidateArgs;
use commands::worker::WorkerArgs;

/// Configure, validate and run training pipelines
#[derive(Parser, Debug)]
#[command(name = "trainer", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline against a worker
    Run(RunArgs),

    /// Check the pipeline config without running it
    Validate(ValidateArgs),

    /// Show or edit the stored pipeline config
    Config(ConfigArgs),

    /// Run a relay hop in front of a worker
    Relay(RelayArgs),

    /// Run a worker that executes scripts locally
    Worker(WorkerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args).await,
        Command::Config(args) => commands::config::execute(args).await,
        Command::Relay(args) => commands::relay::execute(args).await,
        Command::Worker(args) => commands::worker::execute(args).await,
    }
}
