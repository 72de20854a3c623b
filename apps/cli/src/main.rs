//! Launchpad CLI - launchers for BERT pretraining and CNN classification
//!
//! Resolves flags and config files into run definitions, then drives them on
//! an execution backend.

mod commands;

use clap::{Parser, Subcommand};
use launchpad_core::CliConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{RunContext, bert, cnn, schedule};

/// Launchpad - training job launcher
#[derive(Parser, Debug)]
#[command(
    name = "launchpad-cli",
    author,
    version,
    about = "Launchpad - configure and launch BERT pretraining and CNN classification jobs",
    long_about = "Launchpad builds model-update configs, learning-rate schedules and job definitions from\nlauncher flags, then runs the training loop on an execution backend with periodic snapshots."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (skips ~/.launchpad/config.toml and ./.launchpadrc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Execution backend id
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Seed for the synthetic backend
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print the resolved job definitions as JSON and exit
    #[arg(long = "dry_run", global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run BERT pretraining (masked LM + next sentence prediction)
    Bert(Box<bert::BertArgs>),

    /// Train and validate an image classification CNN
    Cnn(Box<cnn::CnnArgs>),

    /// Print the learning rate a classification run would use
    Schedule(schedule::ScheduleArgs),
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let cli_config = CliConfig::resolve(args.config.as_deref())?;

    // Initialize tracing
    let level = parse_level(args.log_level.as_deref().or(cli_config.log_level.as_deref()).unwrap_or("info"));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = RunContext::new(cli_config, args.backend, args.seed, args.dry_run);
    tracing::debug!(backend = %ctx.backend_id, seed = ctx.seed, "configuration resolved");

    match args.command {
        Command::Bert(bert_args) => bert::execute(*bert_args, &ctx).await,
        Command::Cnn(cnn_args) => cnn::execute(*cnn_args, &ctx).await,
        Command::Schedule(schedule_args) => schedule::execute(&schedule_args),
    }
}
