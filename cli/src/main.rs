mod commands;
mod config;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use commands::{
    cat::CatCommand, info::InfoCommand, init::InitCommand, restore::RestoreCommand,
    snapshots::SnapshotsCommand, store::StoreCommand, volume::VolumeCommand,
};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "shardsnap",
    about = "Deduplicating, encrypted backups spread over several storage backends",
    long_about = "Shardsnap splits files into content-defined chunks, deduplicates them, and \
                  erasure-codes every chunk across all repository locations so the backup \
                  survives the loss of up to --tolerance backends"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short,
        long,
        env = "SHARDSNAP_REPO",
        value_delimiter = ',',
        global = true,
        help = "Repository location (repeat or comma-separate for several backends)"
    )]
    repo: Vec<String>,

    #[arg(short, long, env = "SHARDSNAP_PASSWORD", global = true, help = "Repository password")]
    password: Option<String>,

    #[arg(short = 'R', long, global = true, help = "Repository alias from the config file")]
    alias: Option<String>,

    #[arg(long, env = "SHARDSNAP_CONFIG", global = true, help = "Config file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize a new repository")]
    Init(InitCommand),

    #[command(about = "Manage volumes")]
    Volume(VolumeCommand),

    #[command(about = "Store files/directories as a new snapshot")]
    Store(StoreCommand),

    #[command(about = "Print a file from a snapshot on standard output")]
    Cat(CatCommand),

    #[command(about = "Restore a snapshot to a directory")]
    Restore(RestoreCommand),

    #[command(about = "List snapshots")]
    Snapshots(SnapshotsCommand),

    #[command(about = "Show repository and backend statistics")]
    Info(InfoCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;
    let config = config::Config::load(cli.config.as_deref())?;
    debug!("Loaded {} configured repositories", config.repositories.len());

    match cli.command {
        Commands::Init(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Volume(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Store(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Cat(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Restore(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Snapshots(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Info(ref cmd) => cmd.run(&cli, &config).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "shardsnap={level},shardsnap_core={level},shardsnap_backends={level}"
        ))
    });
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Setting default subscriber failed: {e}"))
}
