use super::open_repository;
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use shardsnap_core::archive::restore_snapshot;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Snapshot ID (or unique prefix) to restore from")]
    snapshot: String,

    #[arg(help = "Target directory for restore")]
    target: PathBuf,

    #[arg(help = "Specific paths to restore")]
    paths: Vec<String>,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repository = open_repository(cli, config).await?;

        info!("Loading snapshot: {}", self.snapshot);
        let (_, snapshot) = repository.find_snapshot(&self.snapshot).await?;

        println!("Restoring snapshot: {}", snapshot.id);
        println!("Created: {}", snapshot.date.format("%Y-%m-%d %H:%M:%S UTC"));
        if !snapshot.description.is_empty() {
            println!("Description: {}", snapshot.description);
        }
        println!("Target: {}", self.target.display());

        let outcome = restore_snapshot(&repository, &snapshot, &self.target, &self.paths).await?;

        println!("Restored: {}", outcome.stats);
        for (path, error) in &outcome.failures {
            println!("'{path}': failed to restore: {error}");
        }
        Ok(())
    }
}
