use super::open_repository;
use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use shardsnap_core::archive::decode_archive;
use tracing::info;

#[derive(Args)]
pub struct CatCommand {
    #[arg(help = "Snapshot ID (or unique prefix)")]
    snapshot: String,

    #[arg(help = "File path as stored in the snapshot")]
    file: String,
}

impl CatCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repository = open_repository(cli, config).await?;

        info!("Finding snapshot {}", self.snapshot);
        let (_, snapshot) = repository.find_snapshot(&self.snapshot).await?;
        info!("Found snapshot {}", snapshot.description);

        let archive = snapshot
            .archive(&self.file)
            .ok_or_else(|| anyhow!("{}: No such file or directory", self.file))?;

        info!("Decoding archive data");
        let mut stdout = tokio::io::stdout();
        let chunks = decode_archive(&repository, archive, &mut stdout).await?;
        info!("Decoded {} chunks", chunks);
        Ok(())
    }
}
