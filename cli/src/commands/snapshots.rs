use super::open_repository;
use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use shardsnap_core::snapshot::{Snapshot, size_to_string};
use tracing::warn;

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(help = "Only list snapshots of this volume (id or name)")]
    volume: Option<String>,

    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(long, help = "Show latest N snapshots per volume")]
    latest: Option<usize>,
}

impl SnapshotsCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repository = open_repository(cli, config).await?;
        let format = self.format.as_deref().unwrap_or("table");
        if !matches!(format, "table" | "json") {
            return Err(anyhow!("Unsupported format: {}", format));
        }

        let volumes = match &self.volume {
            Some(volume) => vec![repository.find_volume(volume)?],
            None => repository.volumes().iter().collect(),
        };

        let mut listing: Vec<(String, Vec<Snapshot>)> = Vec::new();
        for volume in volumes {
            let mut snapshots = Vec::new();
            for id in &volume.snapshots {
                match repository.load_snapshot(id).await {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => warn!("Failed to load snapshot {}: {}", id, e),
                }
            }
            if let Some(latest) = self.latest {
                let skip = snapshots.len().saturating_sub(latest);
                snapshots.drain(..skip);
            }
            listing.push((volume.name.clone(), snapshots));
        }

        if format == "json" {
            let json: serde_json::Map<String, serde_json::Value> = listing
                .into_iter()
                .map(|(name, snapshots)| Ok((name, serde_json::to_value(snapshots)?)))
                .collect::<Result<_>>()?;
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }

        for (name, snapshots) in listing {
            println!("Volume {name}");
            println!(
                "{:<10} {:<20} {:>8} {:>12} {:>12} {}",
                "ID", "Date", "Files", "Original", "Storage", "Description"
            );
            println!("{:-<90}", "");
            for snapshot in snapshots {
                println!(
                    "{:<10} {:<20} {:>8} {:>12} {:>12} {}",
                    snapshot.id,
                    snapshot.date.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.stats.files,
                    size_to_string(snapshot.stats.size),
                    size_to_string(snapshot.stats.storage_size),
                    snapshot.description
                );
            }
            println!();
        }
        Ok(())
    }
}
