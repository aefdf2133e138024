use super::open_repository;
use crate::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use shardsnap_core::snapshot::Volume;
use tracing::info;

#[derive(Args)]
pub struct VolumeCommand {
    #[command(subcommand)]
    action: VolumeAction,
}

#[derive(Subcommand)]
enum VolumeAction {
    #[command(about = "Create a new volume")]
    Init {
        #[arg(help = "Volume name")]
        name: String,

        #[arg(short, long, default_value = "", help = "A description or comment for this volume")]
        desc: String,
    },

    #[command(about = "List all volumes")]
    List,
}

impl VolumeCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let mut repository = open_repository(cli, config).await?;

        match &self.action {
            VolumeAction::Init { name, desc } => {
                let id = repository.add_volume(Volume::new(name.clone(), desc.clone()));
                repository.save().await?;
                info!("Created volume {} ({})", id, name);
                println!("Volume {id} ({name}) created");
            }
            VolumeAction::List => {
                println!("{:<10} {:<20} {:<10} {}", "ID", "Name", "Snapshots", "Description");
                println!("{:-<70}", "");
                for volume in repository.volumes() {
                    println!(
                        "{:<10} {:<20} {:<10} {}",
                        volume.id,
                        volume.name,
                        volume.snapshots.len(),
                        volume.description
                    );
                }
            }
        }
        Ok(())
    }
}
