use super::open_repository;
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use shardsnap_core::snapshot::size_to_string;

#[derive(Args)]
pub struct InfoCommand {}

impl InfoCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repository = open_repository(cli, config).await?;
        let repo_config = repository.config();
        let index = repository.chunk_index();

        println!("Repository {}", repo_config.id);
        println!("Created:    {}", repo_config.created.format("%Y-%m-%d %H:%M:%S UTC"));
        println!(
            "Encrypted:  {}",
            if repository.encryptor().is_some() { "yes" } else { "no" }
        );
        println!(
            "Defaults:   compression {}, encryption {}, tolerance {}",
            repo_config.defaults.compression, repo_config.defaults.encryption, repo_config.defaults.tolerance
        );
        println!("Volumes:    {}", repository.volumes().len());
        println!(
            "Chunks:     {} unique, {} references, {} stored",
            index.len(),
            index.total_references(),
            size_to_string(index.storage_size())
        );

        println!("\nBackends:");
        for space in repository.backends().available_space().await {
            let available = space
                .available
                .map(size_to_string)
                .unwrap_or_else(|| "unknown".to_string());
            println!("  {:<50} {} free", space.location, available);
        }
        Ok(())
    }
}
