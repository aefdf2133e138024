pub mod cat;
pub mod info;
pub mod init;
pub mod restore;
pub mod snapshots;
pub mod store;
pub mod volume;

use crate::Cli;
use crate::config::Config;
use anyhow::{Result, anyhow};
use shardsnap_core::storage::Storage;
use shardsnap_core::{Error, Repository};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

/// Locations from `--repo`, or from the aliased config entry.
pub fn repository_urls(cli: &Cli, config: &Config) -> Result<Vec<String>> {
    if !cli.repo.is_empty() {
        return Ok(cli.repo.clone());
    }
    if let Some(alias) = cli.alias.as_deref() {
        let repository = config
            .repository(Some(alias))
            .ok_or_else(|| anyhow!("Unknown repository alias '{alias}'"))?;
        if !repository.urls.is_empty() {
            return Ok(repository.urls.clone());
        }
    }
    Err(anyhow!(
        "Repository location required (--repo, SHARDSNAP_REPO or --alias)"
    ))
}

pub fn open_backends(cli: &Cli, config: &Config) -> Result<Vec<Arc<dyn Storage>>> {
    let urls = repository_urls(cli, config)?;
    Ok(shardsnap_backends::open_backends(&urls)?)
}

pub fn prompt_password(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    rpassword::read_password().map_err(|e| anyhow!("Failed to read password: {e}"))
}

/// Opens the repository, prompting for a password only when it turns out
/// to be encrypted and none was given.
pub async fn open_repository(cli: &Cli, config: &Config) -> Result<Repository> {
    let backends = open_backends(cli, config)?;
    info!("Opening repository at {} locations", backends.len());

    if let Some(password) = cli.password.as_deref() {
        return Ok(Repository::open(backends, Some(password)).await?);
    }
    match Repository::open(backends.clone(), None).await {
        Err(Error::InvalidPassword) => {
            let password = prompt_password("Enter repository password: ")?;
            Ok(Repository::open(backends, Some(&password)).await?)
        }
        result => Ok(result?),
    }
}
