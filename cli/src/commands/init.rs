use super::{open_backends, prompt_password, repository_urls};
use crate::config::{Config, RepositoryConfig};
use anyhow::{Result, anyhow};
use clap::Args;
use shardsnap_core::{Compression, Encryption, Repository, StoreDefaults};
use tracing::info;

#[derive(Args)]
pub struct InitCommand {
    #[arg(short, long, help = "Default compression: none, flate, gzip, lzma, zlib, zstd")]
    compression: Option<String>,

    #[arg(short, long, help = "Default encryption: aes, none")]
    encryption: Option<String>,

    #[arg(short, long, default_value_t = 0, help = "Default failure tolerance against n backend failures")]
    tolerance: usize,

    #[arg(long, help = "Remember the locations under this alias in the config file")]
    save_alias: Option<String>,
}

impl InitCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let defaults = StoreDefaults {
            compression: self.compression.as_deref().unwrap_or_default().parse::<Compression>()?,
            encryption: self.encryption.as_deref().unwrap_or_default().parse::<Encryption>()?,
            tolerance: self.tolerance,
        };

        let password = match (&cli.password, defaults.encryption) {
            (Some(password), _) => Some(password.clone()),
            (None, Encryption::None) => None,
            (None, Encryption::Aes) => {
                let password = prompt_password("Enter a password for the new repository: ")?;
                let confirm = prompt_password("Confirm password: ")?;
                if password != confirm {
                    return Err(anyhow!("Passwords do not match"));
                }
                Some(password)
            }
        };

        let urls = repository_urls(cli, config)?;
        info!("Initializing repository at: {}", urls.join(", "));
        let backends = open_backends(cli, config)?;
        let repository = Repository::init(backends, password.as_deref(), defaults.clone()).await?;

        println!("Created new repository {} at:", repository.config().id);
        for location in repository.backends().locations() {
            println!("  {location}");
        }
        println!(
            "Defaults: compression {}, encryption {}, tolerance {}",
            defaults.compression, defaults.encryption, defaults.tolerance
        );

        if let Some(alias) = &self.save_alias {
            let mut config = Config::load(cli.config.as_deref())?;
            config.repositories.insert(
                alias.clone(),
                RepositoryConfig {
                    urls,
                    ..Default::default()
                },
            );
            let path = config.save(cli.config.as_deref())?;
            println!("Saved alias '{}' to {}", alias, path.display());
        }
        Ok(())
    }
}
