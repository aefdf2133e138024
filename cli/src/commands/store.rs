use super::open_repository;
use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use shardsnap_core::shutdown::Shutdown;
use shardsnap_core::snapshot::size_to_string;
use shardsnap_core::store::{Progress, SnapshotBuilder, StoreOptions};
use shardsnap_core::{Compression, Encryption, Error};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

const PROGRESS_QUEUE_DEPTH: usize = 64;

#[derive(Args)]
pub struct StoreCommand {
    #[arg(help = "Volume to create the snapshot in (id or name)")]
    volume: String,

    #[arg(required = true, help = "Files and/or directories to store")]
    paths: Vec<PathBuf>,

    #[arg(short, long, default_value = "", help = "A description or comment for this snapshot")]
    desc: String,

    #[arg(short, long, help = "Compression algo to use: none (default), flate, gzip, lzma, zlib, zstd")]
    compression: Option<String>,

    #[arg(short, long, help = "Encryption algo to use: aes (default), none")]
    encryption: Option<String>,

    #[arg(short, long, help = "Failure tolerance against n backend failures")]
    tolerance: Option<usize>,

    #[arg(short = 'x', long = "excludes", help = "Exclude pattern (gitignore syntax, repeatable)")]
    excludes: Vec<String>,

    #[arg(long, help = "Exit on first error")]
    pedantic: bool,

    #[arg(long, default_value_t = 4, help = "Files stored concurrently")]
    concurrency: usize,
}

impl StoreCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let shutdown = Shutdown::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.trigger().await;
            }
        });

        let cwd = std::env::current_dir()?;
        let targets: Vec<PathBuf> = self
            .paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
            .collect();

        // Opening the repository must not be interrupted half way.
        info!("Acquiring shutdown lock");
        let Some(lock) = shutdown.lock().await else {
            return Ok(());
        };
        let mut repository = open_repository(cli, config).await?;
        let volume_id = repository.find_volume(&self.volume)?.id.clone();
        let options = self.options(cwd, targets, &repository.config().defaults, config, cli)?;
        let builder = SnapshotBuilder::new(&repository, options)?;
        drop(lock);
        info!("Shutdown lock released");

        let (tx, rx) = mpsc::channel(PROGRESS_QUEUE_DEPTH);
        let renderer = tokio::spawn(render_progress(rx, cli.quiet));
        let result = builder.with_progress(tx).run(shutdown.token()).await;
        let _ = renderer.await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                println!("Aborting...");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Persisting the snapshot must not be interrupted half way.
        info!("Acquiring another shutdown lock");
        let Some(lock) = shutdown.lock().await else {
            return Ok(());
        };
        repository.commit_snapshot(&volume_id, &outcome.snapshot).await?;
        drop(lock);

        println!(
            "\nSnapshot {} created: {}",
            outcome.snapshot.id, outcome.snapshot.stats
        );
        for (path, error) in &outcome.failures {
            println!("'{path}': failed to store: {error}");
        }
        Ok(())
    }

    /// Flags win over the aliased config entry, which wins over the
    /// repository defaults.
    fn options(
        &self,
        cwd: PathBuf,
        targets: Vec<PathBuf>,
        defaults: &shardsnap_core::StoreDefaults,
        config: &Config,
        cli: &crate::Cli,
    ) -> Result<StoreOptions> {
        let configured = config.repository(cli.alias.as_deref()).cloned().unwrap_or_default();
        let mut options = StoreOptions::new(cwd, targets, defaults);
        options.description = self.desc.clone();

        if let Some(name) = self.compression.as_ref().or(configured.compression.as_ref()) {
            options.compression = name.parse::<Compression>()?;
        }
        if let Some(name) = self.encryption.as_ref().or(configured.encryption.as_ref()) {
            options.encryption = name.parse::<Encryption>()?;
        }
        if let Some(tolerance) = self.tolerance.or(configured.tolerance) {
            options.tolerance = tolerance;
        }
        options.excludes = if self.excludes.is_empty() {
            configured.excludes
        } else {
            self.excludes.clone()
        };
        options.pedantic = self.pedantic || configured.pedantic.unwrap_or(false);
        if self.concurrency == 0 {
            return Err(anyhow!("--concurrency must be at least 1"));
        }
        options.concurrency = self.concurrency;
        Ok(options)
    }
}

/// Draws one bar for the current file and one for the whole run.
async fn render_progress(mut rx: mpsc::Receiver<Progress>, quiet: bool) {
    let bars = MultiProgress::new();
    if quiet {
        bars.set_draw_target(ProgressDrawTarget::hidden());
    }
    let file_bar = bars.add(ProgressBar::new(0));
    let overall_bar = bars.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::with_template("{msg:40!} {bar:40.cyan/blue} {bytes:>10} {bytes_per_sec:>12}") {
        file_bar.set_style(style);
    }
    if let Ok(style) = ProgressStyle::with_template("{bytes_per_sec:>12} {bar:60.green/white} {msg}") {
        overall_bar.set_style(style);
    }

    let mut last_path = String::new();
    let mut items = 0u64;
    while let Some(progress) = rx.recv().await {
        if progress.path != last_path {
            if !last_path.is_empty() {
                file_bar.reset();
            }
            items += 1;
            last_path = progress.path.clone();
            file_bar.set_message(progress.path.clone());
        }
        if let Some(error) = &progress.error {
            bars.suspend(|| eprintln!("'{}': {}", progress.path, error));
        }

        file_bar.set_length(progress.current_total);
        file_bar.set_position(progress.current_transferred);

        let stats = progress.stats;
        overall_bar.set_length(progress.total);
        overall_bar.set_position(progress.transferred);
        overall_bar.set_message(format!(
            "{} / {} ({} of {})",
            size_to_string(progress.transferred),
            size_to_string(progress.total),
            items,
            stats.files + stats.dirs + stats.symlinks + stats.errors
        ));
    }

    file_bar.finish_and_clear();
    overall_bar.finish();
}
