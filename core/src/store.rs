use crate::backend_manager::BackendManager;
use crate::chunker::{Chunk, Chunker, ChunkerConfig};
use crate::codec::ChunkCodec;
use crate::index::ChunkIndex;
use crate::snapshot::{Archive, ArchiveType, ChunkRef, Snapshot, Stats};
use crate::{Compression, Encryption, Error, Repository, Result, StoreDefaults};
use futures::stream::{self, StreamExt};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Chunks buffered between the blocking reader and the async writer.
const CHUNK_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Archive paths are recorded relative to this directory when possible.
    pub cwd: PathBuf,
    pub paths: Vec<PathBuf>,
    /// Gitignore-style patterns, matched relative to `cwd`.
    pub excludes: Vec<String>,
    pub description: String,
    pub compression: Compression,
    pub encryption: Encryption,
    /// Number of backends that may fail without losing data.
    pub tolerance: usize,
    /// Abort on the first per-file error instead of recording it.
    pub pedantic: bool,
    pub chunker: ChunkerConfig,
    /// Files processed at the same time.
    pub concurrency: usize,
}

impl StoreOptions {
    pub fn new(cwd: impl Into<PathBuf>, paths: Vec<PathBuf>, defaults: &StoreDefaults) -> Self {
        Self {
            cwd: cwd.into(),
            paths,
            excludes: Vec::new(),
            description: String::new(),
            compression: defaults.compression,
            encryption: defaults.encryption,
            tolerance: defaults.tolerance,
            pedantic: false,
            chunker: ChunkerConfig::default(),
            concurrency: 4,
        }
    }
}

/// Emitted after each chunk and each non-file entry.
#[derive(Debug, Clone)]
pub struct Progress {
    pub error: Option<String>,
    pub path: String,
    /// Plaintext bytes of the current item processed so far.
    pub current_transferred: u64,
    pub current_total: u64,
    /// Plaintext bytes processed over the whole run.
    pub transferred: u64,
    pub total: u64,
    pub stats: Stats,
    pub timestamp: Instant,
}

#[derive(Debug)]
pub struct StoreOutcome {
    pub snapshot: Snapshot,
    /// Paths that could not be stored, with the reason.
    pub failures: BTreeMap<String, String>,
}

struct FileItem {
    path: PathBuf,
    archive: Archive,
}

#[derive(Default)]
struct RunState {
    stats: Stats,
    total: u64,
    failures: BTreeMap<String, String>,
}

/// Walks the store targets and pushes every regular file through the
/// chunker, the codec, the chunk index and the backend manager.
pub struct SnapshotBuilder {
    options: StoreOptions,
    codec: ChunkCodec,
    chunker: Chunker,
    index: Arc<ChunkIndex>,
    backends: Arc<BackendManager>,
    excludes: Gitignore,
    state: Mutex<RunState>,
    progress: Option<mpsc::Sender<Progress>>,
}

impl SnapshotBuilder {
    /// Validates the options against the repository before any I/O.
    ///
    /// # Errors
    ///
    /// * `Error::RedundancyAmount` - tolerance is not below the backend count
    /// * `Error::Config` - bad chunker sizes, exclude pattern, or AES without a key
    pub fn new(repository: &Repository, options: StoreOptions) -> Result<Self> {
        let backends = repository.backend_manager();
        let (data_parts, parity_parts) = backends.layout(options.tolerance)?;
        let codec = ChunkCodec::new(
            options.compression,
            options.encryption,
            repository.encryptor(),
            data_parts,
            parity_parts,
        )?;
        let chunker = Chunker::new(options.chunker)?;

        let mut builder = GitignoreBuilder::new(&options.cwd);
        for pattern in &options.excludes {
            builder
                .add_line(None, pattern)
                .map_err(|e| Error::Config(format!("invalid exclude pattern '{pattern}': {e}")))?;
        }
        let excludes = builder
            .build()
            .map_err(|e| Error::Config(format!("invalid exclude patterns: {e}")))?;

        Ok(Self {
            options,
            codec,
            chunker,
            index: repository.chunk_index(),
            backends,
            excludes,
            state: Mutex::new(RunState::default()),
            progress: None,
        })
    }

    /// Progress events are sent on `sender`; the caller must keep draining it.
    pub fn with_progress(mut self, sender: mpsc::Sender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Stores every target and returns the unsaved snapshot.
    ///
    /// Stops before the next file or chunk once `cancel` fires. Shard writes
    /// still in flight are awaited before returning on every path.
    pub async fn run(self, cancel: CancellationToken) -> Result<StoreOutcome> {
        let result = self.store_all(&cancel).await;
        self.backends.flush().await;
        let mut snapshot = result?;

        let state = self.state.into_inner();
        snapshot.stats = state.stats;
        info!("Stored snapshot {}: {}", snapshot.id, snapshot.stats);
        Ok(StoreOutcome {
            snapshot,
            failures: state.failures,
        })
    }

    async fn store_all(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new(self.options.description.clone());
        let files = self.collect(&mut snapshot, cancel).await?;
        info!(
            "Storing {} files with {} data and {} parity shards per chunk",
            files.len(),
            self.codec.data_parts(),
            self.codec.parity_parts()
        );

        let mut stored = stream::iter(files)
            .map(|item| self.store_file(item, cancel))
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some(result) = stored.next().await {
            if let Some(archive) = result? {
                snapshot.add_archive(archive);
            }
        }
        Ok(snapshot)
    }

    /// Walks the targets. Directories and symlinks go straight into the
    /// snapshot; regular files are returned for storing.
    async fn collect(&self, snapshot: &mut Snapshot, cancel: &CancellationToken) -> Result<Vec<FileItem>> {
        let mut files = Vec::new();
        for target in &self.options.paths {
            let root = if target.is_absolute() {
                target.clone()
            } else {
                self.options.cwd.join(target)
            };

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !self.excludes.matched(e.path(), e.file_type().is_dir()).is_ignore());

            for entry in walker {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().unwrap_or(&root).to_path_buf();
                        self.fail(&path, Error::Io(e.into())).await?;
                        continue;
                    }
                };
                let metadata = match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        self.fail(entry.path(), Error::Io(e.into())).await?;
                        continue;
                    }
                };

                let mut archive = self.archive_for(entry.path(), &metadata);
                let file_type = entry.file_type();
                if file_type.is_file() {
                    archive.archive_type = ArchiveType::File;
                    archive.size = metadata.len();
                    self.state.lock().await.total += metadata.len();
                    files.push(FileItem {
                        path: entry.path().to_path_buf(),
                        archive,
                    });
                } else if file_type.is_dir() {
                    self.state.lock().await.stats.dirs += 1;
                    self.emit(None, &archive.path, 0, 0).await;
                    snapshot.add_archive(archive);
                } else if file_type.is_symlink() {
                    match std::fs::read_link(entry.path()) {
                        Ok(points_to) => {
                            archive.archive_type = ArchiveType::Symlink;
                            archive.points_to = Some(points_to.to_string_lossy().into_owned());
                            self.state.lock().await.stats.symlinks += 1;
                            self.emit(None, &archive.path, 0, 0).await;
                            snapshot.add_archive(archive);
                        }
                        Err(e) => self.fail(entry.path(), e.into()).await?,
                    }
                } else {
                    debug!("Skipping special file {}", entry.path().display());
                }
            }
        }
        Ok(files)
    }

    /// Returns `Ok(None)` for a recorded non-fatal failure.
    ///
    /// A file that is not stored gives back the chunk references it took.
    async fn store_file(&self, item: FileItem, cancel: &CancellationToken) -> Result<Option<Archive>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut archive = item.archive;
        let result = self.store_chunks(&mut archive, &item.path, cancel).await;
        if result.is_err() {
            for chunk in &archive.chunks {
                self.index.release(&chunk.id).await;
            }
        }

        match result {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.stats.files += 1;
                state.stats.size += archive.size;
                debug!("Stored {} ({} chunks)", archive.path, archive.chunks.len());
                Ok(Some(archive))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                self.fail(&item.path, e).await?;
                Ok(None)
            }
        }
    }

    async fn store_chunks(&self, archive: &mut Archive, path: &Path, cancel: &CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Result<Chunk>>(CHUNK_QUEUE_DEPTH);
        let chunker = self.chunker.clone();
        let source = path.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || {
            let file = match std::fs::File::open(&source) {
                Ok(file) => file,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e.into()));
                    return;
                }
            };
            for chunk in chunker.chunks(BufReader::new(file)) {
                if tx.blocking_send(chunk).is_err() {
                    return;
                }
            }
        });

        let mut hasher = blake3::Hasher::new();
        let mut processed = 0u64;
        while let Some(next) = rx.recv().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let chunk = next?;
            hasher.update(&chunk.data);

            let id = chunk.id();
            let offset = chunk.offset;
            let length = chunk.len();
            let codec = self.codec.clone();
            let backends = self.backends.clone();
            let tolerance = self.options.tolerance;
            let data = chunk.data;

            let (new, entry) = self
                .index
                .record_or_increment(id, || async move {
                    let encoded = tokio::task::spawn_blocking(move || codec.encode(&data))
                        .await
                        .map_err(|e| Error::Other(format!("encode task failed: {e}")))??;
                    let locations = backends.write_shards(&encoded, tolerance).await?;
                    Ok(encoded.into_entry(locations))
                })
                .await?;

            archive.chunks.push(ChunkRef {
                id,
                offset,
                length: length as u32,
            });
            processed += length as u64;

            {
                let mut state = self.state.lock().await;
                state.stats.transferred += length as u64;
                if new {
                    state.stats.storage_size += entry.storage_size();
                    let planned = entry.data_parts + entry.parity_parts;
                    state.stats.shard_failures += planned.saturating_sub(entry.shards.len()) as u64;
                }
            }
            self.emit(None, &archive.path, processed, archive.size).await;
        }

        reader
            .await
            .map_err(|e| Error::Other(format!("chunker task failed: {e}")))?;

        // The file may have changed size since it was walked.
        archive.size = processed;
        archive.content_hash = hasher.finalize().to_hex().to_string();
        Ok(())
    }

    /// Records a per-path failure, or turns it fatal in pedantic mode.
    async fn fail(&self, path: &Path, error: Error) -> Result<()> {
        let path = self.archive_path(path);
        if self.options.pedantic {
            return Err(Error::Pedantic {
                path,
                source: Box::new(error),
            });
        }

        warn!("'{}': failed to store: {}", path, error);
        let message = error.to_string();
        {
            let mut state = self.state.lock().await;
            state.stats.errors += 1;
            state.failures.insert(path.clone(), message.clone());
        }
        self.emit(Some(message), &path, 0, 0).await;
        Ok(())
    }

    async fn emit(&self, error: Option<String>, path: &str, current_transferred: u64, current_total: u64) {
        let Some(sender) = &self.progress else {
            return;
        };
        // Holding the lock while sending keeps cumulative totals ordered.
        let state = self.state.lock().await;
        let progress = Progress {
            error,
            path: path.to_string(),
            current_transferred,
            current_total,
            transferred: state.stats.transferred,
            total: state.total,
            stats: state.stats,
            timestamp: Instant::now(),
        };
        if sender.send(progress).await.is_err() {
            debug!("Progress receiver dropped");
        }
    }

    fn archive_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.options.cwd).unwrap_or(path);
        let relative = relative.to_string_lossy();
        if relative.is_empty() {
            ".".to_string()
        } else {
            relative.into_owned()
        }
    }

    fn archive_for(&self, path: &Path, metadata: &Metadata) -> Archive {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let (mode, uid, gid) = ownership(metadata);

        Archive {
            path: self.archive_path(path),
            archive_type: ArchiveType::Directory,
            points_to: None,
            mode,
            uid,
            gid,
            size: 0,
            mtime,
            chunks: Vec::new(),
            content_hash: String::new(),
        }
    }
}

#[cfg(unix)]
fn ownership(metadata: &Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.mode(), metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn ownership(metadata: &Metadata) -> (u32, u32, u32) {
    let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    (mode, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::snapshot::Volume;
    use crate::storage::Storage;

    fn stores(count: usize) -> Vec<Arc<MemoryStorage>> {
        (0..count).map(|i| Arc::new(MemoryStorage::new(i))).collect()
    }

    async fn repository(stores: &[Arc<MemoryStorage>]) -> Repository {
        let backends = stores.iter().map(|s| s.clone() as Arc<dyn Storage>).collect();
        Repository::init(backends, Some("pw"), StoreDefaults::default()).await.unwrap()
    }

    fn options(dir: &Path, defaults: &StoreDefaults) -> StoreOptions {
        let mut options = StoreOptions::new(dir, vec![PathBuf::from(".")], defaults);
        options.chunker = ChunkerConfig::with_average(1024);
        options
    }

    #[tokio::test]
    async fn test_store_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha".repeat(1000)).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"beta").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("a.txt", dir.path().join("link")).unwrap();

        let stores = stores(2);
        let repo = repository(&stores).await;
        let builder = SnapshotBuilder::new(&repo, options(dir.path(), &repo.config().defaults)).unwrap();
        let outcome = builder.run(CancellationToken::new()).await.unwrap();

        let stats = outcome.snapshot.stats;
        assert!(outcome.failures.is_empty());
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.size, 5004);
        assert_eq!(stats.errors, 0);

        let a = outcome.snapshot.archive("a.txt").unwrap();
        assert!(a.is_file());
        assert_eq!(a.content_hash, blake3::hash(&b"alpha".repeat(1000)).to_hex().to_string());
        assert_eq!(a.chunks.iter().map(|c| c.length as u64).sum::<u64>(), 5000);
        assert!(outcome.snapshot.archive("sub").unwrap().is_dir());
        #[cfg(unix)]
        assert_eq!(
            outcome.snapshot.archive("link").unwrap().points_to.as_deref(),
            Some("a.txt")
        );
    }

    #[tokio::test]
    async fn test_excludes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cache")).unwrap();
        std::fs::write(dir.path().join("cache/blob"), b"skip").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();
        std::fs::write(dir.path().join("drop.tmp"), b"drop").unwrap();

        let stores = stores(1);
        let repo = repository(&stores).await;
        let mut options = options(dir.path(), &repo.config().defaults);
        options.excludes = vec!["*.tmp".to_string(), "cache/".to_string()];
        let outcome = SnapshotBuilder::new(&repo, options)
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();

        let paths: Vec<&String> = outcome.snapshot.archives.keys().collect();
        assert_eq!(paths, vec![".", "keep.txt"]);
    }

    #[tokio::test]
    async fn test_progress_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 7 % 251) as u8).collect();
        std::fs::write(dir.path().join("data"), &data).unwrap();

        let stores = stores(1);
        let repo = repository(&stores).await;
        let mut options = options(dir.path(), &repo.config().defaults);
        options.paths = vec![PathBuf::from("data")];

        let (tx, mut rx) = mpsc::channel(4);
        let builder = SnapshotBuilder::new(&repo, options).unwrap().with_progress(tx);
        let run = tokio::spawn(builder.run(CancellationToken::new()));

        let mut last = 0;
        let mut events = 0;
        while let Some(progress) = rx.recv().await {
            assert_eq!(progress.path, "data");
            assert!(progress.current_transferred > last);
            assert_eq!(progress.current_total, data.len() as u64);
            assert_eq!(progress.total, data.len() as u64);
            last = progress.current_transferred;
            events += 1;
        }
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(last, data.len() as u64);
        assert_eq!(events, outcome.snapshot.archive("data").unwrap().chunks.len());
    }

    #[tokio::test]
    async fn test_missing_target_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present"), b"here").unwrap();

        let stores = stores(1);
        let repo = repository(&stores).await;
        let mut options = options(dir.path(), &repo.config().defaults);
        options.paths = vec![PathBuf::from("present"), PathBuf::from("absent")];

        let outcome = SnapshotBuilder::new(&repo, options.clone())
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.snapshot.stats.errors, 1);
        assert_eq!(outcome.snapshot.stats.files, 1);
        assert!(outcome.failures.contains_key("absent"));

        options.pedantic = true;
        let result = SnapshotBuilder::new(&repo, options)
            .unwrap()
            .run(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Pedantic { ref path, .. }) if path == "absent"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), b"content").unwrap();

        let stores = stores(1);
        let repo = repository(&stores).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(16);
        let result = SnapshotBuilder::new(&repo, options(dir.path(), &repo.config().defaults))
            .unwrap()
            .with_progress(tx)
            .run(cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(stores[0].keys_with_prefix("chunks/").is_empty());
        // The walk itself stops, so not even the root directory is reported.
        assert!(rx.recv().await.is_none());
    }

    fn random_file(path: &Path, len: usize, seed: u64) -> Vec<u8> {
        use rand::{RngCore, SeedableRng};
        let mut data = vec![0u8; len];
        rand::rngs::StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        std::fs::write(path, &data).unwrap();
        data
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(ChunkerConfig::with_average(1024)).unwrap();
        let mut planned = 0;
        for i in 0..8 {
            let data = random_file(&dir.path().join(format!("file{i}")), 32 * 1024, i);
            planned += chunker.chunk_data(&data).len();
        }

        let stores = stores(3);
        let repo = repository(&stores).await;
        let mut options = options(dir.path(), &repo.config().defaults);
        options.tolerance = 1;

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let builder = SnapshotBuilder::new(&repo, options).unwrap().with_progress(tx);
        let run = tokio::spawn(builder.run(cancel.clone()));

        let mut events = 0;
        while let Some(progress) = rx.recv().await {
            if progress.current_transferred > 0 {
                cancel.cancel();
            }
            events += 1;
        }
        assert!(matches!(run.await.unwrap(), Err(Error::Cancelled)));
        assert!(events > 0);

        let index = repo.chunk_index();
        assert!(!index.is_empty());
        assert!(index.len() < planned, "{} of {} chunks stored", index.len(), planned);
        for entry in index.entries() {
            assert_eq!(entry.shards.len(), 3);
            for shard in &entry.shards {
                let key = BackendManager::shard_key(&entry.id, shard.index);
                assert!(stores[shard.backend].exists(&key).await.unwrap(), "missing {key}");
            }
        }
    }

    #[tokio::test]
    async fn test_failed_file_returns_references() {
        let dir = tempfile::tempdir().unwrap();
        let original = random_file(&dir.path().join("file"), 64 * 1024, 1);

        let stores = stores(1);
        let repo = repository(&stores).await;
        let mut options = options(dir.path(), &repo.config().defaults);
        options.paths = vec![PathBuf::from("file")];
        SnapshotBuilder::new(&repo, options.clone())
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        let index = repo.chunk_index();
        let references = index.total_references();

        // Known chunks first, then new data the backend refuses.
        let mut grown = original;
        grown.extend(random_file(&dir.path().join("tail"), 64 * 1024, 2));
        std::fs::write(dir.path().join("file"), &grown).unwrap();
        stores[0].fail_writes(true);

        let outcome = SnapshotBuilder::new(&repo, options)
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.snapshot.stats.errors, 1);
        assert!(outcome.snapshot.archive("file").is_none());
        assert_eq!(index.total_references(), references);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_io() {
        let stores = stores(2);
        let repo = repository(&stores).await;
        let dir = tempfile::tempdir().unwrap();
        let writes = stores[0].write_count();

        let mut options = options(dir.path(), &repo.config().defaults);
        options.tolerance = 2;
        assert!(matches!(
            SnapshotBuilder::new(&repo, options),
            Err(Error::RedundancyAmount { backends: 2, tolerance: 2 })
        ));

        let mut options = self::options(dir.path(), &repo.config().defaults);
        options.excludes = vec!["[".to_string()];
        assert!(matches!(SnapshotBuilder::new(&repo, options), Err(Error::Config(_))));
        assert_eq!(stores[0].write_count(), writes);
    }

    #[tokio::test]
    async fn test_commit_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), b"content").unwrap();

        let stores = stores(2);
        let mut repo = repository(&stores).await;
        let volume = repo.add_volume(Volume::new("vol", ""));
        let outcome = SnapshotBuilder::new(&repo, options(dir.path(), &repo.config().defaults))
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        repo.commit_snapshot(&volume, &outcome.snapshot).await.unwrap();

        let backends = stores.iter().map(|s| s.clone() as Arc<dyn Storage>).collect();
        let reopened = Repository::open(backends, Some("pw")).await.unwrap();
        assert_eq!(reopened.find_volume("vol").unwrap().snapshots, vec![outcome.snapshot.id.clone()]);
        assert_eq!(reopened.chunk_index().len(), 1);
        let (_, loaded) = reopened.find_snapshot(&outcome.snapshot.id).await.unwrap();
        assert_eq!(loaded.stats, outcome.snapshot.stats);
    }
}
