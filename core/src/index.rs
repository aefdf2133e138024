use crate::repository::Repository;
use crate::{ChunkID, Compression, Encryption, Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Version of the serialized index blob. Bump on any layout change; there
/// is no migration path between versions.
pub const INDEX_FORMAT_VERSION: u32 = 1;

pub const INDEX_KEY: &str = "chunkindex";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLocation {
    pub index: usize,
    pub backend: usize,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: ChunkID,
    pub size: usize,
    pub encoded_size: usize,
    pub data_parts: usize,
    pub parity_parts: usize,
    pub compression: Compression,
    pub encryption: Encryption,
    pub shards: Vec<ShardLocation>,
    pub references: u64,
}

impl IndexEntry {
    /// Bytes the shard set occupies across all backends.
    pub fn storage_size(&self) -> u64 {
        let shard_size = self.encoded_size.div_ceil(self.data_parts).max(1);
        (shard_size * self.shards.len()) as u64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// Deduplication ledger: fingerprint to shard layout and reference count.
///
/// An entry only appears once its shard set was accepted by the backends.
/// Stores of the same fingerprint are serialized through a per-fingerprint
/// lock; different fingerprints proceed in parallel.
#[derive(Default)]
pub struct ChunkIndex {
    entries: DashMap<ChunkID, IndexEntry>,
    in_progress: DashMap<ChunkID, Arc<Mutex<()>>>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &ChunkID) -> Option<IndexEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &ChunkID) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_references(&self) -> u64 {
        self.entries.iter().map(|e| e.references).sum()
    }

    /// All entries, ordered by fingerprint.
    pub fn entries(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Total bytes the stored shards occupy across all backends.
    pub fn storage_size(&self) -> u64 {
        self.entries.iter().map(|e| e.storage_size()).sum()
    }

    /// The only way entries are created or updated.
    ///
    /// If `id` is already present its reference count is incremented and
    /// `write` is never called. Otherwise `write` must store the chunk and
    /// return its entry; the entry is inserted only if `write` succeeds.
    /// Returns whether the chunk was new, plus the resulting entry.
    pub async fn record_or_increment<F, Fut>(&self, id: ChunkID, write: F) -> Result<(bool, IndexEntry)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IndexEntry>>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.increment_or_write(id, write).await
        };
        self.unlock(id, lock);
        result
    }

    /// Gives back one reference taken by [`ChunkIndex::record_or_increment`].
    ///
    /// An entry left without references stays in the index with its shards,
    /// so a later store of the same data still deduplicates against it.
    pub async fn release(&self, id: &ChunkID) {
        let lock = self.lock_for(*id);
        {
            let _guard = lock.lock().await;
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.references = entry.references.saturating_sub(1);
            }
        }
        self.unlock(*id, lock);
    }

    fn lock_for(&self, id: ChunkID) -> Arc<Mutex<()>> {
        self.in_progress
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn unlock(&self, id: ChunkID, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.in_progress.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn increment_or_write<F, Fut>(&self, id: ChunkID, write: F) -> Result<(bool, IndexEntry)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IndexEntry>>,
    {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.references += 1;
            return Ok((false, entry.value().clone()));
        }

        let entry = write().await?;
        if entry.id != id {
            return Err(Error::Other(format!(
                "stored chunk {} under fingerprint {}",
                entry.id, id
            )));
        }
        self.entries.insert(id, entry.clone());
        debug!(chunk = %id.short_string(), "Recorded new chunk");
        Ok((true, entry))
    }

    pub async fn open(repository: &Repository) -> Result<Self> {
        info!("Opening chunk index");
        let data = match repository.backends().load_metadata(INDEX_KEY).await {
            Ok(data) => data,
            Err(Error::ObjectNotFound { .. }) => {
                debug!("No chunk index stored yet");
                return Ok(Self::new());
            }
            Err(e) => return Err(e),
        };

        let file: IndexFile = repository.open_metadata(&data)?;
        if file.version != INDEX_FORMAT_VERSION {
            return Err(Error::InvalidFormatVersion {
                what: "chunk index",
                version: file.version,
            });
        }

        let index = Self::new();
        for entry in file.entries {
            index.entries.insert(entry.id, entry);
        }
        info!("Opened chunk index with {} chunks", index.len());
        Ok(index)
    }

    pub async fn save(&self, repository: &Repository) -> Result<()> {
        let file = IndexFile {
            version: INDEX_FORMAT_VERSION,
            entries: self.entries(),
        };
        let data = repository.seal_metadata(&file)?;
        repository.backends().store_metadata(INDEX_KEY, data).await?;
        info!("Saved chunk index with {} chunks", self.len());
        Ok(())
    }
}
