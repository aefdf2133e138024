use crate::codec::{EncodedChunk, Shard};
use crate::index::{IndexEntry, ShardLocation};
use crate::storage::Storage;
use crate::{ChunkID, Error, Result};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Per-backend object naming the slot a backend occupies in the repository.
pub const BACKEND_ID_KEY: &str = "backend-id";

/// The ordered set of storage backends a repository spreads its data over.
///
/// Shards of one chunk land on distinct backends. The backend for shard `i`
/// is derived from the chunk fingerprint, so readers recompute it without
/// consulting anything but the index entry.
pub struct BackendManager {
    backends: Vec<Arc<dyn Storage>>,
    in_flight: TaskTracker,
}

#[derive(Debug, Clone)]
pub struct BackendSpace {
    pub location: String,
    pub available: Option<u64>,
}

impl BackendManager {
    pub fn new(backends: Vec<Arc<dyn Storage>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Config("at least one storage backend is required".to_string()));
        }
        Ok(Self {
            backends,
            in_flight: TaskTracker::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backends(&self) -> &[Arc<dyn Storage>] {
        &self.backends
    }

    pub fn locations(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.location()).collect()
    }

    /// Rejects a failure tolerance that would leave nothing recoverable if
    /// every tolerated backend failed.
    pub fn check_tolerance(&self, tolerance: usize) -> Result<()> {
        if self.backends.len() <= tolerance {
            return Err(Error::RedundancyAmount {
                backends: self.backends.len(),
                tolerance,
            });
        }
        Ok(())
    }

    /// Erasure layout for a tolerance: `(data_parts, parity_parts)`.
    pub fn layout(&self, tolerance: usize) -> Result<(usize, usize)> {
        self.check_tolerance(tolerance)?;
        Ok((self.backends.len() - tolerance, tolerance))
    }

    pub fn shard_backend(&self, id: &ChunkID, shard_index: usize) -> usize {
        let offset = u64::from_le_bytes(id.as_bytes()[..8].try_into().unwrap_or_default());
        ((offset % self.backends.len() as u64) as usize + shard_index) % self.backends.len()
    }

    pub fn shard_key(id: &ChunkID, shard_index: usize) -> String {
        format!("chunks/{}.{}", id.to_hex(), shard_index)
    }

    /// Writes every shard of `chunk` to its backend in parallel.
    ///
    /// Fails as soon as more than `tolerance` writes have failed; the writes
    /// still running then finish in the background and are awaited by
    /// [`BackendManager::flush`]. On success the returned locations cover
    /// exactly the shards whose write was confirmed.
    pub async fn write_shards(&self, chunk: &EncodedChunk, tolerance: usize) -> Result<Vec<ShardLocation>> {
        let total = chunk.shards.len();
        if total > self.backends.len() {
            return Err(Error::Config(format!(
                "{total} shards can't be spread over {} backends",
                self.backends.len()
            )));
        }
        let allowed_failures = tolerance.min(chunk.parity_parts);

        let mut pending = FuturesUnordered::new();
        for shard in &chunk.shards {
            let backend_index = self.shard_backend(&chunk.id, shard.index);
            let backend = self.backends[backend_index].clone();
            let key = Self::shard_key(&chunk.id, shard.index);
            let data = shard.data.clone();
            let location = ShardLocation {
                index: shard.index,
                backend: backend_index,
                checksum: shard.checksum.clone(),
            };
            pending.push(self.in_flight.spawn(async move {
                let result = backend.write(&key, data).await;
                (location, backend.location(), result)
            }));
        }

        let mut locations = Vec::with_capacity(total);
        let mut failed = 0;
        while let Some(joined) = pending.next().await {
            match joined {
                Ok((location, _, Ok(()))) => locations.push(location),
                Ok((location, backend, Err(e))) => {
                    failed += 1;
                    warn!(
                        chunk = %chunk.id.short_string(),
                        shard = location.index,
                        backend = %backend,
                        error = %e,
                        "Shard write failed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(chunk = %chunk.id.short_string(), error = %e, "Shard write task aborted");
                }
            }

            if failed > allowed_failures {
                return Err(Error::BackendWrite {
                    id: chunk.id.to_hex(),
                    failed,
                    tolerance: allowed_failures,
                });
            }
        }

        locations.sort_by_key(|location| location.index);
        debug!(
            chunk = %chunk.id.short_string(),
            confirmed = locations.len(),
            failed,
            total,
            "Shard set written"
        );
        Ok(locations)
    }

    /// Waits for shard writes still running after their chunk was accepted.
    pub async fn flush(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    /// Reads shards in parallel, dropping any whose checksum does not match,
    /// and stops as soon as `data_parts` valid shards are in hand.
    pub async fn read_shards(&self, entry: &IndexEntry) -> Result<Vec<Option<Vec<u8>>>> {
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; entry.data_parts + entry.parity_parts];
        let mut pending = FuturesUnordered::new();
        for location in &entry.shards {
            let Some(backend) = self.backends.get(location.backend) else {
                warn!(chunk = %entry.id.short_string(), backend = location.backend, "Shard refers to unknown backend");
                continue;
            };
            let key = Self::shard_key(&entry.id, location.index);
            pending.push(async move { (location, backend.read(&key).await) });
        }

        let mut valid = 0;
        while let Some((location, result)) = pending.next().await {
            match result {
                Ok(data) if Shard::checksum_of(&data) == location.checksum => {
                    if let Some(slot) = shards.get_mut(location.index) {
                        *slot = Some(data.to_vec());
                        valid += 1;
                    }
                }
                Ok(_) => {
                    warn!(chunk = %entry.id.short_string(), shard = location.index, "Shard checksum mismatch");
                }
                Err(e) => {
                    debug!(chunk = %entry.id.short_string(), shard = location.index, error = %e, "Shard unavailable");
                }
            }
            if valid >= entry.data_parts {
                break;
            }
        }

        if valid < entry.data_parts {
            return Err(Error::InsufficientShards {
                id: entry.id.to_hex(),
                available: valid,
                required: entry.data_parts,
            });
        }
        Ok(shards)
    }

    pub async fn delete_shards(&self, entry: &IndexEntry) -> Result<()> {
        for location in &entry.shards {
            if let Some(backend) = self.backends.get(location.backend) {
                backend.delete(&Self::shard_key(&entry.id, location.index)).await?;
            }
        }
        Ok(())
    }

    /// Metadata is replicated in full to every backend.
    pub async fn store_metadata(&self, key: &str, data: Bytes) -> Result<()> {
        for backend in &self.backends {
            backend.write(key, data.clone()).await?;
        }
        debug!(key, backends = self.backends.len(), "Stored metadata");
        Ok(())
    }

    /// Returns the copy from the first backend that has one.
    pub async fn load_metadata(&self, key: &str) -> Result<Bytes> {
        let mut last_error = None;
        for backend in &self.backends {
            match backend.read(key).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    debug!(key, backend = %backend.location(), error = %e, "Metadata unavailable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::ObjectNotFound { key: key.to_string() }))
    }

    pub async fn delete_metadata(&self, key: &str) -> Result<()> {
        for backend in &self.backends {
            backend.delete(key).await?;
        }
        Ok(())
    }

    pub async fn metadata_exists(&self, key: &str) -> Result<bool> {
        for backend in &self.backends {
            if backend.exists(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn init_all(&self) -> Result<()> {
        for backend in &self.backends {
            backend.init().await?;
            info!("Initialized backend {}", backend.location());
        }
        Ok(())
    }

    /// Writes `ids[i]` to backend `i` so [`BackendManager::arrange`] can
    /// restore the order later.
    pub async fn label(&self, ids: &[String]) -> Result<()> {
        if ids.len() != self.backends.len() {
            return Err(Error::Config(format!(
                "{} backend ids for {} backends",
                ids.len(),
                self.backends.len()
            )));
        }
        for (backend, id) in self.backends.iter().zip(ids) {
            backend.write(BACKEND_ID_KEY, Bytes::from(id.clone())).await?;
        }
        Ok(())
    }

    /// Reorders the backends so position `i` holds the backend labelled
    /// `ids[i]`, whatever order the locations were given in.
    ///
    /// A single backend whose label can't be read takes the one slot left
    /// over, so a repository with an unreachable backend still opens.
    pub async fn arrange(self, ids: &[String]) -> Result<Self> {
        if ids.len() != self.backends.len() {
            return Err(Error::Config(format!(
                "repository spans {} backends, {} given",
                ids.len(),
                self.backends.len()
            )));
        }

        let mut slots: Vec<Option<Arc<dyn Storage>>> = vec![None; ids.len()];
        let mut unlabelled = Vec::new();
        for backend in self.backends {
            let label = match backend.read(BACKEND_ID_KEY).await {
                Ok(data) => String::from_utf8_lossy(&data).into_owned(),
                Err(e) => {
                    warn!(backend = %backend.location(), error = %e, "Backend label unavailable");
                    unlabelled.push(backend);
                    continue;
                }
            };
            let Some(slot) = ids.iter().position(|id| *id == label) else {
                return Err(Error::Config(format!(
                    "{} belongs to a different repository",
                    backend.location()
                )));
            };
            if slots[slot].is_some() {
                return Err(Error::Config(format!(
                    "{} is given more than once",
                    backend.location()
                )));
            }
            slots[slot] = Some(backend);
        }

        if unlabelled.len() > 1 {
            return Err(Error::Config(format!(
                "can't place {} backends without a readable label",
                unlabelled.len()
            )));
        }
        let mut unlabelled = unlabelled.into_iter();
        let backends = slots
            .into_iter()
            .map(|slot| slot.or_else(|| unlabelled.next()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Config("backend order could not be restored".to_string()))?;

        Ok(Self {
            backends,
            in_flight: self.in_flight,
        })
    }

    pub async fn available_space(&self) -> Vec<BackendSpace> {
        let mut spaces = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            spaces.push(BackendSpace {
                location: backend.location(),
                available: backend.available_space().await.ok(),
            });
        }
        spaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChunkCodec;
    use crate::memory::MemoryStorage;
    use crate::{Compression, Encryption};

    fn manager(count: usize) -> (BackendManager, Vec<Arc<MemoryStorage>>) {
        let stores: Vec<Arc<MemoryStorage>> = (0..count).map(|i| Arc::new(MemoryStorage::new(i))).collect();
        let backends = stores.iter().map(|s| s.clone() as Arc<dyn Storage>).collect();
        (BackendManager::new(backends).unwrap(), stores)
    }

    fn encode(data_parts: usize, parity_parts: usize) -> EncodedChunk {
        ChunkCodec::new(Compression::None, Encryption::None, None, data_parts, parity_parts)
            .unwrap()
            .encode(&b"redundant bytes ".repeat(64))
            .unwrap()
    }

    #[test]
    fn test_redundancy_guard() {
        for backends in 1..5 {
            let (manager, _) = manager(backends);
            for tolerance in backends..backends + 3 {
                assert!(matches!(
                    manager.check_tolerance(tolerance),
                    Err(Error::RedundancyAmount { .. })
                ));
            }
            assert_eq!(manager.layout(backends - 1).unwrap(), (1, backends - 1));
        }
    }

    #[test]
    fn test_shards_on_distinct_backends() {
        let (manager, _) = manager(5);
        let id = ChunkID::from_data(b"placement");
        let mut used: Vec<usize> = (0..5).map(|i| manager.shard_backend(&id, i)).collect();
        used.sort();
        assert_eq!(used, vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.shard_backend(&id, 2), manager.shard_backend(&id, 2));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (manager, stores) = manager(3);
        let chunk = encode(2, 1);
        let entry = chunk.clone().into_entry(manager.write_shards(&chunk, 1).await.unwrap());
        manager.flush().await;

        assert!(stores.iter().all(|s| s.object_count() == 1));
        let shards = manager.read_shards(&entry).await.unwrap();
        assert!(shards.iter().filter(|s| s.is_some()).count() >= 2);

        manager.delete_shards(&entry).await.unwrap();
        assert!(stores.iter().all(|s| s.object_count() == 0));
    }

    #[tokio::test]
    async fn test_write_within_tolerance() {
        let (manager, stores) = manager(3);
        stores[1].fail_writes(true);
        let chunk = encode(2, 1);
        let locations = manager.write_shards(&chunk, 1).await.unwrap();

        assert_eq!(locations.len(), 2);
        assert!(locations.iter().all(|l| l.backend != 1));
        assert_eq!(stores[1].object_count(), 0);
        let entry = chunk.into_entry(locations);
        assert_eq!(entry.shards.len(), 2);
        assert!(manager.read_shards(&entry).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_beyond_tolerance() {
        let (manager, stores) = manager(3);
        stores[0].fail_writes(true);
        stores[2].fail_writes(true);
        let chunk = encode(2, 1);
        assert!(matches!(
            manager.write_shards(&chunk, 1).await,
            Err(Error::BackendWrite { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_skips_corrupt_and_missing() {
        let (manager, stores) = manager(4);
        let chunk = encode(2, 2);
        let entry = chunk.clone().into_entry(manager.write_shards(&chunk, 2).await.unwrap());
        manager.flush().await;

        let key0 = BackendManager::shard_key(&chunk.id, 0);
        let key1 = BackendManager::shard_key(&chunk.id, 1);
        stores[manager.shard_backend(&chunk.id, 0)].corrupt(&key0);
        stores[manager.shard_backend(&chunk.id, 1)].remove(&key1);

        let shards = manager.read_shards(&entry).await.unwrap();
        assert!(shards[0].is_none());
        assert!(shards[1].is_none());

        let key2 = BackendManager::shard_key(&chunk.id, 2);
        stores[manager.shard_backend(&chunk.id, 2)].remove(&key2);
        assert!(matches!(
            manager.read_shards(&entry).await,
            Err(Error::InsufficientShards { available: 1, required: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_arrange_restores_labelled_order() {
        let (manager, stores) = manager(3);
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        manager.label(&ids).await.unwrap();

        let reversed = stores.iter().rev().map(|s| s.clone() as Arc<dyn Storage>).collect();
        let arranged = BackendManager::new(reversed).unwrap().arrange(&ids).await.unwrap();
        assert_eq!(arranged.locations(), manager.locations());

        stores[1].remove(BACKEND_ID_KEY);
        let reversed = stores.iter().rev().map(|s| s.clone() as Arc<dyn Storage>).collect();
        let arranged = BackendManager::new(reversed).unwrap().arrange(&ids).await.unwrap();
        assert_eq!(arranged.locations(), manager.locations());

        let foreign = Arc::new(MemoryStorage::new("foreign"));
        foreign.write(BACKEND_ID_KEY, Bytes::from_static(b"z")).await.unwrap();
        let mixed = vec![
            stores[0].clone() as Arc<dyn Storage>,
            stores[2].clone() as Arc<dyn Storage>,
            foreign as Arc<dyn Storage>,
        ];
        assert!(matches!(
            BackendManager::new(mixed).unwrap().arrange(&ids).await,
            Err(Error::Config(_))
        ));
        let two = stores[..2].iter().map(|s| s.clone() as Arc<dyn Storage>).collect();
        assert!(BackendManager::new(two).unwrap().arrange(&ids).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_replicated() {
        let (manager, stores) = manager(2);
        manager.store_metadata("config", Bytes::from_static(b"{}")).await.unwrap();
        assert!(stores.iter().all(|s| s.object_count() == 1));

        stores[0].remove("config");
        assert_eq!(&manager.load_metadata("config").await.unwrap()[..], b"{}");

        manager.delete_metadata("config").await.unwrap();
        assert!(!manager.metadata_exists("config").await.unwrap());
        assert!(matches!(
            manager.load_metadata("missing").await,
            Err(Error::ObjectNotFound { .. })
        ));
    }
}
