use crate::backend_manager::BackendManager;
use crate::codec::ChunkCodec;
use crate::crypto::{Encryptor, KeyWrapper, MasterKey};
use crate::index::ChunkIndex;
use crate::snapshot::{Snapshot, Volume};
use crate::storage::Storage;
use crate::{ChunkID, Encryption, Error, REPO_FORMAT_VERSION, RepoConfig, Result, StoreDefaults};
use crate::{SnapshotID, VolumeID};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_KEY: &str = "config";
pub const REPOSITORY_KEY: &str = "repository";
const SNAPSHOT_PREFIX: &str = "snapshots";

/// Version of the encrypted repository descriptor (the volume list).
pub const REPOSITORY_STATE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryState {
    version: u32,
    volumes: Vec<Volume>,
}

/// A backup repository spread over one or more storage backends.
///
/// Every backend holds a full copy of the metadata and one shard of each
/// chunk. The chunk index is loaded when the repository is opened and must
/// be saved back with [`Repository::save_chunk_index`] after a store.
///
/// # Layout
///
/// ```text
/// <backend>/
/// ├── config           # plaintext RepoConfig: KDF params, wrapped data key
/// ├── backend-id       # this backend's label, unique per backend
/// ├── repository       # encrypted volume list
/// ├── chunkindex       # encrypted, versioned chunk index
/// ├── snapshots/<id>   # encrypted snapshot manifests
/// └── chunks/<hex>.<n> # shard n of a chunk
/// ```
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use shardsnap_core::Repository;
/// use shardsnap_core::storage::Storage;
///
/// # async fn example(backends: Vec<Arc<dyn Storage>>) -> shardsnap_core::Result<()> {
/// let repo = Repository::init(backends.clone(), Some("secret"), Default::default()).await?;
/// let repo = Repository::open(backends, Some("secret")).await?;
/// # Ok(())
/// # }
/// ```
pub struct Repository {
    config: RepoConfig,
    state: RepositoryState,
    backends: Arc<BackendManager>,
    encryptor: Option<Arc<Encryptor>>,
    index: Arc<ChunkIndex>,
}

impl Repository {
    /// Initializes a new repository on the given backends.
    ///
    /// With a password, a random data key is generated and stored wrapped
    /// under an Argon2id-derived master key. Without one the repository is
    /// unencrypted and `Encryption::Aes` is rejected for it.
    ///
    /// # Errors
    ///
    /// * `Error::RepositoryExists` - any backend already holds a config
    /// * `Error::RedundancyAmount` - the default tolerance is not below the backend count
    /// * `Error::Config` - AES requested without a password
    pub async fn init(
        backends: Vec<Arc<dyn Storage>>,
        password: Option<&str>,
        defaults: StoreDefaults,
    ) -> Result<Self> {
        let backends = BackendManager::new(backends)?;
        backends.check_tolerance(defaults.tolerance)?;

        if backends.metadata_exists(CONFIG_KEY).await? {
            return Err(Error::RepositoryExists {
                location: backends.locations().join(", "),
            });
        }
        if password.is_none() && defaults.encryption == Encryption::Aes {
            return Err(Error::Config(
                "aes encryption requires a repository password".to_string(),
            ));
        }

        backends.init_all().await?;

        let mut config = RepoConfig::new(defaults);
        config.backends = (0..backends.len())
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        backends.label(&config.backends).await?;

        let encryptor = match password {
            Some(password) => {
                let master_key = MasterKey::derive_from_password(password, &config.kdf_params)?;
                let data_key = MasterKey::generate();
                config.wrapped_key = Some(KeyWrapper::new(&master_key).wrap(&data_key)?);
                Some(Arc::new(Encryptor::new(data_key.as_bytes())?))
            }
            None => None,
        };

        let config_json = serde_json::to_vec_pretty(&config)?;
        backends.store_metadata(CONFIG_KEY, Bytes::from(config_json)).await?;

        let repository = Self {
            config,
            state: RepositoryState {
                version: REPOSITORY_STATE_VERSION,
                volumes: Vec::new(),
            },
            backends: Arc::new(backends),
            encryptor,
            index: Arc::new(ChunkIndex::new()),
        };
        repository.save().await?;

        info!("Initialized repository {}", repository.config.id);
        Ok(repository)
    }

    /// Opens an existing repository and loads its chunk index.
    ///
    /// # Errors
    ///
    /// * `Error::RepositoryNotFound` - no backend holds a config
    /// * `Error::InvalidPassword` - wrong or missing password
    /// * `Error::InvalidFormatVersion` - unsupported config, descriptor, or index version
    /// * `Error::Config` - the locations are not the backends the repository was created on
    pub async fn open(backends: Vec<Arc<dyn Storage>>, password: Option<&str>) -> Result<Self> {
        let backends = BackendManager::new(backends)?;

        let config_data = match backends.load_metadata(CONFIG_KEY).await {
            Ok(data) => data,
            Err(Error::ObjectNotFound { .. }) => {
                return Err(Error::RepositoryNotFound {
                    location: backends.locations().join(", "),
                });
            }
            Err(e) => return Err(e),
        };
        let config: RepoConfig = serde_json::from_slice(&config_data)?;

        if config.version != REPO_FORMAT_VERSION {
            return Err(Error::InvalidFormatVersion {
                what: "repository config",
                version: config.version,
            });
        }

        // Shard placement follows the backend order recorded at init.
        let backends = if config.backends.is_empty() {
            backends
        } else {
            backends.arrange(&config.backends).await?
        };

        let encryptor = match (&config.wrapped_key, password) {
            (Some(wrapped), Some(password)) => {
                let master_key = MasterKey::derive_from_password(password, &config.kdf_params)?;
                let data_key = KeyWrapper::new(&master_key).unwrap_key(wrapped)?;
                Some(Arc::new(Encryptor::new(data_key.as_bytes())?))
            }
            (Some(_), None) => return Err(Error::InvalidPassword),
            (None, _) => None,
        };

        let mut repository = Self {
            config,
            state: RepositoryState::default(),
            backends: Arc::new(backends),
            encryptor,
            index: Arc::new(ChunkIndex::new()),
        };

        let state_data = repository.backends.load_metadata(REPOSITORY_KEY).await?;
        let state: RepositoryState = repository.open_metadata(&state_data)?;
        if state.version != REPOSITORY_STATE_VERSION {
            return Err(Error::InvalidFormatVersion {
                what: "repository",
                version: state.version,
            });
        }
        repository.state = state;
        repository.index = Arc::new(ChunkIndex::open(&repository).await?);

        info!(
            "Opened repository {} ({} volumes, {} backends)",
            repository.config.id,
            repository.state.volumes.len(),
            repository.backends.len()
        );
        Ok(repository)
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn backend_manager(&self) -> Arc<BackendManager> {
        self.backends.clone()
    }

    pub fn encryptor(&self) -> Option<Arc<Encryptor>> {
        self.encryptor.clone()
    }

    pub fn chunk_index(&self) -> Arc<ChunkIndex> {
        self.index.clone()
    }

    /// Persists the volume list.
    pub async fn save(&self) -> Result<()> {
        let data = self.seal_metadata(&self.state)?;
        self.backends.store_metadata(REPOSITORY_KEY, data).await
    }

    pub async fn save_chunk_index(&self) -> Result<()> {
        self.index.save(self).await
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.state.volumes
    }

    pub fn add_volume(&mut self, volume: Volume) -> VolumeID {
        let id = volume.id.clone();
        self.state.volumes.push(volume);
        id
    }

    /// Finds a volume by id or by name.
    pub fn find_volume(&self, id: &str) -> Result<&Volume> {
        self.state
            .volumes
            .iter()
            .find(|v| v.id == id || v.name == id)
            .ok_or_else(|| Error::VolumeNotFound { id: id.to_string() })
    }

    pub fn find_volume_mut(&mut self, id: &str) -> Result<&mut Volume> {
        self.state
            .volumes
            .iter_mut()
            .find(|v| v.id == id || v.name == id)
            .ok_or_else(|| Error::VolumeNotFound { id: id.to_string() })
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let data = self.seal_metadata(snapshot)?;
        self.backends
            .store_metadata(&snapshot_key(&snapshot.id), data)
            .await?;
        debug!("Saved snapshot {}", snapshot.id);
        Ok(())
    }

    pub async fn load_snapshot(&self, id: &SnapshotID) -> Result<Snapshot> {
        let data = match self.backends.load_metadata(&snapshot_key(id)).await {
            Ok(data) => data,
            Err(Error::ObjectNotFound { .. }) => {
                return Err(Error::SnapshotNotFound { id: id.clone() });
            }
            Err(e) => return Err(e),
        };
        self.open_metadata(&data)
    }

    /// Looks a snapshot up across all volumes by id or unique id prefix.
    pub async fn find_snapshot(&self, id: &str) -> Result<(VolumeID, Snapshot)> {
        let mut matches = self.state.volumes.iter().flat_map(|volume| {
            volume
                .snapshots
                .iter()
                .filter(move |s| s.starts_with(id))
                .map(move |s| (volume.id.clone(), s.clone()))
        });

        let (volume_id, snapshot_id) = match (matches.next(), matches.next()) {
            (Some(found), None) => found,
            (Some(_), Some(_)) => {
                return Err(Error::Other(format!("snapshot id {id} is ambiguous")));
            }
            (None, _) => return Err(Error::SnapshotNotFound { id: id.to_string() }),
        };
        Ok((volume_id, self.load_snapshot(&snapshot_id).await?))
    }

    /// Persists a finished snapshot and everything that refers to it: the
    /// manifest, the volume entry, the chunk index, then the volume list.
    pub async fn commit_snapshot(&mut self, volume_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.find_volume(volume_id)?;
        self.save_snapshot(snapshot).await?;
        self.find_volume_mut(volume_id)?.add_snapshot(snapshot.id.clone());
        self.save_chunk_index().await?;
        self.save().await?;
        info!("Committed snapshot {} to volume {}", snapshot.id, volume_id);
        Ok(())
    }

    /// Reads and decodes one chunk through the index.
    pub async fn load_chunk(&self, id: &ChunkID) -> Result<Vec<u8>> {
        let entry = self
            .index
            .lookup(id)
            .ok_or_else(|| Error::ChunkNotFound { id: id.to_hex() })?;
        let shards = self.backends.read_shards(&entry).await?;
        let codec = ChunkCodec::new(
            entry.compression,
            entry.encryption,
            self.encryptor.clone(),
            entry.data_parts,
            entry.parity_parts,
        )?;
        codec.decode(&entry, shards)
    }

    pub(crate) fn seal_metadata<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let json = serde_json::to_vec(value)?;
        match &self.encryptor {
            Some(encryptor) => Ok(Bytes::from(encryptor.encrypt(&json)?)),
            None => Ok(Bytes::from(json)),
        }
    }

    pub(crate) fn open_metadata<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match &self.encryptor {
            Some(encryptor) => Ok(serde_json::from_slice(&encryptor.decrypt(data)?)?),
            None => Ok(serde_json::from_slice(data)?),
        }
    }
}

fn snapshot_key(id: &str) -> String {
    format!("{SNAPSHOT_PREFIX}/{id}")
}
