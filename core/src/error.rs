use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failure tolerance ({tolerance}) can't be equal or higher than the number of storage backends ({backends})")]
    RedundancyAmount { backends: usize, tolerance: usize },

    #[error("Chunk corrupted: {id}")]
    ChunkCorrupt { id: String },

    #[error("Insufficient shards for chunk {id}: {available} valid, {required} required")]
    InsufficientShards {
        id: String,
        available: usize,
        required: usize,
    },

    #[error("Writing chunk {id} failed on {failed} backends (tolerance {tolerance})")]
    BackendWrite {
        id: String,
        failed: usize,
        tolerance: usize,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Erasure coding error: {0}")]
    Erasure(String),

    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: String },

    #[error("Repository not found at {location}")]
    RepositoryNotFound { location: String },

    #[error("Repository already exists at {location}")]
    RepositoryExists { location: String },

    #[error("Invalid format version for {what}: {version}")]
    InvalidFormatVersion { what: &'static str, version: u32 },

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    #[error("Volume not found: {id}")]
    VolumeNotFound { id: String },

    #[error("Archive {path} failed verification")]
    ArchiveCorrupt { path: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("'{path}': {source}")]
    Pedantic {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
