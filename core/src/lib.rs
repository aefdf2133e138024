pub mod archive;
pub mod backend_manager;
pub mod chunker;
pub mod codec;
pub mod compression;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod index;
pub mod memory;
pub mod repository;
pub mod shutdown;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use repository::Repository;
pub use snapshot::Snapshot;
pub use types::*;
