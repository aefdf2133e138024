use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Byte-addressable storage capability implemented by every backend driver.
///
/// Drivers own their timeouts; a call that does not return before the
/// driver's own deadline must fail rather than hang.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Fails with `Error::ObjectNotFound` when `key` was never written.
    async fn read(&self, key: &str) -> Result<Bytes>;

    async fn write(&self, key: &str, data: Bytes) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn stat(&self, key: &str) -> Result<ObjectInfo>;

    async fn available_space(&self) -> Result<u64>;

    /// Human readable location, e.g. the URL the backend was opened from.
    fn location(&self) -> String;

    fn protocols(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: chrono::DateTime<chrono::Utc>,
}
