use crate::storage::{ObjectInfo, Storage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Volatile in-memory storage. Backs `memory://` repositories and lets
/// tests inject read and write failures.
pub struct MemoryStorage {
    name: String,
    objects: DashMap<String, Bytes>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(name: impl std::fmt::Display) -> Self {
        Self {
            name: format!("memory://{name}"),
            objects: DashMap::new(),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn remove(&self, key: &str) {
        self.objects.remove(key);
    }

    /// Flips the first byte of the stored object.
    pub fn corrupt(&self, key: &str) {
        if let Some(mut entry) = self.objects.get_mut(key) {
            let mut data = entry.to_vec();
            if let Some(byte) = data.first_mut() {
                *byte ^= 0xFF;
            }
            *entry = Bytes::from(data);
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("{}: read refused", self.name)));
        }
        self.objects
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::ObjectNotFound { key: key.to_string() })
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("{}: write refused", self.name)));
        }
        self.objects.insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let size = self
            .objects
            .get(key)
            .map(|e| e.value().len() as u64)
            .ok_or_else(|| Error::ObjectNotFound { key: key.to_string() })?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            modified: chrono::Utc::now(),
        })
    }

    async fn available_space(&self) -> Result<u64> {
        Ok(u64::MAX)
    }

    fn location(&self) -> String {
        self.name.clone()
    }

    fn protocols(&self) -> Vec<String> {
        vec!["memory".to_string()]
    }
}
