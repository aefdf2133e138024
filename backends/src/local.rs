use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use shardsnap_core::storage::{ObjectInfo, Storage};
use shardsnap_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Storage backend on a local (or locally mounted) directory. Keys map to
/// relative paths below the base directory.
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn not_found_or(key: &str, action: &str, e: std::io::Error) -> Error {
        if e.kind() == ErrorKind::NotFound {
            Error::ObjectNotFound { key: key.to_string() }
        } else {
            Error::Backend(format!("Failed to {} {}: {}", action, key, e))
        }
    }
}

#[async_trait]
impl Storage for LocalBackend {
    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(key)).await?)
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let data = fs::read(self.full_path(key))
            .await
            .map_err(|e| Self::not_found_or(key, "read", e))?;
        Ok(Bytes::from(data))
    }

    /// Writes to a temporary sibling first and renames it into place, so a
    /// crash never leaves a truncated object under `key`.
    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut temp_path = full_path.clone().into_os_string();
        static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        temp_path.push(format!(".tmp-{}-{}", std::process::id(), n));

        fs::write(&temp_path, &data)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;
        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", key, e)))?;
        debug!(key, bytes = data.len(), "Wrote object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Backend(format!("Failed to delete {}: {}", key, e))),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let metadata = fs::metadata(self.full_path(key))
            .await
            .map_err(|e| Self::not_found_or(key, "stat", e))?;

        let modified = metadata
            .modified()
            .map_err(|e| Error::Backend(format!("Failed to get modified time: {}", e)))?;
        let modified: DateTime<Utc> = modified.into();

        Ok(ObjectInfo {
            key: key.to_string(),
            size: metadata.len(),
            modified,
        })
    }

    async fn available_space(&self) -> Result<u64> {
        let path = self.base_path.clone();
        let space = tokio::task::spawn_blocking(move || free_space(&path))
            .await
            .map_err(|e| Error::Backend(format!("Failed to query free space: {}", e)))??;
        Ok(space)
    }

    fn location(&self) -> String {
        self.base_path.display().to_string()
    }

    fn protocols(&self) -> Vec<String> {
        vec!["file".to_string()]
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn free_space(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_object_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("repo"));
        backend.init().await.unwrap();

        assert!(!backend.exists("chunks/abc.0").await.unwrap());
        backend
            .write("chunks/abc.0", Bytes::from_static(b"shard"))
            .await
            .unwrap();
        assert!(backend.exists("chunks/abc.0").await.unwrap());
        assert_eq!(&backend.read("chunks/abc.0").await.unwrap()[..], b"shard");
        assert_eq!(backend.stat("chunks/abc.0").await.unwrap().size, 5);

        backend.delete("chunks/abc.0").await.unwrap();
        backend.delete("chunks/abc.0").await.unwrap();
        assert!(matches!(
            backend.read("chunks/abc.0").await,
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.write("config", Bytes::from_static(b"one")).await.unwrap();
        backend.write("config", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(&backend.read("config").await.unwrap()[..], b"two");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_available_space() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(backend.available_space().await.unwrap() > 0);
        assert_eq!(backend.protocols(), vec!["file".to_string()]);
    }
}
