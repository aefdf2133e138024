pub mod local;
pub mod resilient;

pub use local::LocalBackend;
pub use resilient::{ResilientStorage, RetryPolicy};
pub use shardsnap_core::memory::MemoryStorage;

use shardsnap_core::storage::Storage;
use shardsnap_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Opens the backend a location URL names.
///
/// * `file:///path` or a bare path - [`LocalBackend`] with retries
/// * `memory://name` - volatile [`MemoryStorage`]
pub fn open_backend(url: &str) -> Result<Arc<dyn Storage>> {
    open_backend_with(url, RetryPolicy::default())
}

pub fn open_backend_with(url: &str, policy: RetryPolicy) -> Result<Arc<dyn Storage>> {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("file", url),
    };
    debug!(scheme, location = rest, "Opening backend");

    match scheme {
        "file" if !rest.is_empty() => Ok(Arc::new(ResilientStorage::new(LocalBackend::new(rest), policy))),
        "memory" => Ok(Arc::new(MemoryStorage::new(rest))),
        "file" => Err(Error::Config(format!("empty path in backend url '{url}'"))),
        other => Err(Error::Config(format!(
            "unsupported backend scheme '{other}' in '{url}' (supported: file, memory)"
        ))),
    }
}

/// Opens every location, in order. Order matters: it decides shard placement.
pub fn open_backends<S: AsRef<str>>(urls: &[S]) -> Result<Vec<Arc<dyn Storage>>> {
    if urls.is_empty() {
        return Err(Error::Config("no repository locations given".to_string()));
    }
    urls.iter().map(|url| open_backend(url.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_schemes() {
        assert_eq!(open_backend("file:///tmp/repo").unwrap().location(), "/tmp/repo");
        assert_eq!(open_backend("/tmp/repo").unwrap().protocols(), vec!["file".to_string()]);
        assert_eq!(open_backend("memory://scratch").unwrap().location(), "memory://scratch");
        assert!(matches!(open_backend("s3://bucket"), Err(Error::Config(_))));
        assert!(matches!(open_backend("file://"), Err(Error::Config(_))));
        assert!(open_backends::<&str>(&[]).is_err());
    }

    #[tokio::test]
    async fn test_repository_over_local_backends() {
        let dirs: Vec<tempfile::TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        let urls: Vec<String> = dirs
            .iter()
            .map(|d| format!("file://{}", d.path().display()))
            .collect();

        let defaults = shardsnap_core::StoreDefaults {
            tolerance: 1,
            ..Default::default()
        };
        shardsnap_core::Repository::init(open_backends(&urls).unwrap(), Some("pw"), defaults)
            .await
            .unwrap();
        for dir in &dirs {
            assert!(dir.path().join("config").exists());
            assert!(dir.path().join("repository").exists());
            assert!(dir.path().join("backend-id").exists());
        }

        let repo = shardsnap_core::Repository::open(open_backends(&urls).unwrap(), Some("pw"))
            .await
            .unwrap();
        assert_eq!(repo.config().defaults.tolerance, 1);

        let reversed: Vec<String> = urls.iter().rev().cloned().collect();
        let reordered = shardsnap_core::Repository::open(open_backends(&reversed).unwrap(), Some("pw"))
            .await
            .unwrap();
        assert_eq!(reordered.backends().locations(), repo.backends().locations());
    }
}
