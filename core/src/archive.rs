use crate::snapshot::{Archive, Snapshot, Stats};
use crate::{Error, Repository, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Decodes a file archive into memory.
///
/// Returns the plaintext and the number of chunks read.
pub async fn decode_archive_data(repository: &Repository, archive: &Archive) -> Result<(Vec<u8>, usize)> {
    let mut data = Vec::with_capacity(archive.size as usize);
    let chunks = decode_archive(repository, archive, &mut data).await?;
    Ok((data, chunks))
}

/// Streams a file archive into `writer` one chunk at a time, then checks the
/// whole-file hash.
pub async fn decode_archive<W>(repository: &Repository, archive: &Archive, writer: &mut W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    if !archive.is_file() {
        return Err(Error::Other(format!("'{}' is not a regular file", archive.path)));
    }

    let mut hasher = blake3::Hasher::new();
    for chunk in &archive.chunks {
        let data = repository.load_chunk(&chunk.id).await?;
        if data.len() != chunk.length as usize {
            return Err(Error::ChunkCorrupt { id: chunk.id.to_hex() });
        }
        hasher.update(&data);
        writer.write_all(&data).await?;
    }
    writer.flush().await?;

    verify_hash(archive, &hasher.finalize())?;
    debug!("Decoded {} ({} chunks)", archive.path, archive.chunks.len());
    Ok(archive.chunks.len())
}

/// Checks decoded content against the hash recorded at store time.
pub fn verify_archive(archive: &Archive, data: &[u8]) -> Result<()> {
    verify_hash(archive, &blake3::hash(data))
}

fn verify_hash(archive: &Archive, hash: &blake3::Hash) -> Result<()> {
    if !archive.content_hash.is_empty() && hash.to_hex().as_str() != archive.content_hash {
        return Err(Error::ArchiveCorrupt {
            path: archive.path.clone(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub stats: Stats,
    pub failures: BTreeMap<String, String>,
}

/// Writes the archives of `snapshot` below `target`.
///
/// `filter` limits the restore to the named paths and everything below
/// them; an empty filter restores everything. A failing archive is recorded
/// and the restore moves on.
pub async fn restore_snapshot(
    repository: &Repository,
    snapshot: &Snapshot,
    target: &Path,
    filter: &[String],
) -> Result<RestoreOutcome> {
    tokio::fs::create_dir_all(target).await?;
    let mut outcome = RestoreOutcome::default();
    let mut directories = Vec::new();

    let selected = snapshot
        .archives
        .values()
        .filter(|archive| filter.is_empty() || filter.iter().any(|f| matches_filter(&archive.path, f)));

    // Archives are ordered by path, so parents come before children.
    for archive in selected {
        let destination = target.join(sanitize(&archive.path));
        match restore_archive(repository, archive, &destination).await {
            Ok(()) => {
                if archive.is_dir() {
                    outcome.stats.dirs += 1;
                    directories.push((destination, archive.mode));
                } else if archive.is_symlink() {
                    outcome.stats.symlinks += 1;
                } else {
                    outcome.stats.files += 1;
                    outcome.stats.size += archive.size;
                }
            }
            Err(e) => {
                warn!("'{}': failed to restore: {}", archive.path, e);
                outcome.stats.errors += 1;
                outcome.failures.insert(archive.path.clone(), e.to_string());
            }
        }
    }

    // Directory modes last, deepest first, so read-only dirs don't block
    // their own contents.
    for (path, mode) in directories.into_iter().rev() {
        set_mode(&path, mode).await?;
    }

    info!("Restored snapshot {}: {}", snapshot.id, outcome.stats);
    Ok(outcome)
}

async fn restore_archive(repository: &Repository, archive: &Archive, destination: &Path) -> Result<()> {
    if archive.is_dir() {
        tokio::fs::create_dir_all(destination).await?;
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if archive.is_symlink() {
        let points_to = archive
            .points_to
            .as_deref()
            .ok_or_else(|| Error::ArchiveCorrupt {
                path: archive.path.clone(),
            })?;
        return create_symlink(points_to, destination).await;
    }

    let mut file = tokio::fs::File::create(destination).await?;
    decode_archive(repository, archive, &mut file).await?;
    drop(file);
    set_mode(destination, archive.mode).await
}

fn matches_filter(path: &str, filter: &str) -> bool {
    let filter = filter.trim_end_matches('/');
    path == filter || path.strip_prefix(filter).is_some_and(|rest| rest.starts_with('/'))
}

/// Keeps only plain components so absolute or `..` paths stay below the
/// restore target.
fn sanitize(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode == 0 {
        return Ok(());
    }
    let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn create_symlink(points_to: &str, destination: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(destination).await.is_ok() {
        tokio::fs::remove_file(destination).await?;
    }
    tokio::fs::symlink(points_to, destination).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn create_symlink(_points_to: &str, destination: &Path) -> Result<()> {
    Err(Error::Other(format!(
        "symlinks are not supported here: {}",
        destination.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::memory::MemoryStorage;
    use crate::storage::Storage;
    use crate::store::{SnapshotBuilder, StoreOptions};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn stored(dir: &Path) -> (Repository, Snapshot) {
        let backends = vec![Arc::new(MemoryStorage::new(0)) as Arc<dyn Storage>];
        let repo = Repository::init(backends, Some("pw"), Default::default()).await.unwrap();
        let mut options = StoreOptions::new(dir, vec![PathBuf::from(".")], &repo.config().defaults);
        options.chunker = ChunkerConfig::with_average(1024);
        let outcome = SnapshotBuilder::new(&repo, options)
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        (repo, outcome.snapshot)
    }

    #[test]
    fn test_filter_and_sanitize() {
        assert!(matches_filter("docs/a.txt", "docs"));
        assert!(matches_filter("docs/a.txt", "docs/"));
        assert!(matches_filter("docs", "docs"));
        assert!(!matches_filter("docsx/a.txt", "docs"));
        assert_eq!(sanitize("/etc/../passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(sanitize("."), PathBuf::new());
    }

    #[tokio::test]
    async fn test_decode_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(dir.path().join("file"), &content).unwrap();

        let (repo, snapshot) = stored(dir.path()).await;
        let archive = snapshot.archive("file").unwrap();
        let (data, chunks) = decode_archive_data(&repo, archive).await.unwrap();
        assert_eq!(data, content);
        assert_eq!(chunks, archive.chunks.len());
        verify_archive(archive, &data).unwrap();

        let mut tampered = archive.clone();
        tampered.content_hash = blake3::hash(b"other").to_hex().to_string();
        assert!(matches!(
            decode_archive_data(&repo, &tampered).await,
            Err(Error::ArchiveCorrupt { .. })
        ));
        assert!(decode_archive_data(&repo, snapshot.archive(".").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/deep")).unwrap();
        std::fs::write(dir.path().join("docs/deep/note"), b"note").unwrap();
        std::fs::write(dir.path().join("top"), b"top level").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("top", dir.path().join("link")).unwrap();

        let (repo, snapshot) = stored(dir.path()).await;
        let target = tempfile::tempdir().unwrap();
        let outcome = restore_snapshot(&repo, &snapshot, target.path(), &[]).await.unwrap();
        assert_eq!(outcome.stats.files, 2);
        assert_eq!(outcome.stats.errors, 0);
        assert_eq!(std::fs::read(target.path().join("docs/deep/note")).unwrap(), b"note");
        assert_eq!(std::fs::read(target.path().join("top")).unwrap(), b"top level");
        #[cfg(unix)]
        assert_eq!(
            std::fs::read_link(target.path().join("link")).unwrap(),
            PathBuf::from("top")
        );

        let partial = tempfile::tempdir().unwrap();
        let outcome = restore_snapshot(&repo, &snapshot, partial.path(), &["docs".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.stats.files, 1);
        assert!(partial.path().join("docs/deep/note").exists());
        assert!(!partial.path().join("top").exists());
    }
}
