use crate::{ChunkID, SnapshotID, VolumeID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveType {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkID,
    pub offset: u64,
    pub length: u32,
}

/// Manifest of a single stored path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub path: String,
    pub archive_type: ArchiveType,
    pub points_to: Option<String>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: i64,
    pub chunks: Vec<ChunkRef>,
    /// BLAKE3 over the whole file content, hex encoded. Empty for
    /// directories and symlinks.
    pub content_hash: String,
}

impl Archive {
    pub fn is_file(&self) -> bool {
        matches!(self.archive_type, ArchiveType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.archive_type, ArchiveType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.archive_type, ArchiveType::Symlink)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub size: u64,
    pub storage_size: u64,
    pub transferred: u64,
    pub errors: u64,
    /// Shard writes that failed within the failure tolerance.
    #[serde(default)]
    pub shard_failures: u64,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.files += other.files;
        self.dirs += other.dirs;
        self.symlinks += other.symlinks;
        self.size += other.size;
        self.storage_size += other.storage_size;
        self.transferred += other.transferred;
        self.errors += other.errors;
        self.shard_failures += other.shard_failures;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} dirs, {} symlinks, {} errors, {} Original Size, {} Storage Size",
            self.files,
            self.dirs,
            self.symlinks,
            self.errors,
            size_to_string(self.size),
            size_to_string(self.storage_size)
        )?;
        if self.shard_failures > 0 {
            write!(f, ", {} failed shard writes", self.shard_failures)?;
        }
        Ok(())
    }
}

pub fn size_to_string(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotID,
    pub date: DateTime<Utc>,
    pub description: String,
    pub stats: Stats,
    pub archives: BTreeMap<String, Archive>,
}

impl Snapshot {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: short_uuid(),
            date: Utc::now(),
            description: description.into(),
            stats: Stats::default(),
            archives: BTreeMap::new(),
        }
    }

    pub fn add_archive(&mut self, archive: Archive) {
        self.archives.insert(archive.path.clone(), archive);
    }

    pub fn archive(&self, path: &str) -> Option<&Archive> {
        self.archives.get(path)
    }
}

/// Append-only, creation-ordered list of snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeID,
    pub name: String,
    pub description: String,
    pub snapshots: Vec<SnapshotID>,
}

impl Volume {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: short_uuid(),
            name: name.into(),
            description: description.into(),
            snapshots: Vec::new(),
        }
    }

    pub fn add_snapshot(&mut self, id: SnapshotID) {
        if !self.snapshots.contains(&id) {
            self.snapshots.push(id);
        }
    }
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_display() {
        let stats = Stats {
            files: 2,
            dirs: 1,
            symlinks: 0,
            size: 3 * 1024 * 1024,
            storage_size: 1536,
            transferred: 0,
            errors: 1,
            shard_failures: 0,
        };
        assert_eq!(
            stats.to_string(),
            "2 files, 1 dirs, 0 symlinks, 1 errors, 3.00 MiB Original Size, 1.50 KiB Storage Size"
        );

        let degraded = Stats {
            shard_failures: 2,
            ..stats
        };
        assert!(degraded.to_string().ends_with("Storage Size, 2 failed shard writes"));
    }

    #[test]
    fn test_volume_is_append_only() {
        let mut volume = Volume::new("home", "");
        volume.add_snapshot("a".to_string());
        volume.add_snapshot("b".to_string());
        volume.add_snapshot("a".to_string());
        assert_eq!(volume.snapshots, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_stats_add() {
        let mut total = Stats::default();
        total.add(&Stats {
            files: 1,
            size: 10,
            ..Stats::default()
        });
        total.add(&Stats {
            dirs: 1,
            errors: 1,
            ..Stats::default()
        });
        assert_eq!((total.files, total.dirs, total.size, total.errors), (1, 1, 10, 1));
    }
}
