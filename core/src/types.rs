use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Content address of a chunk: the BLAKE3 digest of its plaintext bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkID([u8; 32]);

impl ChunkID {
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short_string(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl From<blake3::Hash> for ChunkID {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl FromStr for ChunkID {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl Serialize for ChunkID {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkID {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChunkID::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ChunkID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub type SnapshotID = String;
pub type VolumeID = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Flate,
    Gzip,
    Lzma,
    Zlib,
    Zstd,
}

impl Compression {
    pub const ALL: [Compression; 6] = [
        Compression::None,
        Compression::Flate,
        Compression::Gzip,
        Compression::Lzma,
        Compression::Zlib,
        Compression::Zstd,
    ];
}

impl FromStr for Compression {
    type Err = Error;

    /// An empty string selects the default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "flate" => Ok(Compression::Flate),
            "gzip" => Ok(Compression::Gzip),
            "lzma" => Ok(Compression::Lzma),
            "zlib" => Ok(Compression::Zlib),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::Config(format!("unknown compression type: {other}"))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Flate => "flate",
            Compression::Gzip => "gzip",
            Compression::Lzma => "lzma",
            Compression::Zlib => "zlib",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[default]
    Aes,
    None,
}

impl FromStr for Encryption {
    type Err = Error;

    /// An empty string selects the default (AES).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "aes" => Ok(Encryption::Aes),
            "none" => Ok(Encryption::None),
            other => Err(Error::Config(format!("unknown encryption type: {other}"))),
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encryption::Aes => f.write_str("aes"),
            Encryption::None => f.write_str("none"),
        }
    }
}

/// Current layout version of the plaintext repository config.
pub const REPO_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub id: String,
    pub created: chrono::DateTime<chrono::Utc>,
    pub kdf_params: KdfParams,
    /// Data key wrapped with the password-derived master key. Absent for
    /// repositories created without a password.
    pub wrapped_key: Option<Vec<u8>>,
    pub defaults: StoreDefaults,
    /// Backend labels in shard placement order.
    #[serde(default)]
    pub backends: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    pub memory: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

/// Per-repository defaults used when a store request leaves a setting unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDefaults {
    pub compression: Compression,
    pub encryption: Encryption,
    pub tolerance: usize,
}

impl RepoConfig {
    pub fn new(defaults: StoreDefaults) -> Self {
        Self {
            version: REPO_FORMAT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            created: chrono::Utc::now(),
            kdf_params: KdfParams::default(),
            wrapped_key: None,
            defaults,
            backends: Vec::new(),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        use rand::RngCore;
        let mut salt = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        Self {
            algorithm: "argon2id".to_string(),
            iterations: 1,
            memory: 65536,
            parallelism: 4,
            salt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_hex_roundtrip() {
        let id = ChunkID::from_data(b"shardsnap");
        let parsed: ChunkID = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short_string().len(), 8);
    }

    #[test]
    fn test_compression_names() {
        for compression in Compression::ALL {
            let parsed: Compression = compression.to_string().parse().unwrap();
            assert_eq!(parsed, compression);
        }
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
        assert!(matches!("brotli".parse::<Compression>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_encryption_names() {
        assert_eq!("".parse::<Encryption>().unwrap(), Encryption::Aes);
        assert_eq!("AES".parse::<Encryption>().unwrap(), Encryption::Aes);
        assert_eq!("none".parse::<Encryption>().unwrap(), Encryption::None);
        assert!(matches!("rot13".parse::<Encryption>(), Err(Error::Config(_))));
    }
}
