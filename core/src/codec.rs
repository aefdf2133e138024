use crate::compression::{compress, decompress};
use crate::crypto::Encryptor;
use crate::erasure::ErasureCoder;
use crate::index::{IndexEntry, ShardLocation};
use crate::{ChunkID, Compression, Encryption, Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Shard {
    pub index: usize,
    pub data: Bytes,
    pub checksum: String,
}

impl Shard {
    pub fn checksum_of(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }
}

/// A chunk after the full encode pipeline, before any shard was written.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub id: ChunkID,
    pub size: usize,
    pub encoded_size: usize,
    pub data_parts: usize,
    pub parity_parts: usize,
    pub compression: Compression,
    pub encryption: Encryption,
    pub shards: Vec<Shard>,
}

impl EncodedChunk {
    pub fn storage_size(&self) -> u64 {
        self.shards.iter().map(|s| s.data.len() as u64).sum()
    }

    pub fn into_entry(self, shards: Vec<ShardLocation>) -> IndexEntry {
        IndexEntry {
            id: self.id,
            size: self.size,
            encoded_size: self.encoded_size,
            data_parts: self.data_parts,
            parity_parts: self.parity_parts,
            compression: self.compression,
            encryption: self.encryption,
            shards,
            references: 1,
        }
    }
}

/// Turns a chunk into checksummed shards (fingerprint, compress, encrypt,
/// erasure-code) and back.
#[derive(Clone)]
pub struct ChunkCodec {
    compression: Compression,
    encryption: Encryption,
    encryptor: Option<Arc<Encryptor>>,
    erasure: ErasureCoder,
}

impl ChunkCodec {
    pub fn new(
        compression: Compression,
        encryption: Encryption,
        encryptor: Option<Arc<Encryptor>>,
        data_parts: usize,
        parity_parts: usize,
    ) -> Result<Self> {
        if encryption == Encryption::Aes && encryptor.is_none() {
            return Err(Error::Config(
                "aes encryption requested but the repository has no key".to_string(),
            ));
        }
        Ok(Self {
            compression,
            encryption,
            encryptor,
            erasure: ErasureCoder::new(data_parts, parity_parts)?,
        })
    }

    pub fn data_parts(&self) -> usize {
        self.erasure.data_parts()
    }

    pub fn parity_parts(&self) -> usize {
        self.erasure.parity_parts()
    }

    pub fn encode(&self, data: &[u8]) -> Result<EncodedChunk> {
        let id = ChunkID::from_data(data);

        let compressed = compress(self.compression, data)?;
        let payload = match self.encryption {
            Encryption::None => compressed,
            Encryption::Aes => self.encryptor()?.encrypt(&compressed)?,
        };

        let shards = self
            .erasure
            .encode(&payload)?
            .into_iter()
            .enumerate()
            .map(|(index, shard)| Shard {
                index,
                checksum: Shard::checksum_of(&shard),
                data: Bytes::from(shard),
            })
            .collect();

        debug!(
            chunk = %id.short_string(),
            size = data.len(),
            encoded = payload.len(),
            "Encoded chunk"
        );

        Ok(EncodedChunk {
            id,
            size: data.len(),
            encoded_size: payload.len(),
            data_parts: self.erasure.data_parts(),
            parity_parts: self.erasure.parity_parts(),
            compression: self.compression,
            encryption: self.encryption,
            shards,
        })
    }

    /// Decodes using the layout recorded in `entry`, not the codec's own
    /// settings, so chunks written with other options stay readable.
    pub fn decode(&self, entry: &IndexEntry, shards: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
        let erasure = ErasureCoder::new(entry.data_parts, entry.parity_parts)?;
        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < entry.data_parts {
            return Err(Error::InsufficientShards {
                id: entry.id.to_hex(),
                available,
                required: entry.data_parts,
            });
        }

        let corrupt = || Error::ChunkCorrupt {
            id: entry.id.to_hex(),
        };

        let payload = erasure.decode(shards, entry.encoded_size).map_err(|_| corrupt())?;
        let compressed = match entry.encryption {
            Encryption::None => payload,
            Encryption::Aes => self.encryptor()?.decrypt(&payload).map_err(|_| corrupt())?,
        };
        let data = decompress(entry.compression, &compressed).map_err(|_| corrupt())?;

        if data.len() != entry.size || ChunkID::from_data(&data) != entry.id {
            return Err(corrupt());
        }
        Ok(data)
    }

    fn encryptor(&self) -> Result<&Encryptor> {
        self.encryptor
            .as_deref()
            .ok_or_else(|| Error::Encryption("repository has no key".to_string()))
    }
}
