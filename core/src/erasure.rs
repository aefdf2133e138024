use crate::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;

// GF(2^8) limits the total shard count.
const MAX_SHARDS: usize = 256;

/// Systematic Reed-Solomon coding over GF(2^8).
///
/// The first `data_parts` shards are the payload split into equal slices,
/// the last one zero-padded. Any `parity_parts` shards may go missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasureCoder {
    data_parts: usize,
    parity_parts: usize,
}

impl ErasureCoder {
    pub fn new(data_parts: usize, parity_parts: usize) -> Result<Self> {
        if data_parts == 0 {
            return Err(Error::Config("data parts must be at least 1".to_string()));
        }
        if data_parts + parity_parts > MAX_SHARDS {
            return Err(Error::Config(format!(
                "at most {MAX_SHARDS} shards supported, got {}",
                data_parts + parity_parts
            )));
        }
        Ok(Self {
            data_parts,
            parity_parts,
        })
    }

    pub fn data_parts(&self) -> usize {
        self.data_parts
    }

    pub fn parity_parts(&self) -> usize {
        self.parity_parts
    }

    pub fn total_parts(&self) -> usize {
        self.data_parts + self.parity_parts
    }

    pub fn shard_size(&self, payload_len: usize) -> usize {
        payload_len.div_ceil(self.data_parts).max(1)
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        let shard_size = self.shard_size(payload.len());
        let mut shards: Vec<Vec<u8>> = (0..self.total_parts())
            .map(|i| {
                let start = (i * shard_size).min(payload.len());
                let end = ((i + 1) * shard_size).min(payload.len());
                let mut shard = if i < self.data_parts {
                    payload[start..end].to_vec()
                } else {
                    Vec::new()
                };
                shard.resize(shard_size, 0);
                shard
            })
            .collect();

        if self.parity_parts > 0 {
            self.reed_solomon()?
                .encode(&mut shards)
                .map_err(|e| Error::Erasure(e.to_string()))?;
        }
        Ok(shards)
    }

    /// Rebuilds the payload from whatever shards survived. Missing or
    /// rejected shards are `None`.
    pub fn decode(&self, mut shards: Vec<Option<Vec<u8>>>, payload_len: usize) -> Result<Vec<u8>> {
        if shards.len() != self.total_parts() {
            return Err(Error::Erasure(format!(
                "expected {} shards, got {}",
                self.total_parts(),
                shards.len()
            )));
        }
        let shard_size = self.shard_size(payload_len);
        let present = shards
            .iter()
            .filter(|s| matches!(s, Some(shard) if shard.len() == shard_size))
            .count();
        if present < self.data_parts {
            return Err(Error::Erasure(format!(
                "{present} of {} required shards present",
                self.data_parts
            )));
        }
        for shard in shards.iter_mut() {
            if shard.as_ref().is_some_and(|s| s.len() != shard_size) {
                *shard = None;
            }
        }

        let missing_data = shards[..self.data_parts].iter().any(Option::is_none);
        if missing_data {
            self.reed_solomon()?
                .reconstruct_data(&mut shards)
                .map_err(|e| Error::Erasure(e.to_string()))?;
        }

        let mut payload = Vec::with_capacity(shard_size * self.data_parts);
        for shard in shards.into_iter().take(self.data_parts) {
            let shard = shard.ok_or_else(|| Error::Erasure("data shard missing".to_string()))?;
            payload.extend_from_slice(&shard);
        }
        payload.truncate(payload_len);
        Ok(payload)
    }

    fn reed_solomon(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_parts, self.parity_parts).map_err(|e| Error::Erasure(e.to_string()))
    }
}
