use crate::{ChunkID, Error, Result};
use fastcdc::v2020::{FastCDC, StreamCDC};
use std::io::Read;

// Bounds accepted by FastCDC v2020; values outside them make it panic.
const MIN_SIZE_RANGE: (u32, u32) = (64, 1_048_576);
const AVG_SIZE_RANGE: (u32, u32) = (256, 4_194_304);
const MAX_SIZE_RANGE: (u32, u32) = (1024, 16_777_216);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkerConfig {
    /// Derives minimum and maximum sizes as a quarter and four times the
    /// target average.
    pub fn with_average(avg_size: u32) -> Self {
        Self {
            min_size: avg_size / 4,
            avg_size,
            max_size: avg_size.saturating_mul(4),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, value: u32, (lo, hi): (u32, u32)| {
            if value < lo || value > hi {
                Err(Error::Config(format!(
                    "chunker {name} size {value} outside of {lo}..={hi}"
                )))
            } else {
                Ok(())
            }
        };
        check("minimum", self.min_size, MIN_SIZE_RANGE)?;
        check("average", self.avg_size, AVG_SIZE_RANGE)?;
        check("maximum", self.max_size, MAX_SIZE_RANGE)?;

        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(Error::Config(format!(
                "chunker sizes must satisfy min <= avg <= max ({} / {} / {})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::with_average(1024 * 1024)
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn chunk_data(&self, data: &[u8]) -> Vec<Chunk> {
        let chunker = FastCDC::new(
            data,
            self.config.min_size,
            self.config.avg_size,
            self.config.max_size,
        );
        chunker
            .map(|chunk| Chunk {
                offset: chunk.offset as u64,
                data: data[chunk.offset..chunk.offset + chunk.length].to_vec(),
            })
            .collect()
    }

    /// Lazily splits `reader` into content-defined chunks. Only one chunk
    /// (at most `max_size` bytes) is buffered at a time.
    pub fn chunks<R: Read>(&self, reader: R) -> Chunks<R> {
        Chunks {
            inner: StreamCDC::new(
                reader,
                self.config.min_size,
                self.config.avg_size,
                self.config.max_size,
            ),
        }
    }
}

pub struct Chunks<R: Read> {
    inner: StreamCDC<R>,
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        Some(
            next.map(|chunk| Chunk {
                offset: chunk.offset,
                data: chunk.data,
            })
            .map_err(|e| match e {
                fastcdc::v2020::Error::IoError(io) => Error::Io(io),
                other => Error::Other(format!("chunker: {other:?}")),
            }),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn id(&self) -> ChunkID {
        ChunkID::from_data(&self.data)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::collections::HashSet;
    use std::io::Cursor;

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_chunking() {
        let chunker = Chunker::new(ChunkerConfig::with_average(1024)).unwrap();
        let data = vec![0u8; 10000];
        let chunks = chunker.chunk_data(&data);

        assert!(!chunks.is_empty());

        let total_size: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total_size, data.len());
    }

    #[test]
    fn test_stream_matches_slice() {
        let chunker = Chunker::new(ChunkerConfig::with_average(4096)).unwrap();
        let data = random_bytes(200_000, 7);

        let from_slice: Vec<ChunkID> = chunker.chunk_data(&data).iter().map(Chunk::id).collect();
        let from_stream: Vec<ChunkID> = chunker
            .chunks(Cursor::new(&data))
            .map(|c| c.unwrap().id())
            .collect();

        assert_eq!(from_slice, from_stream);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        assert_eq!(chunker.chunks(Cursor::new(Vec::<u8>::new())).count(), 0);
    }

    #[test]
    fn test_short_input_yields_single_chunk() {
        let chunker = Chunker::new(ChunkerConfig::with_average(4096)).unwrap();
        let data = random_bytes(100, 1);
        let chunks: Vec<Chunk> = chunker
            .chunks(Cursor::new(&data))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, data);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn test_hard_cut_at_max_size() {
        let config = ChunkerConfig::with_average(1024);
        let chunker = Chunker::new(config).unwrap();
        let data = vec![0xAAu8; 50_000];
        for chunk in chunker.chunk_data(&data) {
            assert!(chunk.len() <= config.max_size as usize);
        }
    }

    #[test]
    fn test_boundaries_realign_after_insertion() {
        let chunker = Chunker::new(ChunkerConfig::with_average(4096)).unwrap();
        let original = random_bytes(1_000_000, 42);

        let insert_at = original.len() / 2;
        let mut modified = original[..insert_at].to_vec();
        modified.extend_from_slice(&random_bytes(777, 99));
        modified.extend_from_slice(&original[insert_at..]);

        let before = chunker.chunk_data(&original);
        let after = chunker.chunk_data(&modified);

        // Every chunk that ends before the insertion point is untouched.
        let untouched_prefix: Vec<ChunkID> = before
            .iter()
            .filter(|c| c.offset as usize + c.len() <= insert_at)
            .map(Chunk::id)
            .collect();
        let after_ids: Vec<ChunkID> = after.iter().map(Chunk::id).collect();
        assert_eq!(&after_ids[..untouched_prefix.len()], &untouched_prefix[..]);

        // Boundaries resynchronize shortly after the insertion.
        let after_set: HashSet<ChunkID> = after_ids.iter().copied().collect();
        let shared = before.iter().filter(|c| after_set.contains(&c.id())).count();
        assert!(shared * 10 >= before.len() * 9, "{shared} of {}", before.len());
        assert_eq!(before.last().unwrap().id(), after.last().unwrap().id());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Chunker::new(ChunkerConfig::with_average(64)),
            Err(Error::Config(_))
        ));
        let inverted = ChunkerConfig {
            min_size: 8192,
            avg_size: 4096,
            max_size: 16384,
        };
        assert!(inverted.validate().is_err());
    }
}
