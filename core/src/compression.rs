use crate::{Compression, Error, Result};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use std::io::{Read, Write};

const ZSTD_LEVEL: i32 = 3;

pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let level = flate2::Compression::default();
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Flate => finish_flate(DeflateEncoder::new(Vec::new(), level), data),
        Compression::Gzip => finish_flate(GzEncoder::new(Vec::new(), level), data),
        Compression::Zlib => finish_flate(ZlibEncoder::new(Vec::new(), level), data),
        Compression::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_compress(&mut &data[..], &mut out)
                .map_err(|e| Error::Compression(format!("lzma compress: {e}")))?;
            Ok(out)
        }
        Compression::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| Error::Compression(format!("zstd compress: {e}"))),
    }
}

pub fn decompress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Flate => read_all(DeflateDecoder::new(data), "flate"),
        Compression::Gzip => read_all(GzDecoder::new(data), "gzip"),
        Compression::Zlib => read_all(ZlibDecoder::new(data), "zlib"),
        Compression::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_decompress(&mut &data[..], &mut out)
                .map_err(|e| Error::Compression(format!("lzma decompress: {e:?}")))?;
            Ok(out)
        }
        Compression::Zstd => zstd::decode_all(data)
            .map_err(|e| Error::Compression(format!("zstd decompress: {e}"))),
    }
}

trait FinishEncoder: Write {
    fn finish_encoder(self) -> std::io::Result<Vec<u8>>;
}

impl FinishEncoder for DeflateEncoder<Vec<u8>> {
    fn finish_encoder(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl FinishEncoder for GzEncoder<Vec<u8>> {
    fn finish_encoder(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl FinishEncoder for ZlibEncoder<Vec<u8>> {
    fn finish_encoder(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

fn finish_flate<E: FinishEncoder>(mut encoder: E, data: &[u8]) -> Result<Vec<u8>> {
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish_encoder()
        .map_err(|e| Error::Compression(e.to_string()))
}

fn read_all<R: Read>(mut decoder: R, name: &str) -> Result<Vec<u8>> {
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| Error::Compression(format!("{name} decompress: {e}")))?;
    Ok(result)
}
