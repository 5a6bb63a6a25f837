//! Whole-payload compression for chunk files

use std::io::{Read, Write};

use crate::chunk::Compression;
use crate::error::{Error, Result};

/// Compress a payload region according to `compression`.
///
/// Returns `None` when no compression is configured so callers can write
/// the original buffer without copying it.
pub fn compress(data: &[u8], compression: &Compression) -> Result<Option<Vec<u8>>> {
    match compression {
        Compression::None => Ok(None),
        Compression::Zstd { level } => {
            let out = zstd::stream::encode_all(data, *level)
                .map_err(|e| Error::Compression(format!("zstd encode: {}", e)))?;
            Ok(Some(out))
        }
        Compression::Lz4 => {
            let mut encoder = lz4::EncoderBuilder::new()
                .level(4)
                .build(Vec::new())
                .map_err(|e| Error::Compression(format!("lz4 encoder: {}", e)))?;
            encoder
                .write_all(data)
                .map_err(|e| Error::Compression(format!("lz4 encode: {}", e)))?;
            let (out, result) = encoder.finish();
            result.map_err(|e| Error::Compression(format!("lz4 finish: {}", e)))?;
            Ok(Some(out))
        }
    }
}

/// Decompress a payload region, verifying the expected uncompressed size
/// when one is known (the final offset-table entry).
pub fn decompress(
    data: &[u8],
    compression: &Compression,
    expected_len: Option<usize>,
) -> Result<Vec<u8>> {
    let out = match compression {
        Compression::None => data.to_vec(),
        Compression::Zstd { .. } => zstd::stream::decode_all(data)
            .map_err(|e| Error::Compression(format!("zstd decode: {}", e)))?,
        Compression::Lz4 => {
            let mut decoder = lz4::Decoder::new(data)
                .map_err(|e| Error::Compression(format!("lz4 decoder: {}", e)))?;
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Compression(format!("lz4 decode: {}", e)))?;
            out
        }
    };
    if let Some(expected) = expected_len {
        if out.len() != expected {
            return Err(Error::Compression(format!(
                "size mismatch after decompression: expected {} bytes, got {}",
                expected,
                out.len()
            )));
        }
    }
    Ok(out)
}
