//! Compressor seam for bundle chunks.
//!
//! # Identity rules
//! Every bundle header names the compressor that produced its chunks as a
//! raw `i32` (the Oodle format enum). That value is preserved verbatim when a
//! bundle is rewritten; [`CompressorId::Other`] keeps values this build has no
//! name for.
//!
//! The actual LZ primitive is supplied by the embedding application through
//! [`Compressor`]. This crate ships two built-ins that do not need a native
//! library: [`StoredCompressor`] (pass-through) and [`Lz4Compressor`].
//!
//! # Contract
//! `decompress` must produce exactly `expected_len` bytes. Anything else is a
//! [`CodecError::SizeMismatch`] and fatal to the current read.

use thiserror::Error;

// ── Levels ───────────────────────────────────────────────────────────────────

/// "Normal" in the Oodle level scale, used for every chunk unless configured.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 4;

// ── CompressorId ─────────────────────────────────────────────────────────────

/// Compressor discriminant as stored in a bundle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressorId {
    None,
    Kraken,
    Mermaid,
    Selkie,
    Hydra,
    Leviathan,
    Other(i32),
}

impl CompressorId {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            3  => CompressorId::None,
            8  => CompressorId::Kraken,
            9  => CompressorId::Mermaid,
            11 => CompressorId::Selkie,
            12 => CompressorId::Hydra,
            13 => CompressorId::Leviathan,
            n  => CompressorId::Other(n),
        }
    }

    /// The value written to disk.
    pub fn raw(self) -> i32 {
        match self {
            CompressorId::None      => 3,
            CompressorId::Kraken    => 8,
            CompressorId::Mermaid   => 9,
            CompressorId::Selkie    => 11,
            CompressorId::Hydra     => 12,
            CompressorId::Leviathan => 13,
            CompressorId::Other(n)  => n,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            CompressorId::None      => "none",
            CompressorId::Kraken    => "kraken",
            CompressorId::Mermaid   => "mermaid",
            CompressorId::Selkie    => "selkie",
            CompressorId::Hydra     => "hydra",
            CompressorId::Leviathan => "leviathan",
            CompressorId::Other(_)  => "unknown",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"      => Some(CompressorId::None),
            "kraken"    => Some(CompressorId::Kraken),
            "mermaid"   => Some(CompressorId::Mermaid),
            "selkie"    => Some(CompressorId::Selkie),
            "hydra"     => Some(CompressorId::Hydra),
            "leviathan" => Some(CompressorId::Leviathan),
            _           => None,
        }
    }
}

impl Default for CompressorId {
    fn default() -> Self { CompressorId::Leviathan }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Decompressed size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// The compressor named in a bundle header is not available in this build.
    #[error("Compressor {0} is not available in this build")]
    Unsupported(i32),
}

// ── Compressor trait ─────────────────────────────────────────────────────────

pub trait Compressor: Send + Sync {
    fn compress(&self, compressor: CompressorId, input: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

fn check_len(out: Vec<u8>, expected: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() != expected {
        return Err(CodecError::SizeMismatch { expected, actual: out.len() });
    }
    Ok(out)
}

// ── Built-in implementations ─────────────────────────────────────────────────

/// Chunks stored verbatim. Matches the on-disk `None` compressor.
pub struct StoredCompressor;
impl Compressor for StoredCompressor {
    fn compress(&self, _: CompressorId, input: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        check_len(input.to_vec(), expected_len)
    }
}

/// LZ4 block format. Ignores the requested compressor id and level, so its
/// output is only readable by this crate.
pub struct Lz4Compressor;
impl Compressor for Lz4Compressor {
    fn compress(&self, _: CompressorId, input: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(input))
    }
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_len(out, expected_len)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CLI name to a built-in compressor.
pub fn get_compressor(name: &str) -> Result<Box<dyn Compressor>, CodecError> {
    match name.to_lowercase().as_str() {
        "none" | "stored" => Ok(Box::new(StoredCompressor)),
        "lz4"             => Ok(Box::new(Lz4Compressor)),
        other => Err(CodecError::Unsupported(
            CompressorId::from_name(other).map(CompressorId::raw).unwrap_or(-1),
        )),
    }
}

// ── Chunk batches ────────────────────────────────────────────────────────────

/// Compress independent chunks, returning one payload per chunk in order.
///
/// With the `parallel` feature the chunks are spread over the Rayon pool; the
/// output is identical either way. The first error wins.
pub fn compress_chunks(
    compressor: &dyn Compressor,
    id:         CompressorId,
    chunks:     &[&[u8]],
    level:      i32,
) -> Result<Vec<Vec<u8>>, CodecError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        chunks
            .par_iter()
            .map(|chunk| compressor.compress(id, chunk, level))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks
            .iter()
            .map(|chunk| compressor.compress(id, chunk, level))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_ids_survive_unknown_values() {
        assert_eq!(CompressorId::from_raw(13), CompressorId::Leviathan);
        assert_eq!(CompressorId::from_raw(42), CompressorId::Other(42));
        assert_eq!(CompressorId::Other(42).raw(), 42);
        assert_eq!(CompressorId::default().raw(), 13);
    }

    #[test]
    fn stored_rejects_wrong_length() {
        let out = StoredCompressor.decompress(b"abc", 4);
        assert!(matches!(out, Err(CodecError::SizeMismatch { expected: 4, actual: 3 })));
    }

    #[test]
    fn lz4_roundtrip_with_expected_len() {
        let data = b"abababababababababababababab".repeat(10);
        let packed = Lz4Compressor.compress(CompressorId::Leviathan, &data, 4).unwrap();
        assert!(packed.len() < data.len());
        let unpacked = Lz4Compressor.decompress(&packed, data.len()).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn unknown_compressor_name_is_unsupported() {
        assert!(matches!(get_compressor("leviathan"), Err(CodecError::Unsupported(13))));
        assert!(get_compressor("lz4").is_ok());
    }
}
