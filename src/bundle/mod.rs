//! Chunked bundle container.
//!
//! # Layout
//! ```text
//! 0    i32 uncompressed_size
//! 4    i32 compressed_size        sum of the chunk table
//! 8    i32 head_size              chunk_count * 4 + 48
//! 12   i32 compressor             raw Oodle id, see CompressorId
//! 16   i32 unknown                always 1
//! 20   i64 size_decompressed      == uncompressed_size
//! 28   i64 size_compressed        == compressed_size
//! 36   i32 chunk_count
//! 40   i32 chunk_size             262144 in shipped bundles
//! 44   i32 reserved[4]            zero
//! 60   i32 chunk_sizes[chunk_count]
//!      compressed chunks, back to back
//! ```
//! Every chunk decompresses to `chunk_size` bytes except the last, which
//! holds the remainder. A chunk is the smallest unit that is ever
//! decompressed.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::codec::{compress_chunks, Compressor, CompressorId};
use crate::cursor::Storage;
use crate::error::{Error, Result};

pub const BUNDLE_HEADER_LEN: u64 = 60;
pub const DEFAULT_CHUNK_SIZE: i32 = 262_144;
/// Appended to an index bundle path to get its file name.
pub const BUNDLE_EXTENSION: &str = ".bundle.bin";

/// Bytes of `head_size` that are not the chunk table.
const HEAD_SIZE_BASE: i32 = 48;

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeader {
    pub uncompressed_size: i32,
    pub compressed_size:   i32,
    pub head_size:         i32,
    pub compressor:        CompressorId,
    pub unknown:           i32,
    pub size_decompressed: i64,
    pub size_compressed:   i64,
    pub chunk_count:       i32,
    pub chunk_size:        i32,
    pub reserved:          [i32; 4],
}

impl BundleHeader {
    /// Header of a bundle with no content yet.
    pub fn empty(compressor: CompressorId, chunk_size: i32) -> Self {
        Self {
            uncompressed_size: 0,
            compressed_size:   0,
            head_size:         HEAD_SIZE_BASE,
            compressor,
            unknown:           1,
            size_decompressed: 0,
            size_compressed:   0,
            chunk_count:       0,
            chunk_size,
            reserved:          [0; 4],
        }
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let uncompressed_size = r.read_i32::<LittleEndian>()?;
        let compressed_size = r.read_i32::<LittleEndian>()?;
        let head_size = r.read_i32::<LittleEndian>()?;
        let compressor = CompressorId::from_raw(r.read_i32::<LittleEndian>()?);
        let unknown = r.read_i32::<LittleEndian>()?;
        let size_decompressed = r.read_i64::<LittleEndian>()?;
        let size_compressed = r.read_i64::<LittleEndian>()?;
        let chunk_count = r.read_i32::<LittleEndian>()?;
        let chunk_size = r.read_i32::<LittleEndian>()?;
        let mut reserved = [0i32; 4];
        for v in &mut reserved {
            *v = r.read_i32::<LittleEndian>()?;
        }

        let header = Self {
            uncompressed_size,
            compressed_size,
            head_size,
            compressor,
            unknown,
            size_decompressed,
            size_compressed,
            chunk_count,
            chunk_size,
            reserved,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_i32::<LittleEndian>(self.uncompressed_size)?;
        w.write_i32::<LittleEndian>(self.compressed_size)?;
        w.write_i32::<LittleEndian>(self.head_size)?;
        w.write_i32::<LittleEndian>(self.compressor.raw())?;
        w.write_i32::<LittleEndian>(self.unknown)?;
        w.write_i64::<LittleEndian>(self.size_decompressed)?;
        w.write_i64::<LittleEndian>(self.size_compressed)?;
        w.write_i32::<LittleEndian>(self.chunk_count)?;
        w.write_i32::<LittleEndian>(self.chunk_size)?;
        for v in self.reserved {
            w.write_i32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.uncompressed_size < 0 || self.chunk_count < 0 {
            return Err(Error::corrupt(0, "negative bundle size or chunk count"));
        }
        if self.chunk_count == 0 {
            if self.uncompressed_size != 0 {
                return Err(Error::corrupt(0, "bundle has content but no chunks"));
            }
            return Ok(());
        }
        if self.chunk_size <= 0 {
            return Err(Error::corrupt(36, format!("chunk size {}", self.chunk_size)));
        }
        let expected = (self.uncompressed_size as i64 + self.chunk_size as i64 - 1) / self.chunk_size as i64;
        if expected != self.chunk_count as i64 {
            return Err(Error::corrupt(
                36,
                format!("{} chunks cannot hold {} bytes", self.chunk_count, self.uncompressed_size),
            ));
        }
        Ok(())
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────────

pub struct Bundle<S: Storage> {
    stream:        S,
    header:        BundleHeader,
    chunk_sizes:   Vec<u32>,
    /// Absolute stream offset of each chunk.
    chunk_offsets: Vec<u64>,
    compressor:    Arc<dyn Compressor>,
}

impl<S: Storage> Bundle<S> {
    /// Parses the header and chunk table. Chunk payloads are not touched.
    pub fn open(mut stream: S, compressor: Arc<dyn Compressor>) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        let header = BundleHeader::read(&mut stream)?;

        let total = stream.total_len()?;
        let table_end = BUNDLE_HEADER_LEN + header.chunk_count as u64 * 4;
        if table_end > total {
            return Err(Error::corrupt(total, format!(
                "chunk table of {} entries ends at {} past end of bundle", header.chunk_count, table_end,
            )));
        }

        let mut chunk_sizes = Vec::with_capacity(header.chunk_count as usize);
        for i in 0..header.chunk_count {
            let size = stream.read_i32::<LittleEndian>()?;
            let size = u32::try_from(size).map_err(|_| {
                Error::corrupt(BUNDLE_HEADER_LEN + i as u64 * 4, format!("chunk size {}", size))
            })?;
            chunk_sizes.push(size);
        }

        let mut chunk_offsets = Vec::with_capacity(chunk_sizes.len());
        let mut at = BUNDLE_HEADER_LEN + chunk_sizes.len() as u64 * 4;
        for &size in &chunk_sizes {
            chunk_offsets.push(at);
            at += size as u64;
        }
        if at > total {
            return Err(Error::corrupt(total, format!("chunks end at {} past end of bundle", at)));
        }

        Ok(Self { stream, header, chunk_sizes, chunk_offsets, compressor })
    }

    /// Writes an empty bundle to `stream` and opens it.
    pub fn create(
        mut stream: S,
        compressor: Arc<dyn Compressor>,
        id: CompressorId,
        chunk_size: i32,
    ) -> Result<Self> {
        if chunk_size <= 0 {
            return Err(Error::ArgumentInvalid(format!("chunk size {}", chunk_size)));
        }
        stream.seek(SeekFrom::Start(0))?;
        BundleHeader::empty(id, chunk_size).write(&mut stream)?;
        stream.set_len(BUNDLE_HEADER_LEN)?;
        stream.flush()?;
        Self::open(stream, compressor)
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    pub fn chunk_sizes(&self) -> &[u32] {
        &self.chunk_sizes
    }

    pub fn uncompressed_size(&self) -> usize {
        self.header.uncompressed_size as usize
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Decompressed length of chunk `i`.
    fn chunk_len(&self, i: usize) -> usize {
        let chunk_size = self.header.chunk_size as usize;
        if i + 1 == self.chunk_sizes.len() {
            self.uncompressed_size() - chunk_size * i
        } else {
            chunk_size
        }
    }

    fn read_chunk(&mut self, i: usize) -> Result<Vec<u8>> {
        let mut packed = vec![0u8; self.chunk_sizes[i] as usize];
        self.stream.seek(SeekFrom::Start(self.chunk_offsets[i]))?;
        self.stream.read_exact(&mut packed)?;
        Ok(self.compressor.decompress(&packed, self.chunk_len(i))?)
    }

    /// Returns `len` bytes starting at `offset`, decompressing only the
    /// chunks that cover them.
    pub fn read_range(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.uncompressed_size())
            .ok_or_else(|| {
                Error::ArgumentInvalid(format!(
                    "range {}+{} outside bundle of {} bytes",
                    offset,
                    len,
                    self.uncompressed_size()
                ))
            })?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let chunk_size = self.header.chunk_size as usize;
        let first = offset / chunk_size;
        let last = (end - 1) / chunk_size;

        let mut out = Vec::with_capacity((last - first + 1) * chunk_size);
        for i in first..=last {
            out.extend_from_slice(&self.read_chunk(i)?);
        }
        let skip = offset - first * chunk_size;
        out.drain(..skip);
        out.truncate(len);
        Ok(out)
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read_range(0, self.uncompressed_size())
    }

    /// Replaces the whole content. The compressor id and chunk size of the
    /// current header are kept; everything else is recomputed and the stream
    /// is truncated to the new length.
    pub fn write_all(&mut self, data: &[u8], level: i32) -> Result<()> {
        let uncompressed_size = i32::try_from(data.len())
            .map_err(|_| Error::ArgumentInvalid(format!("{} bytes do not fit in a bundle", data.len())))?;
        let chunk_size = if self.header.chunk_size > 0 { self.header.chunk_size } else { DEFAULT_CHUNK_SIZE };

        let chunks: Vec<&[u8]> = data.chunks(chunk_size as usize).collect();
        let packed = compress_chunks(self.compressor.as_ref(), self.header.compressor, &chunks, level)?;

        let compressed: usize = packed.iter().map(Vec::len).sum();
        let compressed_size = i32::try_from(compressed)
            .map_err(|_| Error::ArgumentInvalid(format!("{} compressed bytes do not fit in a bundle", compressed)))?;
        let chunk_count = chunks.len() as i32;

        let header = BundleHeader {
            uncompressed_size,
            compressed_size,
            head_size: chunk_count * 4 + HEAD_SIZE_BASE,
            compressor: self.header.compressor,
            unknown: self.header.unknown,
            size_decompressed: uncompressed_size as i64,
            size_compressed: compressed_size as i64,
            chunk_count,
            chunk_size,
            reserved: self.header.reserved,
        };

        self.stream.seek(SeekFrom::Start(0))?;
        header.write(&mut self.stream)?;
        for chunk in &packed {
            self.stream.write_i32::<LittleEndian>(chunk.len() as i32)?;
        }
        let mut chunk_offsets = Vec::with_capacity(packed.len());
        let mut at = BUNDLE_HEADER_LEN + packed.len() as u64 * 4;
        for chunk in &packed {
            chunk_offsets.push(at);
            at += chunk.len() as u64;
            self.stream.write_all(chunk)?;
        }
        self.stream.set_len(at)?;
        self.stream.flush()?;

        debug!(
            uncompressed = uncompressed_size,
            compressed = compressed_size,
            chunks = chunk_count,
            "bundle written"
        );

        self.chunk_sizes = packed.iter().map(|c| c.len() as u32).collect();
        self.chunk_offsets = chunk_offsets;
        self.header = header;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Lz4Compressor, StoredCompressor};
    use std::io::Cursor;

    fn stored(chunk_size: i32) -> Bundle<Cursor<Vec<u8>>> {
        Bundle::create(Cursor::new(Vec::new()), Arc::new(StoredCompressor), CompressorId::Kraken, chunk_size)
            .unwrap()
    }

    #[test]
    fn two_chunks_with_short_tail() {
        let mut b = stored(4);
        b.write_all(&[1, 2, 3, 4, 5, 6, 7], 4).unwrap();

        assert_eq!(b.header().chunk_count, 2);
        assert_eq!(b.header().head_size, 56);
        assert_eq!(b.chunk_sizes(), &[4, 3]);
        assert_eq!(b.get_ref().get_ref().len(), 60 + 8 + 7);

        assert_eq!(b.read_range(0, 7).unwrap(), [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(b.read_range(4, 3).unwrap(), [5, 6, 7]);
        assert_eq!(b.read_range(3, 2).unwrap(), [4, 5]);
    }

    #[test]
    fn reopen_keeps_compressor_id() {
        let mut b = stored(4);
        b.write_all(b"hello", 4).unwrap();
        let mut reopened = Bundle::open(b.into_inner(), Arc::new(StoredCompressor)).unwrap();
        assert_eq!(reopened.header().compressor, CompressorId::Kraken);
        assert_eq!(reopened.header().unknown, 1);
        assert_eq!(reopened.read_all().unwrap(), b"hello");
    }

    #[test]
    fn empty_content_has_no_chunks() {
        let mut b = stored(4);
        b.write_all(&[], 4).unwrap();
        assert_eq!(b.header().chunk_count, 0);
        assert_eq!(b.header().head_size, 48);
        assert_eq!(b.get_ref().get_ref().len() as u64, BUNDLE_HEADER_LEN);
        assert!(b.read_all().unwrap().is_empty());
    }

    #[test]
    fn shrinking_truncates_stream() {
        let mut b = Bundle::create(
            Cursor::new(Vec::new()),
            Arc::new(Lz4Compressor),
            CompressorId::Leviathan,
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap();
        b.write_all(&vec![7u8; 10_000], 4).unwrap();
        let big = b.get_ref().get_ref().len();
        b.write_all(b"x", 4).unwrap();
        assert!(b.get_ref().get_ref().len() < big);
        assert_eq!(b.read_all().unwrap(), b"x");
    }

    #[test]
    fn out_of_range_read_is_rejected() {
        let mut b = stored(4);
        b.write_all(&[1, 2, 3], 4).unwrap();
        assert!(matches!(b.read_range(2, 2), Err(Error::ArgumentInvalid(_))));
        assert!(matches!(b.read_range(usize::MAX, 2), Err(Error::ArgumentInvalid(_))));
    }

    #[test]
    fn chunk_table_past_end_is_corrupt() {
        let mut b = stored(4);
        b.write_all(&[1, 2, 3, 4, 5], 4).unwrap();
        let mut bytes = b.into_inner().into_inner();
        bytes.truncate(bytes.len() - 1);
        let err = Bundle::open(Cursor::new(bytes), Arc::new(StoredCompressor));
        assert!(matches!(err, Err(Error::CorruptArchive { .. })));
    }

    #[test]
    fn oversized_chunk_table_is_rejected_before_reading() {
        let mut bytes = Vec::new();
        let mut header = BundleHeader::empty(CompressorId::None, 1);
        header.uncompressed_size = i32::MAX;
        header.chunk_count = i32::MAX;
        header.write(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0u8; 16]);
        let err = Bundle::open(Cursor::new(bytes), Arc::new(StoredCompressor));
        assert!(matches!(err, Err(Error::CorruptArchive { .. })));
    }

    #[test]
    fn mismatched_chunk_count_is_corrupt() {
        let mut bytes = Vec::new();
        let mut header = BundleHeader::empty(CompressorId::None, 4);
        header.uncompressed_size = 9;
        header.chunk_count = 2;
        header.write(&mut bytes).unwrap();
        assert!(matches!(BundleHeader::read(Cursor::new(bytes)), Err(Error::CorruptArchive { .. })));
    }
}
