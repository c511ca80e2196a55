//! GGPK record layouts.
//!
//! Every record starts with an 8-byte header: `u32 length` (the whole record,
//! header included) and a 4-byte ASCII tag. All integers are little-endian.
//!
//! | Tag    | Body                                                                  |
//! |--------|-----------------------------------------------------------------------|
//! | `GGPK` | `u32 version`, `u64 root_offset`, `u64 first_free_offset`             |
//! | `PDIR` | `u32 name_len`, `u32 entry_count`, `[u8;32] sha256`, name, entries    |
//! | `FILE` | `u32 name_len`, `[u8;32] sha256`, name, data                          |
//! | `FREE` | `u64 next_free_offset`, unused bytes up to `length`                   |
//!
//! `name_len` counts code units including the null terminator. Names are
//! UTF-16LE, or UTF-32LE when the container version is 4. A directory entry
//! is `u32 name_hash`, `u64 offset` (12 bytes).

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cursor::NameEncoding;
use crate::error::{Error, Result};

pub const HEADER_LEN: u32 = 8;
/// Smallest region that can hold a free record (header + next pointer).
pub const FREE_RECORD_MIN: u32 = 16;
pub const CONTAINER_RECORD_LEN: u32 = 28;
pub const DIRECTORY_ENTRY_LEN: u32 = 12;

// ── Tags ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Container,
    Directory,
    File,
    Free,
}

impl RecordTag {
    pub fn from_bytes(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"GGPK" => Some(RecordTag::Container),
            b"PDIR" => Some(RecordTag::Directory),
            b"FILE" => Some(RecordTag::File),
            b"FREE" => Some(RecordTag::Free),
            _       => None,
        }
    }

    pub fn bytes(self) -> [u8; 4] {
        match self {
            RecordTag::Container => *b"GGPK",
            RecordTag::Directory => *b"PDIR",
            RecordTag::File      => *b"FILE",
            RecordTag::Free      => *b"FREE",
        }
    }
}

/// Reads the 8-byte header at the current position. `offset` is only used
/// for diagnostics.
pub fn read_header<R: Read>(r: &mut R, offset: u64) -> Result<(u32, RecordTag)> {
    let length = r.read_u32::<LittleEndian>()?;
    let mut tag = [0u8; 4];
    r.read_exact(&mut tag)?;
    let kind = RecordTag::from_bytes(tag).ok_or_else(|| {
        Error::corrupt(offset, format!("unknown record tag {:02x?}", tag))
    })?;
    if length < HEADER_LEN {
        return Err(Error::corrupt(offset, format!("record length {} is shorter than its header", length)));
    }
    Ok((length, kind))
}

fn write_header<W: Write>(w: &mut W, length: u32, tag: RecordTag) -> Result<()> {
    w.write_u32::<LittleEndian>(length)?;
    w.write_all(&tag.bytes())?;
    Ok(())
}

/// Offset and on-disk length shared by every record kind.
pub trait RecordSpan {
    fn offset(&self) -> u64;
    fn length(&self) -> u32;

    fn end(&self) -> u64 {
        self.offset() + self.length() as u64
    }
}

// ── Container ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub offset:            u64,
    pub version:           u32,
    pub root_offset:       u64,
    pub first_free_offset: u64,
}

impl ContainerRecord {
    /// Byte position of `root_offset` relative to the record.
    pub const ROOT_FIELD: u64 = 12;
    /// Byte position of `first_free_offset` relative to the record.
    pub const FIRST_FREE_FIELD: u64 = 20;

    pub fn read_body<R: Read>(r: &mut R, offset: u64) -> Result<Self> {
        Ok(ContainerRecord {
            offset,
            version:           r.read_u32::<LittleEndian>()?,
            root_offset:       r.read_u64::<LittleEndian>()?,
            first_free_offset: r.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_header(w, CONTAINER_RECORD_LEN, RecordTag::Container)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.root_offset)?;
        w.write_u64::<LittleEndian>(self.first_free_offset)?;
        Ok(())
    }

    pub fn name_encoding(&self) -> NameEncoding {
        NameEncoding::for_version(self.version)
    }
}

impl RecordSpan for ContainerRecord {
    fn offset(&self) -> u64 { self.offset }
    fn length(&self) -> u32 { CONTAINER_RECORD_LEN }
}

// ── Directory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name_hash: u32,
    pub offset:    u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub offset:        u64,
    pub length:        u32,
    pub name:          String,
    pub hash:          [u8; 32],
    pub entries:       Vec<DirectoryEntry>,
    /// Absolute position of `entries[0]`.
    pub entries_begin: u64,
}

impl DirectoryRecord {
    pub fn new(name: &str, entries: Vec<DirectoryEntry>, enc: NameEncoding) -> Self {
        let mut dir = DirectoryRecord {
            offset: 0,
            length: 0,
            name: name.to_string(),
            hash: [0u8; 32],
            entries,
            entries_begin: 0,
        };
        dir.length = dir.serialized_len(enc);
        dir
    }

    pub fn serialized_len(&self, enc: NameEncoding) -> u32 {
        HEADER_LEN + 4 + 4 + 32
            + (enc.units(&self.name) + 1) * enc.width()
            + self.entries.len() as u32 * DIRECTORY_ENTRY_LEN
    }

    /// Absolute position of the `offset` field of entry `i`.
    pub fn entry_offset_field(&self, i: usize) -> u64 {
        self.entries_begin + i as u64 * DIRECTORY_ENTRY_LEN as u64 + 4
    }

    pub fn read_body<R: Read + Seek>(r: &mut R, offset: u64, length: u32, enc: NameEncoding) -> Result<Self> {
        let name_len    = r.read_u32::<LittleEndian>()?;
        let entry_count = r.read_u32::<LittleEndian>()?;
        let mut hash = [0u8; 32];
        r.read_exact(&mut hash)?;

        let fixed = HEADER_LEN as u64 + 4 + 4 + 32;
        let expected = fixed
            + name_len as u64 * enc.width() as u64
            + entry_count as u64 * DIRECTORY_ENTRY_LEN as u64;
        if expected != length as u64 {
            return Err(Error::corrupt(offset, format!(
                "directory length {} does not match {} entries and a {}-unit name",
                length, entry_count, name_len,
            )));
        }

        let name = enc.read(r, name_len)?;
        let entries_begin = r.stream_position()?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(DirectoryEntry {
                name_hash: r.read_u32::<LittleEndian>()?,
                offset:    r.read_u64::<LittleEndian>()?,
            });
        }

        Ok(DirectoryRecord { offset, length, name, hash, entries, entries_begin })
    }

    /// Writes the whole record at the current position and updates `offset`
    /// and `entries_begin` to match.
    pub fn write<W: Write + Seek>(&mut self, w: &mut W, enc: NameEncoding) -> Result<()> {
        self.offset = w.stream_position()?;
        self.length = self.serialized_len(enc);
        write_header(w, self.length, RecordTag::Directory)?;
        w.write_u32::<LittleEndian>(enc.units(&self.name) + 1)?;
        w.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        w.write_all(&self.hash)?;
        enc.write(w, &self.name)?;
        self.entries_begin = w.stream_position()?;
        for e in &self.entries {
            w.write_u32::<LittleEndian>(e.name_hash)?;
            w.write_u64::<LittleEndian>(e.offset)?;
        }
        Ok(())
    }
}

impl RecordSpan for DirectoryRecord {
    fn offset(&self) -> u64 { self.offset }
    fn length(&self) -> u32 { self.length }
}

// ── File ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub offset:      u64,
    pub length:      u32,
    pub name:        String,
    pub hash:        [u8; 32],
    pub data_offset: u64,
    pub data_length: u32,
}

impl FileRecord {
    /// Position of the SHA-256 field relative to the record.
    pub const HASH_FIELD: u64 = 12;

    /// Header plus name, everything before the data.
    pub fn header_len(name: &str, enc: NameEncoding) -> u32 {
        HEADER_LEN + 4 + 32 + (enc.units(name) + 1) * enc.width()
    }

    pub fn read_body<R: Read + Seek>(r: &mut R, offset: u64, length: u32, enc: NameEncoding) -> Result<Self> {
        let name_len = r.read_u32::<LittleEndian>()?;
        let mut hash = [0u8; 32];
        r.read_exact(&mut hash)?;

        let head = HEADER_LEN as u64 + 4 + 32 + name_len as u64 * enc.width() as u64;
        if head > length as u64 {
            return Err(Error::corrupt(offset, format!(
                "file name of {} units overruns record length {}", name_len, length,
            )));
        }
        let name = enc.read(r, name_len)?;
        let data_offset = r.stream_position()?;
        let data_length = (length as u64 - head) as u32;
        r.seek(SeekFrom::Current(data_length as i64))?;

        Ok(FileRecord { offset, length, name, hash, data_offset, data_length })
    }

    /// Writes the header and name at the current position; the caller writes
    /// `data_length` bytes of content right after.
    pub fn write_header<W: Write + Seek>(&mut self, w: &mut W, enc: NameEncoding) -> Result<()> {
        self.offset = w.stream_position()?;
        self.length = Self::header_len(&self.name, enc) + self.data_length;
        write_header(w, self.length, RecordTag::File)?;
        w.write_u32::<LittleEndian>(enc.units(&self.name) + 1)?;
        w.write_all(&self.hash)?;
        enc.write(w, &self.name)?;
        self.data_offset = w.stream_position()?;
        Ok(())
    }
}

impl RecordSpan for FileRecord {
    fn offset(&self) -> u64 { self.offset }
    fn length(&self) -> u32 { self.length }
}

// ── Free ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    pub offset:           u64,
    pub length:           u32,
    pub next_free_offset: u64,
}

impl FreeRecord {
    /// Position of `next_free_offset` relative to the record.
    pub const NEXT_FIELD: u64 = 8;

    pub fn read_body<R: Read>(r: &mut R, offset: u64, length: u32) -> Result<Self> {
        if length < FREE_RECORD_MIN {
            return Err(Error::corrupt(offset, format!("free record of {} bytes", length)));
        }
        Ok(FreeRecord { offset, length, next_free_offset: r.read_u64::<LittleEndian>()? })
    }

    /// Writes header and next pointer; the rest of the region is left as is.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_header(w, self.length, RecordTag::Free)?;
        w.write_u64::<LittleEndian>(self.next_free_offset)?;
        Ok(())
    }
}

impl RecordSpan for FreeRecord {
    fn offset(&self) -> u64 { self.offset }
    fn length(&self) -> u32 { self.length }
}

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Container(ContainerRecord),
    Directory(DirectoryRecord),
    File(FileRecord),
    Free(FreeRecord),
}

impl Record {
    /// Parses the record at `offset`. The stream is left at the record's end
    /// for file and container records, after the body otherwise.
    pub fn read_at<R: Read + Seek>(r: &mut R, offset: u64, enc: NameEncoding) -> Result<Self> {
        r.seek(SeekFrom::Start(offset))?;
        let (length, tag) = read_header(r, offset)?;
        Ok(match tag {
            RecordTag::Container => Record::Container(ContainerRecord::read_body(r, offset)?),
            RecordTag::Directory => Record::Directory(DirectoryRecord::read_body(r, offset, length, enc)?),
            RecordTag::File      => Record::File(FileRecord::read_body(r, offset, length, enc)?),
            RecordTag::Free      => Record::Free(FreeRecord::read_body(r, offset, length)?),
        })
    }

    pub fn tag(&self) -> RecordTag {
        match self {
            Record::Container(_) => RecordTag::Container,
            Record::Directory(_) => RecordTag::Directory,
            Record::File(_)      => RecordTag::File,
            Record::Free(_)      => RecordTag::Free,
        }
    }
}

impl RecordSpan for Record {
    fn offset(&self) -> u64 {
        match self {
            Record::Container(c) => c.offset(),
            Record::Directory(d) => d.offset(),
            Record::File(f)      => f.offset(),
            Record::Free(f)      => f.offset(),
        }
    }

    fn length(&self) -> u32 {
        match self {
            Record::Container(c) => c.length(),
            Record::Directory(d) => d.length(),
            Record::File(f)      => f.length(),
            Record::Free(f)      => f.length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn file_record_layout() {
        let mut buf = Cursor::new(Vec::new());
        let mut f = FileRecord {
            offset: 0, length: 0, name: "a.txt".into(), hash: [7u8; 32],
            data_offset: 0, data_length: 3,
        };
        f.write_header(&mut buf, NameEncoding::Utf16).unwrap();
        buf.write_all(b"xyz").unwrap();

        assert_eq!(f.length, 8 + 4 + 32 + 6 * 2 + 3);
        assert_eq!(f.data_offset, 8 + 4 + 32 + 12);
        assert_eq!(&buf.get_ref()[4..8], b"FILE");

        let back = Record::read_at(&mut buf, 0, NameEncoding::Utf16).unwrap();
        assert_eq!(back, Record::File(f));
    }

    #[test]
    fn directory_record_utf32_layout() {
        let entries = vec![DirectoryEntry { name_hash: 1, offset: 100 }, DirectoryEntry { name_hash: 2, offset: 200 }];
        let mut d = DirectoryRecord::new("Art", entries, NameEncoding::Utf32);
        let mut buf = Cursor::new(vec![0u8; 5]);
        buf.seek(SeekFrom::Start(5)).unwrap();
        d.write(&mut buf, NameEncoding::Utf32).unwrap();

        assert_eq!(d.offset, 5);
        assert_eq!(d.length, 8 + 8 + 32 + 4 * 4 + 24);
        assert_eq!(d.entries_begin, 5 + 8 + 8 + 32 + 16);
        assert_eq!(d.entry_offset_field(1), d.entries_begin + 16);

        match Record::read_at(&mut buf, 5, NameEncoding::Utf32).unwrap() {
            Record::Directory(back) => assert_eq!(back, d),
            other => panic!("unexpected {:?}", other.tag()),
        }
    }

    #[test]
    fn directory_length_mismatch_is_corrupt() {
        let mut d = DirectoryRecord::new("x", vec![], NameEncoding::Utf16);
        let mut buf = Cursor::new(Vec::new());
        d.write(&mut buf, NameEncoding::Utf16).unwrap();
        buf.get_mut()[0] += 12;
        let err = Record::read_at(&mut buf, 0, NameEncoding::Utf16).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { offset: 0, .. }));
    }

    #[test]
    fn unknown_tag_reports_offset() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[16, 0, 0, 0]);
        data.extend_from_slice(b"JUNK");
        let err = Record::read_at(&mut Cursor::new(data), 4, NameEncoding::Utf16).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { offset: 4, .. }));
    }
}
