//! Little-endian stream helpers shared by the GGPK and bundle layers.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

// ── Storage ──────────────────────────────────────────────────────────────────

/// A seekable read/write stream that can also be truncated.
pub trait Storage: Read + Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn total_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if pos != end {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(end)
    }
}

impl Storage for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        if self.position() > len {
            self.set_position(len);
        }
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

/// Character width of GGPK record names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    Utf16,
    Utf32,
}

impl NameEncoding {
    pub fn for_version(version: u32) -> Self {
        if version == 4 { NameEncoding::Utf32 } else { NameEncoding::Utf16 }
    }

    pub fn width(self) -> u32 {
        match self {
            NameEncoding::Utf16 => 2,
            NameEncoding::Utf32 => 4,
        }
    }

    /// Number of code units of `name`, not counting the terminator.
    pub fn units(self, name: &str) -> u32 {
        match self {
            NameEncoding::Utf16 => name.encode_utf16().count() as u32,
            NameEncoding::Utf32 => name.chars().count() as u32,
        }
    }

    /// Reads `units` code units, the last of which is the null terminator.
    pub fn read<R: Read>(self, r: &mut R, units: u32) -> io::Result<String> {
        let text_units = units.saturating_sub(1) as usize;
        let name = match self {
            NameEncoding::Utf16 => {
                let mut buf = Vec::with_capacity(text_units);
                for _ in 0..text_units {
                    buf.push(r.read_u16::<LittleEndian>()?);
                }
                String::from_utf16_lossy(&buf)
            }
            NameEncoding::Utf32 => {
                let mut s = String::with_capacity(text_units);
                for _ in 0..text_units {
                    let c = r.read_u32::<LittleEndian>()?;
                    s.push(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                s
            }
        };
        if units > 0 {
            let mut nul = [0u8; 4];
            r.read_exact(&mut nul[..self.width() as usize])?;
        }
        Ok(name)
    }

    /// Writes `name` followed by a null terminator.
    pub fn write<W: Write>(self, w: &mut W, name: &str) -> io::Result<()> {
        match self {
            NameEncoding::Utf16 => {
                for u in name.encode_utf16() {
                    w.write_u16::<LittleEndian>(u)?;
                }
                w.write_u16::<LittleEndian>(0)
            }
            NameEncoding::Utf32 => {
                for c in name.chars() {
                    w.write_u32::<LittleEndian>(c as u32)?;
                }
                w.write_u32::<LittleEndian>(0)
            }
        }
    }
}

/// `i32` length prefix followed by UTF-8 bytes (no terminator).
pub fn read_prefixed_utf8<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_i32::<LittleEndian>()?;
    if len < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "negative string length"));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_prefixed_utf8<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_i32::<LittleEndian>(s.len() as i32)?;
    w.write_all(s.as_bytes())
}

/// Reads bytes up to (and consuming) a NUL. Returns `None` if the slice ends first.
pub fn read_cstr(data: &[u8], pos: &mut usize) -> Option<String> {
    let rest = data.get(*pos..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&rest[..end]).into_owned();
    *pos += end + 1;
    Some(s)
}
