//! In-memory stream over one file record.
//!
//! The content is loaded when the stream is opened and written back with
//! [`Ggpk::commit`] only if something changed. Nested stores (a bundle index
//! kept inside a pack file) use this to get a [`Storage`] they own.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use super::{Ggpk, NodeId};
use crate::cursor::Storage;
use crate::error::Result;

#[derive(Debug)]
pub struct GgpkFileStream {
    node:  NodeId,
    inner: Cursor<Vec<u8>>,
    dirty: bool,
}

impl GgpkFileStream {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get_ref(&self) -> &[u8] {
        self.inner.get_ref()
    }
}

impl Read for GgpkFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for GgpkFileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dirty = true;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for GgpkFileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Storage for GgpkFileStream {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if len != self.inner.get_ref().len() as u64 {
            self.dirty = true;
        }
        Storage::set_len(&mut self.inner, len)
    }
}

impl<S: Storage> Ggpk<S> {
    /// Loads a file's content into a stream positioned at 0.
    pub fn open_file_stream(&mut self, id: NodeId) -> Result<GgpkFileStream> {
        let data = self.read_file(id)?;
        Ok(GgpkFileStream { node: id, inner: Cursor::new(data), dirty: false })
    }

    /// Writes a modified stream back through [`Ggpk::replace_file`] and
    /// marks it clean. Returns whether anything was written.
    pub fn commit(&mut self, stream: &mut GgpkFileStream) -> Result<bool> {
        if !stream.dirty {
            return Ok(false);
        }
        self.replace_file(stream.node, stream.inner.get_ref())?;
        stream.dirty = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::ggpk::create;
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};

    #[test]
    fn commit_writes_back_only_when_dirty() {
        let mut g = create(Cursor::new(Vec::new()), 3, &[("x.bin", b"0123".as_slice())]).unwrap();
        let id = g.find_file("x.bin").unwrap();

        let mut s = g.open_file_stream(id).unwrap();
        let mut buf = String::new();
        s.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "0123");
        assert!(!g.commit(&mut s).unwrap());

        let mut s = g.open_file_stream(id).unwrap();
        s.seek(SeekFrom::End(0)).unwrap();
        s.write_all(b"45").unwrap();
        assert!(g.commit(&mut s).unwrap());
        assert!(!s.is_dirty());
        assert_eq!(g.read_file(id).unwrap(), b"012345");
    }
}
