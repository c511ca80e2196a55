//! GGPK pack file: record store, directory tree and content replacement.
//!
//! Records reference each other by file offset. The in-memory tree is an
//! arena of [`GgpkNode`]s indexed by [`NodeId`]; a directory's children are
//! read from its entry table the first time they are asked for.
//!
//! Content replacement keeps the record in place when the size is
//! unchanged. Otherwise the record is relocated:
//!
//! 1. the old span is returned to the free list,
//! 2. space is taken from the best-fitting free region or the end of file,
//! 3. header, name and data are written there,
//! 4. the parent's entry that held the old offset is patched.
//!
//! There is no journal. A crash between steps 1 and 4 leaves the parent
//! pointing at a free record.

pub mod builder;
mod defrag;
pub mod free_list;
pub mod record;
mod stream;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cursor::{NameEncoding, Storage};
use crate::error::{Error, Result};
use crate::tree::{sibling_cmp, split_path};
use free_list::{patch_u64, FreeHandle, FreeList};
use record::{
    read_header, ContainerRecord, DirectoryRecord, FileRecord, Record, RecordSpan, RecordTag,
};

pub use builder::create;
pub use stream::GgpkFileStream;

pub type NodeId = usize;

// ── Nodes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum NodeRecord {
    Directory(DirectoryRecord),
    File(FileRecord),
}

#[derive(Debug, Clone)]
pub struct GgpkNode {
    pub record: NodeRecord,
    pub parent: Option<NodeId>,
    children:   Option<Vec<NodeId>>,
}

impl GgpkNode {
    pub fn name(&self) -> &str {
        match &self.record {
            NodeRecord::Directory(d) => &d.name,
            NodeRecord::File(f)      => &f.name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.record, NodeRecord::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileRecord> {
        match &self.record {
            NodeRecord::File(f) => Some(f),
            NodeRecord::Directory(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirectoryRecord> {
        match &self.record {
            NodeRecord::Directory(d) => Some(d),
            NodeRecord::File(_) => None,
        }
    }

    pub fn hash(&self) -> &[u8; 32] {
        match &self.record {
            NodeRecord::Directory(d) => &d.hash,
            NodeRecord::File(f)      => &f.hash,
        }
    }
}

impl RecordSpan for GgpkNode {
    fn offset(&self) -> u64 {
        match &self.record {
            NodeRecord::Directory(d) => d.offset,
            NodeRecord::File(f)      => f.offset,
        }
    }

    fn length(&self) -> u32 {
        match &self.record {
            NodeRecord::Directory(d) => d.length,
            NodeRecord::File(f)      => f.length,
        }
    }
}

// ── Ggpk ─────────────────────────────────────────────────────────────────────

pub struct Ggpk<S: Storage = File> {
    stream:   S,
    header:   ContainerRecord,
    encoding: NameEncoding,
    nodes:    Vec<GgpkNode>,
    free:     FreeList,
}

impl Ggpk<File> {
    /// Opens a pack file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_stream(file)
    }

    /// Opens a pack file read-only. Mutations fail with an IO error.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_stream(File::open(path)?)
    }
}

impl<S: Storage> Ggpk<S> {
    pub const ROOT: NodeId = 0;

    /// Scans from offset 0 for the container record, then loads the root
    /// directory and the free list.
    pub fn from_stream(mut stream: S) -> Result<Self> {
        let len = stream.total_len()?;
        let mut offset = 0u64;
        let header = loop {
            if offset + record::HEADER_LEN as u64 > len {
                return Err(Error::corrupt(offset, "no GGPK record before end of file"));
            }
            stream.seek(SeekFrom::Start(offset))?;
            let (length, tag) = read_header(&mut stream, offset)?;
            if tag == RecordTag::Container {
                break ContainerRecord::read_body(&mut stream, offset)?;
            }
            offset += length as u64;
        };

        let encoding = header.name_encoding();
        let root = match Record::read_at(&mut stream, header.root_offset, encoding)? {
            Record::Directory(d) => d,
            other => {
                return Err(Error::corrupt(header.root_offset, format!(
                    "root points at a {:?} record", other.tag(),
                )))
            }
        };
        let free = FreeList::load(&mut stream, header.first_free_offset)?;

        info!(
            version = header.version,
            root = header.root_offset,
            free_regions = free.len(),
            "opened GGPK"
        );

        Ok(Ggpk {
            stream,
            header,
            encoding,
            nodes: vec![GgpkNode { record: NodeRecord::Directory(root), parent: None, children: None }],
            free,
        })
    }

    pub fn header(&self) -> &ContainerRecord {
        &self.header
    }

    pub fn name_encoding(&self) -> NameEncoding {
        self.encoding
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free
    }

    pub fn node(&self, id: NodeId) -> &GgpkNode {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Parses whatever record sits at `offset`.
    pub fn read_record(&mut self, offset: u64) -> Result<Record> {
        Record::read_at(&mut self.stream, offset, self.encoding)
    }

    // ── Tree ─────────────────────────────────────────────────────────────────

    /// Children of a directory in sibling order; empty for files.
    pub fn children(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        if self.nodes[id].children.is_none() {
            self.load_children(id)?;
        }
        Ok(self.nodes[id].children.clone().unwrap_or_default())
    }

    fn load_children(&mut self, id: NodeId) -> Result<()> {
        let entries = match &self.nodes[id].record {
            NodeRecord::Directory(d) => d.entries.clone(),
            NodeRecord::File(_) => Vec::new(),
        };

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = match self.read_record(entry.offset)? {
                Record::Directory(d) => NodeRecord::Directory(d),
                Record::File(f)      => NodeRecord::File(f),
                other => {
                    return Err(Error::corrupt(entry.offset, format!(
                        "directory entry points at a {:?} record", other.tag(),
                    )))
                }
            };
            ids.push(self.nodes.len());
            self.nodes.push(GgpkNode { record, parent: Some(id), children: None });
        }

        let nodes = &self.nodes;
        ids.sort_by(|&a, &b| {
            let (na, nb) = (&nodes[a], &nodes[b]);
            sibling_cmp(na.is_dir(), na.name(), nb.is_dir(), nb.name())
        });
        self.nodes[id].children = Some(ids);
        Ok(())
    }

    /// Walks `path` (split on `/` or `\`) from `from` or the root, matching
    /// names exactly.
    pub fn find(&mut self, path: &str, from: Option<NodeId>) -> Result<Option<NodeId>> {
        let mut current = from.unwrap_or(Self::ROOT);
        for segment in split_path(path) {
            if !self.nodes[current].is_dir() {
                return Ok(None);
            }
            let next = self
                .children(current)?
                .into_iter()
                .find(|&c| self.nodes[c].name() == segment);
            match next {
                Some(c) => current = c,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Like [`find`](Self::find) but only accepts files.
    pub fn find_file(&mut self, path: &str) -> Result<NodeId> {
        match self.find(path, None)? {
            Some(id) if !self.nodes[id].is_dir() => Ok(id),
            _ => Err(Error::not_found(path)),
        }
    }

    /// Full path; directories end with `/` and the root is `""`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &self.nodes[c];
            if node.parent.is_some() {
                parts.push(node.name());
            }
            cur = node.parent;
        }
        parts.reverse();
        let mut path = parts.join("/");
        if self.nodes[id].is_dir() && !path.is_empty() {
            path.push('/');
        }
        path
    }

    /// Materializes the whole tree and returns every node, root first.
    pub fn all_nodes(&mut self) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            let children = self.children(id)?;
            stack.extend(children.iter().rev());
        }
        Ok(out)
    }

    // ── File content ─────────────────────────────────────────────────────────

    fn file_record(&self, id: NodeId) -> Result<&FileRecord> {
        self.nodes[id]
            .as_file()
            .ok_or_else(|| Error::ArgumentInvalid(format!("{} is a directory", self.path_of(id))))
    }

    pub fn read_file(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let (offset, len) = {
            let f = self.file_record(id)?;
            (f.data_offset, f.data_length as usize)
        };
        let mut buf = vec![0u8; len];
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Replaces a file's content, relocating the record when its size changes.
    pub fn replace_file(&mut self, id: NodeId, data: &[u8]) -> Result<()> {
        let file = self.file_record(id)?.clone();
        let hash: [u8; 32] = Sha256::digest(data).into();

        if data.len() as u64 == file.data_length as u64 {
            self.stream.seek(SeekFrom::Start(file.offset + FileRecord::HASH_FIELD))?;
            self.stream.write_all(&hash)?;
            self.stream.seek(SeekFrom::Start(file.data_offset))?;
            self.stream.write_all(data)?;
            if let NodeRecord::File(f) = &mut self.nodes[id].record {
                f.hash = hash;
            }
            debug!(offset = file.offset, "replaced {} in place", file.name);
        } else {
            self.relocate_file(id, data, hash, None)?;
        }
        self.stream.flush()?;
        Ok(())
    }

    fn relocate_file(
        &mut self,
        id: NodeId,
        data: &[u8],
        hash: [u8; 32],
        target: Option<FreeHandle>,
    ) -> Result<Option<FreeHandle>> {
        let mut file = self.file_record(id)?.clone();
        let old_offset = file.offset;
        let data_length = u32::try_from(data.len())
            .map_err(|_| Error::ArgumentInvalid(format!("{} bytes do not fit in a record", data.len())))?;

        let old_length = file.length;
        let mut vacated = self.release_before_move(old_offset, old_length, target)?;

        file.hash = hash;
        file.data_length = data_length;
        let length = FileRecord::header_len(&file.name, self.encoding) + data_length;
        let at = self.allocate(length, target)?;
        self.stream.seek(SeekFrom::Start(at))?;
        file.write_header(&mut self.stream, self.encoding)?;
        self.stream.write_all(data)?;

        debug!(from = old_offset, to = at, length, "relocated file {}", file.name);
        self.nodes[id].record = NodeRecord::File(file);
        self.patch_parent(id, old_offset, at)?;
        if target.is_some() {
            vacated = self.free.mark_free(&mut self.stream, &mut self.header, old_offset, old_length)?;
        }
        Ok(vacated)
    }

    /// Without a target the old span is freed before allocating, so a grown
    /// record can reuse it. With a target the span stays occupied until the
    /// record has been written into the target.
    fn release_before_move(&mut self, offset: u64, length: u32, target: Option<FreeHandle>) -> Result<Option<FreeHandle>> {
        match target {
            Some(_) => Ok(None),
            None => self.free.mark_free(&mut self.stream, &mut self.header, offset, length),
        }
    }

    fn relocate_directory(&mut self, id: NodeId, target: Option<FreeHandle>) -> Result<Option<FreeHandle>> {
        let mut dir = match &self.nodes[id].record {
            NodeRecord::Directory(d) => d.clone(),
            NodeRecord::File(_) => return Err(Error::ArgumentInvalid("not a directory".into())),
        };
        let old_offset = dir.offset;

        let old_length = dir.length;
        let mut vacated = self.release_before_move(old_offset, old_length, target)?;

        let at = self.allocate(dir.serialized_len(self.encoding), target)?;
        self.stream.seek(SeekFrom::Start(at))?;
        dir.write(&mut self.stream, self.encoding)?;

        debug!(from = old_offset, to = at, "relocated directory {:?}", dir.name);
        self.nodes[id].record = NodeRecord::Directory(dir);
        self.patch_parent(id, old_offset, at)?;
        if target.is_some() {
            vacated = self.free.mark_free(&mut self.stream, &mut self.header, old_offset, old_length)?;
        }
        Ok(vacated)
    }

    /// Moves a record to `target` (or wherever fits) without changing its
    /// content. Returns the region its old span became part of, if any.
    pub(crate) fn move_node(&mut self, id: NodeId, target: Option<FreeHandle>) -> Result<Option<FreeHandle>> {
        if self.nodes[id].is_dir() {
            self.relocate_directory(id, target)
        } else {
            let data = self.read_file(id)?;
            let hash = *self.nodes[id].hash();
            self.relocate_file(id, &data, hash, target)
        }
    }

    /// Picks where a record of `length` bytes goes: `target` when it still
    /// fits, else the best-fitting free region, else the end of the file.
    fn allocate(&mut self, length: u32, target: Option<FreeHandle>) -> Result<u64> {
        let target = target.filter(|&h| {
            self.free.get(h).map_or(false, |r| {
                r.length == length || r.length >= length.saturating_add(record::FREE_RECORD_MIN)
            })
        });
        let handle = match target {
            Some(h) => Some(h),
            None => self.free.find_best_fit(length),
        };
        match handle {
            Some(h) => self.free.take(&mut self.stream, &mut self.header, h, length),
            None => Ok(self.stream.seek(SeekFrom::End(0))?),
        }
    }

    /// Points whatever referenced `old` (the parent's entry or the container's
    /// root field) at `new`.
    fn patch_parent(&mut self, id: NodeId, old: u64, new: u64) -> Result<()> {
        match self.nodes[id].parent {
            None => {
                self.header.root_offset = new;
                patch_u64(&mut self.stream, self.header.offset + ContainerRecord::ROOT_FIELD, new)
            }
            Some(parent) => {
                let dir = match &mut self.nodes[parent].record {
                    NodeRecord::Directory(d) => d,
                    NodeRecord::File(f) => return Err(Error::corrupt(f.offset, "parent is a file")),
                };
                let i = dir
                    .entries
                    .iter()
                    .position(|e| e.offset == old)
                    .ok_or_else(|| Error::corrupt(dir.offset, format!(
                        "no entry references moved record at {}", old,
                    )))?;
                dir.entries[i].offset = new;
                let field = dir.entry_offset_field(i);
                patch_u64(&mut self.stream, field, new)
            }
        }
    }

    // ── Disk import / export ─────────────────────────────────────────────────

    /// Writes a file, or a directory recursively, under `dest`. Returns the
    /// number of files written.
    pub fn extract(&mut self, id: NodeId, dest: &Path) -> Result<usize> {
        if !self.nodes[id].is_dir() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let data = self.read_file(id)?;
            fs::write(dest, data)?;
            return Ok(1);
        }

        fs::create_dir_all(dest)?;
        let mut count = 0;
        for child in self.children(id)? {
            let name = self.nodes[child].name().to_string();
            count += self.extract(child, &dest.join(name))?;
        }
        Ok(count)
    }

    /// Replaces a file from `src`, or a directory's files from the matching
    /// names under `src`. Missing disk entries are skipped.
    pub fn replace(&mut self, id: NodeId, src: &Path) -> Result<usize> {
        if !self.nodes[id].is_dir() {
            let data = fs::read(src)?;
            self.replace_file(id, &data)?;
            return Ok(1);
        }

        let mut count = 0;
        for child in self.children(id)? {
            let path = src.join(self.nodes[child].name());
            let present = if self.nodes[child].is_dir() { path.is_dir() } else { path.is_file() };
            if present {
                count += self.replace(child, &path)?;
            }
        }
        Ok(count)
    }

    /// Replaces every archive file that has a counterpart under `dir`, using
    /// the path relative to `dir`. Returns the number replaced.
    pub fn patch_from_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut count = 0;
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_archive_path(dir, entry.path());
            match self.find(&rel, None)? {
                Some(id) if !self.nodes[id].is_dir() => {
                    let data = fs::read(entry.path())?;
                    self.replace_file(id, &data)?;
                    count += 1;
                }
                _ => warn!("{} is not in the archive, skipped", rel),
            }
        }
        info!(replaced = count, "patched from {}", dir.display());
        Ok(count)
    }
}

/// `path` relative to `root`, joined with `/`.
pub(crate) fn relative_archive_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
