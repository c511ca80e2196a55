//! Bundle index: the table of bundles, files and directories plus the path
//! dictionary, all stored in one bundle.
//!
//! # Decompressed layout
//! ```text
//! i32 bundle_count   { i32 name_len, utf8 name, i32 uncompressed_size }*
//! i32 file_count     { u64 path_hash, i32 bundle, i32 offset, i32 size }*
//! i32 dir_count      { u64 path_hash, i32 offset, i32 size, i32 recursive_size }*
//! ...                name dictionary, itself a complete bundle
//! ```
//! A bundle's `valid_size` is not stored. It is the highest `offset + size`
//! of any file inside it and is recomputed on open.
//!
//! Writes never compact a bundle. New content is appended to a bundle's live
//! data and the file records are redirected to it.

mod builder;
mod dictionary;
mod provider;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bundle::Bundle;
use crate::codec::Compressor;
use crate::config::StoreOptions;
use crate::cursor::{read_prefixed_utf8, write_prefixed_utf8, Storage};
use crate::error::{Error, Result};
use crate::ggpk::relative_archive_path;
use crate::hash::NameHashScheme;
use crate::tree::{NodeId, PathTree};

pub use builder::{BuiltIndex, IndexBuilder};
pub use provider::{BundleProvider, DirectoryBundles};

/// File name of the index inside a `Bundles2` directory.
pub const INDEX_FILE_NAME: &str = "_.index.bin";

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    /// Relative path without the `.bundle.bin` extension.
    pub path:              String,
    pub uncompressed_size: u32,
    pub valid_size:        u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path_hash:    u64,
    pub bundle_index: usize,
    pub offset:       u32,
    pub size:         u32,
    /// Position in the directory table of the directory that named this file.
    pub directory:    Option<usize>,
    pub path:         Option<String>,
}

impl FileRecord {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

/// Directory table entry, kept as read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub path_hash:      u64,
    pub offset:         u32,
    pub size:           u32,
    pub recursive_size: i32,
}

struct Tables {
    bundles:     Vec<BundleRecord>,
    files:       Vec<FileRecord>,
    directories: Vec<DirectoryRecord>,
}

fn invalid(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, detail)
}

fn read_u32_field<R: Read>(r: &mut R, what: &str) -> io::Result<u32> {
    let v = r.read_i32::<LittleEndian>()?;
    u32::try_from(v).map_err(|_| invalid(format!("negative {} {}", what, v)))
}

fn read_tables<R: Read>(r: &mut R) -> io::Result<Tables> {
    let bundle_count = read_u32_field(r, "bundle count")?;
    let mut bundles = Vec::with_capacity(bundle_count.min(1 << 16) as usize);
    for _ in 0..bundle_count {
        let path = read_prefixed_utf8(r)?;
        let uncompressed_size = read_u32_field(r, "bundle size")?;
        bundles.push(BundleRecord { path, uncompressed_size, valid_size: 0 });
    }

    let file_count = read_u32_field(r, "file count")?;
    let mut files = Vec::with_capacity(file_count.min(1 << 20) as usize);
    for _ in 0..file_count {
        let path_hash = r.read_u64::<LittleEndian>()?;
        let bundle_index = read_u32_field(r, "bundle index")? as usize;
        let offset = read_u32_field(r, "file offset")?;
        let size = read_u32_field(r, "file size")?;
        files.push(FileRecord { path_hash, bundle_index, offset, size, directory: None, path: None });
    }

    let dir_count = read_u32_field(r, "directory count")?;
    let mut directories = Vec::with_capacity(dir_count.min(1 << 20) as usize);
    for _ in 0..dir_count {
        directories.push(DirectoryRecord {
            path_hash:      r.read_u64::<LittleEndian>()?,
            offset:         read_u32_field(r, "directory offset")?,
            size:           read_u32_field(r, "directory size")?,
            recursive_size: r.read_i32::<LittleEndian>()?,
        });
    }

    Ok(Tables { bundles, files, directories })
}

fn as_i32(v: usize, what: &str) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::ArgumentInvalid(format!("{} {} does not fit in the index", what, v)))
}

fn write_tables(
    w: &mut Vec<u8>,
    bundles: &[BundleRecord],
    files: &[FileRecord],
    directories: &[DirectoryRecord],
) -> Result<()> {
    w.write_i32::<LittleEndian>(as_i32(bundles.len(), "bundle count")?)?;
    for b in bundles {
        write_prefixed_utf8(w, &b.path)?;
        w.write_i32::<LittleEndian>(as_i32(b.uncompressed_size as usize, "bundle size")?)?;
    }

    w.write_i32::<LittleEndian>(as_i32(files.len(), "file count")?)?;
    for f in files {
        w.write_u64::<LittleEndian>(f.path_hash)?;
        w.write_i32::<LittleEndian>(as_i32(f.bundle_index, "bundle index")?)?;
        w.write_i32::<LittleEndian>(as_i32(f.offset as usize, "file offset")?)?;
        w.write_i32::<LittleEndian>(as_i32(f.size as usize, "file size")?)?;
    }

    w.write_i32::<LittleEndian>(as_i32(directories.len(), "directory count")?)?;
    for d in directories {
        w.write_u64::<LittleEndian>(d.path_hash)?;
        w.write_i32::<LittleEndian>(as_i32(d.offset as usize, "directory offset")?)?;
        w.write_i32::<LittleEndian>(as_i32(d.size as usize, "directory size")?)?;
        w.write_i32::<LittleEndian>(d.recursive_size)?;
    }
    Ok(())
}

// ── Index ────────────────────────────────────────────────────────────────────

pub struct Index<S: Storage> {
    bundle:      Bundle<S>,
    compressor:  Arc<dyn Compressor>,
    options:     StoreOptions,
    scheme:      NameHashScheme,
    bundles:     Vec<BundleRecord>,
    files:       Vec<FileRecord>,
    by_hash:     HashMap<u64, usize>,
    directories: Vec<DirectoryRecord>,
    /// The dictionary bundle exactly as read; written back unchanged.
    dictionary:  Vec<u8>,
    tree:        PathTree<usize>,
}

impl<S: Storage> Index<S> {
    /// Decompresses the index, parses its tables and names every file from
    /// the dictionary.
    pub fn open(stream: S, compressor: Arc<dyn Compressor>, options: StoreOptions) -> Result<Self> {
        let mut bundle = Bundle::open(stream, Arc::clone(&compressor))?;
        let data = bundle.read_all()?;

        let mut r = Cursor::new(data.as_slice());
        let Tables { mut bundles, mut files, directories } = read_tables(&mut r)
            .map_err(|e| Error::corrupt(r.position(), format!("index tables: {}", e)))?;
        let dictionary = data[r.position() as usize..].to_vec();

        let mut by_hash = HashMap::with_capacity(files.len());
        for (i, f) in files.iter().enumerate() {
            let b = bundles.get_mut(f.bundle_index).ok_or_else(|| {
                Error::corrupt(0, format!("file {:016x} references bundle {}", f.path_hash, f.bundle_index))
            })?;
            let end = f.offset.checked_add(f.size).ok_or_else(|| {
                Error::corrupt(0, format!("file {:016x} extent overflows", f.path_hash))
            })?;
            b.valid_size = b.valid_size.max(end);
            if by_hash.insert(f.path_hash, i).is_some() {
                return Err(Error::corrupt(0, format!("duplicate file hash {:016x}", f.path_hash)));
            }
        }

        let scheme = NameHashScheme::detect(directories.first().map(|d| d.path_hash));
        let names = Bundle::open(Cursor::new(dictionary.clone()), Arc::clone(&compressor))?.read_all()?;
        dictionary::decode(&names, &directories, |dir, path| {
            let hash = scheme.hash(&path);
            let &i = by_hash
                .get(&hash)
                .ok_or_else(|| Error::corrupt(0, format!("dictionary names unknown file {}", path)))?;
            files[i].path = Some(path);
            files[i].directory = Some(dir);
            Ok(())
        })?;

        let mut tree = PathTree::new();
        for (i, f) in files.iter().enumerate() {
            match f.path() {
                Some(path) => {
                    tree.insert_file(path, i);
                }
                None => debug!("file {:016x} has no name in the dictionary", f.path_hash),
            }
        }

        info!(
            bundles = bundles.len(),
            files = files.len(),
            directories = directories.len(),
            ?scheme,
            "index opened"
        );

        Ok(Self {
            bundle,
            compressor,
            options,
            scheme,
            bundles,
            files,
            by_hash,
            directories,
            dictionary,
            tree,
        })
    }

    /// Serializes the tables and the untouched dictionary back into the
    /// index bundle.
    pub fn save(&mut self) -> Result<()> {
        let mut w = Vec::with_capacity(self.bundle.uncompressed_size());
        write_tables(&mut w, &self.bundles, &self.files, &self.directories)?;
        w.extend_from_slice(&self.dictionary);
        self.bundle.write_all(&w, self.options.compression_level)?;
        info!(bytes = w.len(), "index saved");
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn scheme(&self) -> NameHashScheme {
        self.scheme
    }

    pub fn bundles(&self) -> &[BundleRecord] {
        &self.bundles
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn directories(&self) -> &[DirectoryRecord] {
        &self.directories
    }

    pub fn tree(&self) -> &PathTree<usize> {
        &self.tree
    }

    pub fn get_mut(&mut self) -> &mut S {
        self.bundle.get_mut()
    }

    pub fn into_inner(self) -> S {
        self.bundle.into_inner()
    }

    /// Hash of `path` under this index's scheme.
    pub fn path_hash(&self, path: &str) -> u64 {
        self.scheme.hash(&path.replace('\\', "/"))
    }

    /// Looks a file up by hash without touching the tree.
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.file_by_hash(self.path_hash(path))
    }

    pub fn file_by_hash(&self, path_hash: u64) -> Option<&FileRecord> {
        self.by_hash.get(&path_hash).map(|&i| &self.files[i])
    }

    /// Resolves a `/` or `\` separated path in the tree. Names match exactly.
    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        self.tree.find(path, None)
    }

    pub fn path_of(&self, node: NodeId) -> String {
        self.tree.path_of(node)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    fn open_bundle<P: BundleProvider>(&self, provider: &mut P, bundle_index: usize) -> Result<Bundle<P::Stream>> {
        let record = &self.bundles[bundle_index];
        Bundle::open(provider.open(&record.path)?, Arc::clone(&self.compressor))
    }

    /// Content of one file. Only the chunks covering it are decompressed.
    pub fn read_file<P: BundleProvider>(&self, provider: &mut P, record: &FileRecord) -> Result<Vec<u8>> {
        let mut bundle = self.open_bundle(provider, record.bundle_index)?;
        bundle.read_range(record.offset as usize, record.size as usize)
    }

    /// Writes a file, or every file below a directory, under `dest`. Files of
    /// a bundle that cannot be opened are skipped. Returns the number written.
    pub fn extract<P: BundleProvider>(&self, provider: &mut P, node: NodeId, dest: &Path) -> Result<usize> {
        let base = self.tree.path_of(node);
        let single = !self.tree.node(node).is_dir();

        let mut groups: BTreeMap<usize, Vec<(usize, std::path::PathBuf)>> = BTreeMap::new();
        for leaf in self.tree.files_under(node) {
            let Some(&fi) = self.tree.node(leaf).file() else { continue };
            let out = if single {
                dest.to_path_buf()
            } else {
                let path = self.tree.path_of(leaf);
                dest.join(path.strip_prefix(base.as_str()).unwrap_or(path.as_str()))
            };
            groups.entry(self.files[fi].bundle_index).or_default().push((fi, out));
        }

        let mut count = 0;
        for (bundle_index, group) in groups {
            let live = group.iter().map(|(fi, _)| self.files[*fi].end()).max().unwrap_or(0) as usize;
            let data = match self
                .open_bundle(provider, bundle_index)
                .and_then(|mut b| b.read_range(0, live))
            {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        bundle = %self.bundles[bundle_index].path,
                        error = %e,
                        "bundle unavailable, {} files skipped",
                        group.len()
                    );
                    continue;
                }
            };

            for (fi, out) in group {
                let f = &self.files[fi];
                let bytes = &data[f.offset as usize..f.end() as usize];
                if let Some(parent) = out.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&out, bytes)?;
                count += 1;
            }
        }
        info!(count, "extracted {}", if base.is_empty() { "/" } else { base.as_str() });
        Ok(count)
    }

    /// Contents of the named files, grouped by bundle so each bundle is
    /// opened once. Unknown paths are [`Error::NotFound`].
    pub fn extract_paths<P: BundleProvider>(&self, provider: &mut P, paths: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
        let mut groups: BTreeMap<usize, Vec<(usize, String)>> = BTreeMap::new();
        for &path in paths {
            let i = self.file_index(self.path_hash(path)).map_err(|_| Error::not_found(path))?;
            groups.entry(self.files[i].bundle_index).or_default().push((i, path.to_string()));
        }

        let mut out = Vec::with_capacity(paths.len());
        for (bundle_index, group) in groups {
            let live = group.iter().map(|(fi, _)| self.files[*fi].end()).max().unwrap_or(0) as usize;
            let data = self.open_bundle(provider, bundle_index)?.read_range(0, live)?;
            for (fi, path) in group {
                let f = &self.files[fi];
                let name = f.path.clone().unwrap_or(path);
                out.push((name, data[f.offset as usize..f.end() as usize].to_vec()));
            }
        }
        Ok(out)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    fn file_index(&self, path_hash: u64) -> Result<usize> {
        self.by_hash
            .get(&path_hash)
            .copied()
            .ok_or_else(|| Error::not_found(format!("path hash {:016x}", path_hash)))
    }

    fn resolve(&self, items: Vec<(u64, Vec<u8>)>) -> Result<Vec<(usize, Vec<u8>)>> {
        items
            .into_iter()
            .map(|(hash, data)| Ok((self.file_index(hash)?, data)))
            .collect()
    }

    /// Candidate bundles by ascending size; the first that opens wins.
    pub fn find_smallest_bundle<P: BundleProvider>(&self, provider: &mut P) -> Result<(usize, Bundle<P::Stream>)> {
        let mut order: Vec<usize> = (0..self.bundles.len()).collect();
        order.sort_by_key(|&i| self.bundles[i].uncompressed_size);
        for i in order {
            match self.open_bundle(provider, i) {
                Ok(bundle) => return Ok((i, bundle)),
                Err(e) => warn!(bundle = %self.bundles[i].path, error = %e, "bundle unavailable, trying next"),
            }
        }
        Err(Error::NoValidBundle)
    }

    /// Drops a file from its bundle's live data if it was the last occupant.
    fn release(&mut self, fi: usize) {
        let f = &self.files[fi];
        let b = &mut self.bundles[f.bundle_index];
        if f.end() >= b.valid_size {
            b.valid_size = f.offset;
        }
    }

    fn assign(&mut self, fi: usize, bundle_index: usize, offset: usize, size: usize) -> Result<()> {
        let offset = u32::try_from(offset).map_err(|_| Error::ArgumentInvalid(format!("bundle offset {}", offset)))?;
        let size = u32::try_from(size).map_err(|_| Error::ArgumentInvalid(format!("file size {}", size)))?;
        let f = &mut self.files[fi];
        f.bundle_index = bundle_index;
        f.offset = offset;
        f.size = size;
        Ok(())
    }

    /// Points a file at new content, releasing its old extent first.
    pub fn redirect(&mut self, path_hash: u64, bundle_index: usize, offset: usize, size: usize) -> Result<()> {
        let fi = self.file_index(path_hash)?;
        if bundle_index >= self.bundles.len() {
            return Err(Error::ArgumentInvalid(format!("bundle index {}", bundle_index)));
        }
        self.release(fi);
        self.assign(fi, bundle_index, offset, size)
    }

    fn live_data<T: Storage>(&self, bundle: &mut Bundle<T>, bundle_index: usize) -> Result<Vec<u8>> {
        let valid = (self.bundles[bundle_index].valid_size as usize).min(bundle.uncompressed_size());
        bundle.read_range(0, valid)
    }

    fn grow_cap(&self, mut cap: usize, bundle_index: usize) -> usize {
        cap = cap.max(1);
        while self.bundles[bundle_index].valid_size as usize > cap {
            cap = cap.saturating_mul(2);
        }
        cap
    }

    fn flush<P: BundleProvider>(
        &mut self,
        provider: &mut P,
        bundle_index: usize,
        mut bundle: Bundle<P::Stream>,
        data: &[u8],
    ) -> Result<()> {
        bundle.write_all(data, self.options.compression_level)?;
        let record = &mut self.bundles[bundle_index];
        record.uncompressed_size = data.len() as u32;
        record.valid_size = data.len() as u32;
        provider.commit(&record.path, bundle.into_inner())?;
        debug!(bundle = %record.path, size = data.len(), "bundle flushed");
        Ok(())
    }

    /// Appends new content for each `(path_hash, bytes)` to the smallest
    /// bundle, moving on to the next smallest whenever the cap would be
    /// exceeded, then saves the index. Returns the number of files written.
    ///
    /// Unknown hashes fail the call before anything is written. Bundles
    /// flushed before a later failure stay written.
    pub fn replace_many<P: BundleProvider>(&mut self, provider: &mut P, items: Vec<(u64, Vec<u8>)>) -> Result<usize> {
        let items = self.resolve(items)?;
        if items.is_empty() {
            return Ok(0);
        }
        let count = items.len();

        let (mut target, mut bundle) = self.find_smallest_bundle(provider)?;
        let mut cap = self.grow_cap(self.options.bundle_size_cap, target);
        let mut buffer = self.live_data(&mut bundle, target)?;

        for (fi, data) in items {
            if !buffer.is_empty() && buffer.len() + data.len() > cap {
                self.flush(provider, target, bundle, &buffer)?;
                (target, bundle) = self.find_smallest_bundle(provider)?;
                cap = self.grow_cap(cap, target);
                buffer = self.live_data(&mut bundle, target)?;
            }
            self.release(fi);
            self.assign(fi, target, buffer.len(), data.len())?;
            buffer.extend_from_slice(&data);
        }

        self.flush(provider, target, bundle, &buffer)?;
        self.save()?;
        info!(count, "files replaced");
        Ok(count)
    }

    /// Like [`Index::replace_many`], but every file is appended to the
    /// bundle that already holds it.
    pub fn replace_many_in_place<P: BundleProvider>(
        &mut self,
        provider: &mut P,
        items: Vec<(u64, Vec<u8>)>,
    ) -> Result<usize> {
        let items = self.resolve(items)?;
        let count = items.len();

        let mut groups: BTreeMap<usize, Vec<(usize, Vec<u8>)>> = BTreeMap::new();
        for (fi, data) in items {
            groups.entry(self.files[fi].bundle_index).or_default().push((fi, data));
        }

        for (target, group) in groups {
            let mut bundle = self.open_bundle(provider, target)?;
            for (fi, _) in &group {
                self.release(*fi);
            }
            let mut buffer = self.live_data(&mut bundle, target)?;
            for (fi, data) in group {
                self.assign(fi, target, buffer.len(), data.len())?;
                buffer.extend_from_slice(&data);
            }
            self.flush(provider, target, bundle, &buffer)?;
        }

        if count > 0 {
            self.save()?;
            info!(count, "files replaced in their own bundles");
        }
        Ok(count)
    }

    /// Replaces one file inside its own bundle and saves the index.
    pub fn write_file<P: BundleProvider>(&mut self, provider: &mut P, path_hash: u64, data: Vec<u8>) -> Result<()> {
        self.replace_many_in_place(provider, vec![(path_hash, data)])?;
        Ok(())
    }

    fn write_batch<P: BundleProvider>(&mut self, provider: &mut P, items: Vec<(u64, Vec<u8>)>) -> Result<usize> {
        if self.options.keep_original_bundle {
            self.replace_many_in_place(provider, items)
        } else {
            self.replace_many(provider, items)
        }
    }

    /// Replaces a file from `src`, or a directory's files from the same
    /// relative paths under `src`. Files missing on disk are skipped.
    pub fn replace<P: BundleProvider>(&mut self, provider: &mut P, node: NodeId, src: &Path) -> Result<usize> {
        let base = self.tree.path_of(node);
        let single = !self.tree.node(node).is_dir();

        let mut items = Vec::new();
        for leaf in self.tree.files_under(node) {
            let Some(&fi) = self.tree.node(leaf).file() else { continue };
            let disk = if single {
                src.to_path_buf()
            } else {
                let path = self.tree.path_of(leaf);
                src.join(path.strip_prefix(base.as_str()).unwrap_or(path.as_str()))
            };
            if disk.is_file() {
                items.push((self.files[fi].path_hash, fs::read(&disk)?));
            } else {
                debug!("{} not on disk, skipped", disk.display());
            }
        }
        self.write_batch(provider, items)
    }

    /// Replaces every indexed file that has a counterpart under `dir`, using
    /// the path relative to `dir`. Returns the number replaced.
    pub fn patch_from_dir<P: BundleProvider>(&mut self, provider: &mut P, dir: &Path) -> Result<usize> {
        let mut items = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_archive_path(dir, entry.path());
            match self.file(&rel) {
                Some(f) => items.push((f.path_hash, fs::read(entry.path())?)),
                None => warn!("{} is not in the index, skipped", rel),
            }
        }
        self.write_batch(provider, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressorId, StoredCompressor};
    use std::collections::HashSet;

    /// Bundles held in memory; names in `broken` fail to open.
    #[derive(Default)]
    struct MemBundles {
        data:    HashMap<String, Vec<u8>>,
        broken:  HashSet<String>,
        commits: Vec<String>,
    }

    impl BundleProvider for MemBundles {
        type Stream = Cursor<Vec<u8>>;

        fn open(&mut self, path: &str) -> Result<Self::Stream> {
            if self.broken.contains(path) {
                return Err(Error::corrupt(0, "broken"));
            }
            self.data.get(path).cloned().map(Cursor::new).ok_or_else(|| Error::not_found(path))
        }

        fn commit(&mut self, path: &str, stream: Self::Stream) -> Result<()> {
            self.data.insert(path.to_string(), stream.into_inner());
            self.commits.push(path.to_string());
            Ok(())
        }
    }

    fn fixture(scheme: NameHashScheme, options: StoreOptions) -> (Index<Cursor<Vec<u8>>>, MemBundles) {
        let built = IndexBuilder::new(Arc::new(StoredCompressor), CompressorId::None, scheme)
            .chunk_size(8)
            .bundle("Folders/a", &[("Data/one.dat", b"1111".as_slice()), ("Data/two.dat", b"22".as_slice())])
            .bundle("Folders/b", &[("Art/pic.dds", b"pppppppppp".as_slice()), ("root.txt", b"r".as_slice())])
            .build()
            .unwrap();
        let mut bundles = MemBundles::default();
        for (path, bytes) in built.bundles {
            bundles.data.insert(path, bytes);
        }
        let index = Index::open(Cursor::new(built.index), Arc::new(StoredCompressor), options).unwrap();
        (index, bundles)
    }

    #[test]
    fn open_names_files_and_infers_valid_size() {
        let (index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        assert_eq!(index.scheme(), NameHashScheme::Fnv1a64);
        assert_eq!(index.bundles()[0].valid_size, 6);
        assert_eq!(index.bundles()[1].valid_size, 11);

        let f = index.file("data/ONE.dat").unwrap();
        assert_eq!(f.path(), Some("Data/one.dat"));
        assert_eq!(index.read_file(&mut bundles, f).unwrap(), b"1111");

        let node = index.find_node("Art\\pic.dds").unwrap();
        assert_eq!(index.path_of(node), "Art/pic.dds");
        assert!(index.find_node("art/pic.dds").is_none());
    }

    #[test]
    fn murmur_scheme_is_detected_from_root_directory() {
        let (index, _) = fixture(NameHashScheme::Murmur64A, StoreOptions::default());
        assert_eq!(index.scheme(), NameHashScheme::Murmur64A);
        assert!(index.file("Data/two.dat").is_some());
    }

    #[test]
    fn save_and_reopen_keeps_tables_and_names() {
        let (mut index, _) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        index.save().unwrap();
        let files = index.files().to_vec();
        let reopened = Index::open(index.into_inner(), Arc::new(StoredCompressor), StoreOptions::default()).unwrap();
        assert_eq!(reopened.files(), files.as_slice());
    }

    #[test]
    fn replace_many_appends_to_smallest_bundle() {
        let (mut index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        let hash = index.path_hash("Art/pic.dds");
        index.replace_many(&mut bundles, vec![(hash, b"new picture".to_vec())]).unwrap();

        // Folders/a (6 bytes) is smaller than Folders/b (11 bytes).
        let f = index.file("Art/pic.dds").unwrap().clone();
        assert_eq!((f.bundle_index, f.offset, f.size), (0, 6, 11));
        assert_eq!(index.bundles()[0].uncompressed_size, 17);
        assert_eq!(index.read_file(&mut bundles, &f).unwrap(), b"new picture");

        // pic.dds was not the tail of Folders/b, so its valid size stays.
        assert_eq!(index.bundles()[1].valid_size, 11);
        let reopened = Index::open(index.into_inner(), Arc::new(StoredCompressor), StoreOptions::default()).unwrap();
        assert_eq!(reopened.file("Art/pic.dds").unwrap().offset, 6);
    }

    #[test]
    fn tail_occupant_release_shrinks_valid_size() {
        let (mut index, _) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        let hash = index.path_hash("root.txt");
        index.redirect(hash, 0, 100, 1).unwrap();
        assert_eq!(index.bundles()[1].valid_size, 10);
        assert!(matches!(index.redirect(hash, 9, 0, 1), Err(Error::ArgumentInvalid(_))));
    }

    #[test]
    fn small_cap_flushes_and_moves_on() {
        let options = StoreOptions { bundle_size_cap: 8, ..StoreOptions::default() };
        let (mut index, mut bundles) = fixture(NameHashScheme::Fnv1a64, options);
        let a = index.path_hash("Data/one.dat");
        let b = index.path_hash("root.txt");
        index
            .replace_many(&mut bundles, vec![(a, b"AAAAAAAA".to_vec()), (b, b"BBBB".to_vec())])
            .unwrap();

        // Folders/a is flushed and picked again for the first item, which
        // makes it 14 bytes. The second item no longer fits, so it goes to
        // Folders/b, now the smaller bundle.
        let one = index.file("Data/one.dat").unwrap().clone();
        let root = index.file("root.txt").unwrap().clone();
        assert_eq!((one.bundle_index, one.offset), (0, 6));
        assert_eq!((root.bundle_index, root.offset), (1, 11));
        assert_eq!(index.bundles()[0].uncompressed_size, 14);
        assert_eq!(index.bundles()[1].uncompressed_size, 15);
        assert_eq!(index.read_file(&mut bundles, &one).unwrap(), b"AAAAAAAA");
        assert_eq!(index.read_file(&mut bundles, &root).unwrap(), b"BBBB");
    }

    #[test]
    fn doubled_cap_carries_over_to_later_items() {
        let options = StoreOptions { bundle_size_cap: 8, ..StoreOptions::default() };
        let (mut index, mut bundles) = fixture(NameHashScheme::Fnv1a64, options);
        let one = index.path_hash("Data/one.dat");
        let pic = index.path_hash("Art/pic.dds");
        let root = index.path_hash("root.txt");
        index
            .replace_many(&mut bundles, vec![
                (one, b"AAAAA".to_vec()),
                (pic, b"PPPP".to_vec()),
                (root, b"R".to_vec()),
            ])
            .unwrap();

        // The second flush leaves Folders/a at 11 bytes, over the cap of 8,
        // so the cap becomes 16. The last item brings the buffer to exactly
        // 16 and is appended without another flush.
        assert_eq!(bundles.commits, ["Folders/a", "Folders/a", "Folders/a"]);
        let placed: Vec<_> = ["Data/one.dat", "Art/pic.dds", "root.txt"]
            .iter()
            .map(|p| {
                let f = index.file(p).unwrap();
                (f.bundle_index, f.offset, f.size)
            })
            .collect();
        assert_eq!(placed, [(0, 6, 5), (0, 11, 4), (0, 15, 1)]);
        assert_eq!(index.bundles()[0].uncompressed_size, 16);
        // root.txt was the tail of Folders/b.
        assert_eq!(index.bundles()[1].valid_size, 10);

        let f = index.file("root.txt").unwrap().clone();
        assert_eq!(index.read_file(&mut bundles, &f).unwrap(), b"R");
        let f = index.file("Art/pic.dds").unwrap().clone();
        assert_eq!(index.read_file(&mut bundles, &f).unwrap(), b"PPPP");
    }

    #[test]
    fn in_place_keeps_bundle_and_reclaims_tail() {
        let (mut index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        let hash = index.path_hash("root.txt");
        index.write_file(&mut bundles, hash, b"rooted".to_vec()).unwrap();

        let f = index.file("root.txt").unwrap().clone();
        assert_eq!((f.bundle_index, f.offset, f.size), (1, 10, 6));
        assert_eq!(index.bundles()[1].uncompressed_size, 16);
        assert_eq!(index.read_file(&mut bundles, &f).unwrap(), b"rooted");
    }

    #[test]
    fn no_openable_bundle_is_fatal() {
        let (mut index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        bundles.broken.extend(["Folders/a".to_string(), "Folders/b".to_string()]);
        let hash = index.path_hash("root.txt");
        let err = index.replace_many(&mut bundles, vec![(hash, b"x".to_vec())]);
        assert!(matches!(err, Err(Error::NoValidBundle)));
    }

    #[test]
    fn smallest_bundle_skips_broken_candidates() {
        let (index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        bundles.broken.insert("Folders/a".to_string());
        let (i, _) = index.find_smallest_bundle(&mut bundles).unwrap();
        assert_eq!(i, 1);
    }

    #[test]
    fn extract_paths_fails_on_unknown_path() {
        let (index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        let got = index.extract_paths(&mut bundles, &["root.txt", "Data/two.dat"]).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.contains(&("root.txt".to_string(), b"r".to_vec())));
        assert!(matches!(
            index.extract_paths(&mut bundles, &["nope.txt"]),
            Err(Error::NotFound(p)) if p == "nope.txt"
        ));
    }

    #[test]
    fn extract_skips_unavailable_bundle() {
        let (index, mut bundles) = fixture(NameHashScheme::Fnv1a64, StoreOptions::default());
        bundles.broken.insert("Folders/b".to_string());
        let dir = tempfile::tempdir().unwrap();
        let n = index.extract(&mut bundles, PathTree::<usize>::ROOT, dir.path()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(fs::read(dir.path().join("Data/two.dat")).unwrap(), b"22");
        assert!(!dir.path().join("root.txt").exists());
    }
}
