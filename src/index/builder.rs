//! Writes a fresh index and its bundles from in-memory content.
//!
//! Every directory gets its own dictionary range: one base name holding the
//! directory path, then the file names relative to it. Files at the top
//! level are named without a base.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{write_tables, BundleRecord, DirectoryRecord, FileRecord};
use crate::bundle::{Bundle, DEFAULT_CHUNK_SIZE};
use crate::codec::{Compressor, CompressorId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};
use crate::hash::NameHashScheme;

/// Output of [`IndexBuilder::build`]: the index bundle and every content
/// bundle keyed by its index path.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub index:   Vec<u8>,
    pub bundles: Vec<(String, Vec<u8>)>,
}

pub struct IndexBuilder {
    compressor: Arc<dyn Compressor>,
    id:         CompressorId,
    scheme:     NameHashScheme,
    chunk_size: i32,
    level:      i32,
    bundles:    Vec<(String, Vec<(String, Vec<u8>)>)>,
}

impl IndexBuilder {
    pub fn new(compressor: Arc<dyn Compressor>, id: CompressorId, scheme: NameHashScheme) -> Self {
        Self {
            compressor,
            id,
            scheme,
            chunk_size: DEFAULT_CHUNK_SIZE,
            level: DEFAULT_COMPRESSION_LEVEL,
            bundles: Vec::new(),
        }
    }

    pub fn chunk_size(mut self, chunk_size: i32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Adds a bundle holding `files` back to back, in the given order.
    pub fn bundle(mut self, path: &str, files: &[(&str, &[u8])]) -> Self {
        let files = files.iter().map(|(p, d)| (p.to_string(), d.to_vec())).collect();
        self.bundles.push((path.to_string(), files));
        self
    }

    fn pack(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut bundle = Bundle::create(Cursor::new(Vec::new()), Arc::clone(&self.compressor), self.id, self.chunk_size)?;
        bundle.write_all(data, self.level)?;
        Ok(bundle.into_inner().into_inner())
    }

    pub fn build(self) -> Result<BuiltIndex> {
        let mut bundles = Vec::with_capacity(self.bundles.len());
        let mut records = Vec::with_capacity(self.bundles.len());
        let mut files = Vec::new();
        let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
        by_dir.insert(String::new(), Vec::new());

        for (bundle_index, (bundle_path, content)) in self.bundles.iter().enumerate() {
            let mut data = Vec::new();
            for (path, bytes) in content {
                let path_hash = self.scheme.hash(path);
                if files.iter().any(|f: &FileRecord| f.path_hash == path_hash) {
                    return Err(Error::ArgumentInvalid(format!("duplicate file path {:?}", path)));
                }
                let (dir, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
                by_dir.entry(dir.to_string()).or_default().push(name.to_string());

                files.push(FileRecord {
                    path_hash,
                    bundle_index,
                    offset: data.len() as u32,
                    size: bytes.len() as u32,
                    directory: None,
                    path: Some(path.clone()),
                });
                data.extend_from_slice(bytes);
            }
            let size = u32::try_from(data.len())
                .map_err(|_| Error::ArgumentInvalid(format!("bundle {} is too large", bundle_path)))?;
            records.push(BundleRecord { path: bundle_path.clone(), uncompressed_size: size, valid_size: size });
            bundles.push((bundle_path.clone(), self.pack(&data)?));
        }

        let mut names = Vec::new();
        let mut directories = Vec::with_capacity(by_dir.len());
        for (dir, file_names) in &by_dir {
            let start = names.len();
            if !dir.is_empty() {
                names.write_i32::<LittleEndian>(0)?;
                push_name(&mut names, &format!("{}/", dir))?;
                names.write_i32::<LittleEndian>(0)?;
            }
            for name in file_names {
                push_name(&mut names, name)?;
            }
            let path_hash = if dir.is_empty() { self.scheme.hash("") } else { self.scheme.hash(&format!("{}/", dir)) };
            let size = (names.len() - start) as u32;
            directories.push(DirectoryRecord { path_hash, offset: start as u32, size, recursive_size: size as i32 });
        }

        let mut tables = Vec::new();
        write_tables(&mut tables, &records, &files, &directories)?;
        tables.extend_from_slice(&self.pack(&names)?);

        Ok(BuiltIndex { index: self.pack(&tables)?, bundles })
    }
}

/// Name slot 1: prefixed with the first base name, if any.
fn push_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    out.write_i32::<LittleEndian>(1)?;
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    Ok(())
}
