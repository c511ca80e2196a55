//! Bundle index and bundles stored as files inside a pack file.
//!
//! The index lives at `Bundles2/_.index.bin` and bundle `P` at
//! `Bundles2/P.bundle.bin`. Bundle writes go through [`Ggpk::replace_file`],
//! so they are relocated inside the pack file like any other record.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::bundle::BUNDLE_EXTENSION;
use crate::codec::Compressor;
use crate::config::StoreOptions;
use crate::cursor::Storage;
use crate::error::{Error, Result};
use crate::ggpk::{Ggpk, GgpkFileStream};
use crate::index::{BundleProvider, Index, INDEX_FILE_NAME};
use crate::tree::NodeId;

pub const BUNDLES_DIR: &str = "Bundles2";

/// Archive path of the index file.
pub fn index_path() -> String {
    format!("{}/{}", BUNDLES_DIR, INDEX_FILE_NAME)
}

/// Archive path of the bundle with index path `bundle_path`.
pub fn bundle_path(bundle_path: &str) -> String {
    format!("{}/{}{}", BUNDLES_DIR, bundle_path, BUNDLE_EXTENSION)
}

/// Opens bundles from the pack file.
pub struct GgpkBundles<'a, S: Storage> {
    ggpk: &'a mut Ggpk<S>,
}

impl<'a, S: Storage> GgpkBundles<'a, S> {
    pub fn new(ggpk: &'a mut Ggpk<S>) -> Self {
        Self { ggpk }
    }
}

impl<S: Storage> BundleProvider for GgpkBundles<'_, S> {
    type Stream = GgpkFileStream;

    fn open(&mut self, path: &str) -> Result<GgpkFileStream> {
        let id = self.ggpk.find_file(&bundle_path(path))?;
        self.ggpk.open_file_stream(id)
    }

    fn commit(&mut self, _path: &str, mut stream: GgpkFileStream) -> Result<()> {
        self.ggpk.commit(&mut stream)?;
        Ok(())
    }
}

pub struct BundledGgpk<S: Storage = File> {
    ggpk:  Ggpk<S>,
    index: Index<GgpkFileStream>,
}

impl BundledGgpk<File> {
    pub fn open(path: impl AsRef<Path>, compressor: Arc<dyn Compressor>, options: StoreOptions) -> Result<Self> {
        Self::from_ggpk(Ggpk::open(path)?, compressor, options)
    }
}

impl<S: Storage> BundledGgpk<S> {
    pub fn from_ggpk(mut ggpk: Ggpk<S>, compressor: Arc<dyn Compressor>, options: StoreOptions) -> Result<Self> {
        let id = ggpk.find_file(&index_path())?;
        let stream = ggpk.open_file_stream(id)?;
        let index = Index::open(stream, compressor, options)?;
        info!(files = index.files().len(), "bundled pack file opened");
        Ok(Self { ggpk, index })
    }

    pub fn ggpk(&self) -> &Ggpk<S> {
        &self.ggpk
    }

    pub fn ggpk_mut(&mut self) -> &mut Ggpk<S> {
        &mut self.ggpk
    }

    pub fn index(&self) -> &Index<GgpkFileStream> {
        &self.index
    }

    pub fn into_inner(self) -> Ggpk<S> {
        self.ggpk
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let record = self.index.file(path).ok_or_else(|| Error::not_found(path))?;
        self.index.read_file(&mut GgpkBundles::new(&mut self.ggpk), record)
    }

    /// See [`Index::extract`].
    pub fn extract(&mut self, node: NodeId, dest: &Path) -> Result<usize> {
        self.index.extract(&mut GgpkBundles::new(&mut self.ggpk), node, dest)
    }

    /// Writes new content for each `(path, bytes)`, honouring
    /// `keep_original_bundle`, and stores the updated index.
    pub fn replace_many(&mut self, items: Vec<(String, Vec<u8>)>) -> Result<usize> {
        let items = items
            .into_iter()
            .map(|(path, data)| match self.index.file(&path) {
                Some(f) => Ok((f.path_hash, data)),
                None => Err(Error::not_found(path)),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut bundles = GgpkBundles::new(&mut self.ggpk);
        let count = if self.index.options().keep_original_bundle {
            self.index.replace_many_in_place(&mut bundles, items)?
        } else {
            self.index.replace_many(&mut bundles, items)?
        };
        self.save_index()?;
        Ok(count)
    }

    /// See [`Index::patch_from_dir`].
    pub fn patch_from_dir(&mut self, dir: &Path) -> Result<usize> {
        let count = self.index.patch_from_dir(&mut GgpkBundles::new(&mut self.ggpk), dir)?;
        self.save_index()?;
        Ok(count)
    }

    /// Writes the index bytes back into the pack file if they changed.
    pub fn save_index(&mut self) -> Result<bool> {
        self.ggpk.commit(self.index.get_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressorId, StoredCompressor};
    use crate::ggpk::create;
    use crate::hash::NameHashScheme;
    use crate::index::IndexBuilder;
    use std::io::Cursor;

    fn sample() -> BundledGgpk<Cursor<Vec<u8>>> {
        let built = IndexBuilder::new(Arc::new(StoredCompressor), CompressorId::None, NameHashScheme::Murmur64A)
            .bundle("Folders/x", &[("Data/a.dat", b"alpha".as_slice())])
            .bundle("Folders/y", &[("Data/b.dat", b"bravo bravo".as_slice())])
            .build()
            .unwrap();

        let mut files: Vec<(String, Vec<u8>)> = vec![(index_path(), built.index)];
        for (path, bytes) in built.bundles {
            files.push((bundle_path(&path), bytes));
        }
        let refs: Vec<(&str, &[u8])> = files.iter().map(|(p, d)| (p.as_str(), d.as_slice())).collect();
        let ggpk = create(Cursor::new(Vec::new()), 3, &refs).unwrap();
        BundledGgpk::from_ggpk(ggpk, Arc::new(StoredCompressor), StoreOptions::default()).unwrap()
    }

    #[test]
    fn reads_through_the_pack_file() {
        let mut b = sample();
        assert_eq!(b.read_file("data/a.dat").unwrap(), b"alpha");
        assert!(matches!(b.read_file("data/none.dat"), Err(Error::NotFound(_))));
    }

    #[test]
    fn replacement_survives_reopen() {
        let mut b = sample();
        let n = b.replace_many(vec![("Data/b.dat".to_string(), b"changed".to_vec())]).unwrap();
        assert_eq!(n, 1);
        assert!(!b.save_index().unwrap());

        let ggpk = Ggpk::from_stream(b.into_inner().into_inner()).unwrap();
        let mut reopened = BundledGgpk::from_ggpk(ggpk, Arc::new(StoredCompressor), StoreOptions::default()).unwrap();
        assert_eq!(reopened.read_file("Data/b.dat").unwrap(), b"changed");
        assert_eq!(reopened.read_file("Data/a.dat").unwrap(), b"alpha");
        // Folders/x was the smaller bundle.
        assert_eq!(reopened.index().file("Data/b.dat").unwrap().bundle_index, 0);
    }
}
