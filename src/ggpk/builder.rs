//! Writes a fresh pack file from in-memory content.
//!
//! Records are laid out depth-first with children ahead of their directory,
//! so the root directory is the last record in the file.

use std::io::{Seek, SeekFrom, Write};

use sha2::{Digest, Sha256};

use super::record::{ContainerRecord, DirectoryEntry, DirectoryRecord, FileRecord};
use super::Ggpk;
use crate::cursor::{NameEncoding, Storage};
use crate::error::{Error, Result};
use crate::hash::ggpk_name_hash;
use crate::tree::{split_path, NodeId, NodeKind, PathTree};

/// Truncates `stream` and writes a container holding `files`, then opens it.
pub fn create<S: Storage>(mut stream: S, version: u32, files: &[(&str, &[u8])]) -> Result<Ggpk<S>> {
    let encoding = NameEncoding::for_version(version);

    let mut tree = PathTree::new();
    for (i, (path, _)) in files.iter().enumerate() {
        let normalized = split_path(path).collect::<Vec<_>>().join("/");
        if normalized.is_empty() {
            return Err(Error::ArgumentInvalid(format!("empty file path {:?}", path)));
        }
        if tree.find(&normalized, None).is_some() {
            return Err(Error::ArgumentInvalid(format!("duplicate file path {:?}", path)));
        }
        tree.insert_file(&normalized, i);
    }

    stream.set_len(0)?;
    stream.seek(SeekFrom::Start(0))?;
    let mut header = ContainerRecord { offset: 0, version, root_offset: 0, first_free_offset: 0 };
    header.write(&mut stream)?;

    header.root_offset = write_node(&mut stream, &tree, PathTree::<usize>::ROOT, files, encoding)?;
    stream.seek(SeekFrom::Start(0))?;
    header.write(&mut stream)?;
    stream.flush()?;

    Ggpk::from_stream(stream)
}

fn write_node<S: Storage>(
    stream: &mut S,
    tree: &PathTree<usize>,
    id: NodeId,
    files: &[(&str, &[u8])],
    encoding: NameEncoding,
) -> Result<u64> {
    let node = tree.node(id);
    match &node.kind {
        NodeKind::File(i) => {
            let data = files[*i].1;
            let mut record = FileRecord {
                offset:      0,
                length:      0,
                name:        node.name.clone(),
                hash:        Sha256::digest(data).into(),
                data_offset: 0,
                data_length: u32::try_from(data.len())
                    .map_err(|_| Error::ArgumentInvalid(format!("{} is too large", files[*i].0)))?,
            };
            record.write_header(stream, encoding)?;
            stream.write_all(data)?;
            Ok(record.offset)
        }
        NodeKind::Directory { children } => {
            let mut entries = Vec::with_capacity(children.len());
            for &child in children {
                let offset = write_node(stream, tree, child, files, encoding)?;
                entries.push(DirectoryEntry { name_hash: ggpk_name_hash(&tree.node(child).name), offset });
            }
            let mut dir = DirectoryRecord::new(&node.name, entries, encoding);
            dir.write(stream, encoding)?;
            Ok(dir.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ggpk::record::RecordSpan;
    use std::io::Cursor;

    #[test]
    fn root_is_written_last() {
        let g = create(Cursor::new(Vec::new()), 3, &[("a/b.txt", b"hi".as_slice())]).unwrap();
        let root_end = g.node(Ggpk::<Cursor<Vec<u8>>>::ROOT).end();
        let file_len = g.into_inner().into_inner().len() as u64;
        assert_eq!(root_end, file_len);
    }

    #[test]
    fn utf32_container_roundtrips_names() {
        let mut g = create(Cursor::new(Vec::new()), 4, &[("Métal/ß.dat", b"x".as_slice())]).unwrap();
        let id = g.find_file("Métal/ß.dat").unwrap();
        assert_eq!(g.read_file(id).unwrap(), b"x");
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let err = create(
            Cursor::new(Vec::new()),
            3,
            &[("a.txt", b"1".as_slice()), ("a.txt", b"2".as_slice())],
        );
        assert!(matches!(err, Err(Error::ArgumentInvalid(_))));
    }
}
