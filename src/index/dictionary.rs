//! Path dictionary decoding.
//!
//! Each directory owns a byte range of the decompressed dictionary. The range
//! is a sequence of `i32` words, each followed by a NUL-terminated name unless
//! the word is 0:
//!
//! * `0` toggles base mode. Entering base mode forgets earlier base names.
//! * `n > 0` reads a name. If `n - 1` indexes an existing base name, that
//!   name is prepended. In base mode the result becomes a new base name,
//!   otherwise it is a complete file path.

use byteorder::{ByteOrder, LittleEndian};

use super::DirectoryRecord;
use crate::cursor::read_cstr;
use crate::error::{Error, Result};

/// Calls `visit(directory, path)` for every file path in the dictionary.
pub(crate) fn decode(
    data: &[u8],
    directories: &[DirectoryRecord],
    mut visit: impl FnMut(usize, String) -> Result<()>,
) -> Result<()> {
    for (d, dir) in directories.iter().enumerate() {
        let start = dir.offset as usize;
        let words = start
            .checked_add(dir.size as usize)
            .and_then(|end| data.get(start..end))
            .ok_or_else(|| {
                Error::corrupt(
                    dir.offset as u64,
                    format!("directory {:016x} lies outside the {}-byte dictionary", dir.path_hash, data.len()),
                )
            })?;

        let mut bases: Vec<String> = Vec::new();
        let mut base_mode = false;
        let mut pos = 0;
        while pos + 4 <= words.len() {
            let word = LittleEndian::read_i32(&words[pos..pos + 4]);
            pos += 4;
            if word == 0 {
                base_mode = !base_mode;
                if base_mode {
                    bases.clear();
                }
                continue;
            }

            let slot = usize::try_from(word as i64 - 1)
                .map_err(|_| Error::corrupt((start + pos - 4) as u64, format!("name index {}", word)))?;
            let mut name = read_cstr(words, &mut pos)
                .ok_or_else(|| Error::corrupt((start + pos) as u64, "unterminated dictionary name"))?;
            if let Some(prefix) = bases.get(slot) {
                name.insert_str(0, prefix);
            }

            if base_mode {
                bases.push(name);
            } else {
                visit(d, name)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn word(out: &mut Vec<u8>, w: i32) {
        out.write_i32::<LittleEndian>(w).unwrap();
    }

    fn name(out: &mut Vec<u8>, w: i32, s: &str) {
        word(out, w);
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }

    fn dir(offset: usize, size: usize) -> DirectoryRecord {
        DirectoryRecord { path_hash: 0, offset: offset as u32, size: size as u32, recursive_size: 0 }
    }

    #[test]
    fn base_names_prefix_file_names() {
        let mut d = Vec::new();
        word(&mut d, 0);
        name(&mut d, 1, "Data/");
        name(&mut d, 1, "Sub/"); // extends "Data/"
        name(&mut d, 5, "Art/"); // no base 4, stays bare
        word(&mut d, 0);
        name(&mut d, 1, "a.dat");
        name(&mut d, 2, "b.dat");
        name(&mut d, 3, "c.dds");
        name(&mut d, 9, "plain.txt");
        word(&mut d, 0);
        name(&mut d, 1, "X/");
        word(&mut d, 0);
        name(&mut d, 1, "y");

        let mut seen = Vec::new();
        decode(&d, &[dir(0, d.len())], |i, p| {
            seen.push((i, p));
            Ok(())
        })
        .unwrap();

        let paths: Vec<&str> = seen.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(paths, ["Data/a.dat", "Data/Sub/b.dat", "Art/c.dds", "plain.txt", "X/y"]);
    }

    #[test]
    fn directories_decode_their_own_range() {
        let mut d = Vec::new();
        name(&mut d, 1, "one");
        let split = d.len();
        name(&mut d, 1, "two");

        let mut seen = Vec::new();
        decode(&d, &[dir(0, split), dir(split, d.len() - split)], |i, p| {
            seen.push((i, p));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, [(0, "one".to_string()), (1, "two".to_string())]);
    }

    #[test]
    fn range_past_dictionary_is_corrupt() {
        let err = decode(&[0u8; 8], &[dir(4, 8)], |_, _| Ok(()));
        assert!(matches!(err, Err(Error::CorruptArchive { .. })));
    }

    #[test]
    fn missing_terminator_is_corrupt() {
        let mut d = Vec::new();
        word(&mut d, 1);
        d.extend_from_slice(b"abc");
        let err = decode(&d, &[dir(0, d.len())], |_, _| Ok(()));
        assert!(matches!(err, Err(Error::CorruptArchive { .. })));
    }
}
