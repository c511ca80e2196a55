//! Free-space list of a GGPK file.
//!
//! Free records form a singly linked chain through the file, starting at
//! `ContainerRecord::first_free_offset` and ending at a `next_free_offset`
//! of 0. [`FreeList`] mirrors that chain in link order and keeps every edit
//! in sync with the on-disk pointers.
//!
//! Regions are identified by their offset ([`FreeHandle`]). Two free regions
//! are never left adjacent by [`FreeList::mark_free`]; regions that reach
//! the end of the file are truncated away instead of being recorded.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use super::record::{read_header, ContainerRecord, FreeRecord, RecordSpan, RecordTag, FREE_RECORD_MIN};
use crate::cursor::Storage;
use crate::error::{Error, Result};

/// Offset of a free region.
pub type FreeHandle = u64;

#[derive(Debug, Clone, Default)]
pub struct FreeList {
    records: Vec<FreeRecord>,
}

impl FreeList {
    /// Walks the chain from `first` until a zero `next_free_offset`.
    pub fn load<R: Read + Seek>(r: &mut R, first: u64) -> Result<Self> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut next = first;
        while next != 0 {
            if !seen.insert(next) {
                return Err(Error::corrupt(next, "free list loops back on itself"));
            }
            r.seek(SeekFrom::Start(next))?;
            let (length, tag) = read_header(r, next)?;
            if tag != RecordTag::Free {
                return Err(Error::corrupt(next, format!("free list points at a {:?} record", tag)));
            }
            let free = FreeRecord::read_body(r, next, length)?;
            next = free.next_free_offset;
            records.push(free);
        }
        Ok(FreeList { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Regions in link order.
    pub fn iter(&self) -> impl Iterator<Item = &FreeRecord> {
        self.records.iter()
    }

    pub fn get(&self, handle: FreeHandle) -> Option<&FreeRecord> {
        self.records.iter().find(|r| r.offset == handle)
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.length as u64).sum()
    }

    fn index_of(&self, handle: FreeHandle) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.offset == handle)
            .ok_or_else(|| Error::corrupt(handle, "region is not in the free list"))
    }

    // ── Allocation ───────────────────────────────────────────────────────────

    /// Smallest region that fits `length` exactly or with at least
    /// [`FREE_RECORD_MIN`] bytes to spare. An exact fit wins immediately;
    /// on equal slack the first region in link order wins.
    pub fn find_best_fit(&self, length: u32) -> Option<FreeHandle> {
        let mut best = None;
        let mut best_slack = u32::MAX;
        for r in &self.records {
            if r.length == length {
                return Some(r.offset);
            }
            if r.length > length {
                let slack = r.length - length;
                if slack < best_slack && slack >= FREE_RECORD_MIN {
                    best = Some(r.offset);
                    best_slack = slack;
                }
            }
        }
        best
    }

    /// Carves `length` bytes off the tail of region `handle` and returns the
    /// offset to write at. The region shrinks in place, or leaves the list
    /// when fewer than [`FREE_RECORD_MIN`] bytes remain.
    pub fn take<S: Storage>(
        &mut self,
        s: &mut S,
        header: &mut ContainerRecord,
        handle: FreeHandle,
        length: u32,
    ) -> Result<u64> {
        let idx = self.index_of(handle)?;
        let free = self.records[idx];
        if free.length < length {
            return Err(Error::corrupt(handle, format!(
                "free region of {} bytes cannot hold {}", free.length, length,
            )));
        }
        let slack = free.length - length;
        let at = free.offset + slack as u64;
        if slack >= FREE_RECORD_MIN {
            self.records[idx].length = slack;
            patch_u32(s, free.offset, slack)?;
        } else {
            self.remove(s, header, handle)?;
        }
        debug!(offset = at, length, slack, "allocated from free region {}", handle);
        Ok(at)
    }

    // ── Release ──────────────────────────────────────────────────────────────

    /// Returns `[offset, offset + length)` to the free list, merging it with
    /// any adjacent regions. Returns `None` when the merged region reached
    /// the end of the file and was truncated away.
    pub fn mark_free<S: Storage>(
        &mut self,
        s: &mut S,
        header: &mut ContainerRecord,
        offset: u64,
        length: u32,
    ) -> Result<Option<FreeHandle>> {
        let mut start = offset;
        let mut end = offset + length as u64;
        let mut absorbed: Vec<FreeHandle> = Vec::new();

        loop {
            let mut merged = false;
            for r in &self.records {
                if absorbed.contains(&r.offset) {
                    continue;
                }
                if r.end() == start {
                    start = r.offset;
                    absorbed.push(r.offset);
                    merged = true;
                } else if r.offset == end {
                    end = r.end();
                    absorbed.push(r.offset);
                    merged = true;
                }
            }
            if !merged {
                break;
            }
        }

        if end >= s.total_len()? {
            for handle in &absorbed {
                self.remove(s, header, *handle)?;
            }
            s.set_len(start)?;
            debug!(offset = start, "truncated free tail");
            return Ok(None);
        }

        let merged_len = u32::try_from(end - start)
            .map_err(|_| Error::corrupt(start, "merged free region exceeds 4 GiB"))?;

        // The region keeps the identity of an existing node that starts it.
        let survivor = absorbed.iter().copied().find(|&h| h == start);
        for handle in absorbed.iter().copied().filter(|&h| Some(h) != survivor) {
            self.remove(s, header, handle)?;
        }

        if let Some(handle) = survivor {
            let idx = self.index_of(handle)?;
            self.records[idx].length = merged_len;
            patch_u32(s, handle, merged_len)?;
            debug!(offset = handle, length = merged_len, "grew free region");
            return Ok(Some(handle));
        }

        let free = FreeRecord { offset: start, length: merged_len, next_free_offset: 0 };
        s.seek(SeekFrom::Start(start))?;
        free.write(s)?;
        self.link_tail(s, header, start)?;
        self.records.push(free);
        debug!(offset = start, length = merged_len, "new free region");
        Ok(Some(start))
    }

    fn link_tail<S: Storage>(&mut self, s: &mut S, header: &mut ContainerRecord, offset: u64) -> Result<()> {
        match self.records.last_mut() {
            Some(tail) => {
                tail.next_free_offset = offset;
                patch_u64(s, tail.offset + FreeRecord::NEXT_FIELD, offset)
            }
            None => {
                header.first_free_offset = offset;
                patch_u64(s, header.offset + ContainerRecord::FIRST_FREE_FIELD, offset)
            }
        }
    }

    /// Unlinks region `handle` on disk and in memory.
    pub fn remove<S: Storage>(&mut self, s: &mut S, header: &mut ContainerRecord, handle: FreeHandle) -> Result<()> {
        let idx = self.index_of(handle)?;
        let next = self.records[idx].next_free_offset;
        if idx == 0 {
            header.first_free_offset = next;
            patch_u64(s, header.offset + ContainerRecord::FIRST_FREE_FIELD, next)?;
        } else {
            let prev = &mut self.records[idx - 1];
            prev.next_free_offset = next;
            patch_u64(s, prev.offset + FreeRecord::NEXT_FIELD, next)?;
        }
        self.records.remove(idx);
        Ok(())
    }

    /// Sorts the list by offset, merges every run of adjacent regions,
    /// truncates a run that ends the file and rewrites the whole chain.
    pub fn concat<S: Storage>(&mut self, s: &mut S, header: &mut ContainerRecord) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        self.records.sort_by_key(|r| r.offset);

        let mut merged: Vec<FreeRecord> = Vec::with_capacity(self.records.len());
        for r in self.records.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == r.offset && (last.length as u64 + r.length as u64) <= u32::MAX as u64 => {
                    last.length += r.length;
                }
                _ => merged.push(r),
            }
        }

        let file_len = s.total_len()?;
        if merged.last().map_or(false, |r| r.end() >= file_len) {
            if let Some(tail) = merged.pop() {
                s.set_len(tail.offset)?;
            }
        }

        for i in 0..merged.len() {
            merged[i].next_free_offset = merged.get(i + 1).map_or(0, |n| n.offset);
            s.seek(SeekFrom::Start(merged[i].offset))?;
            merged[i].write(s)?;
        }
        header.first_free_offset = merged.first().map_or(0, |r| r.offset);
        patch_u64(s, header.offset + ContainerRecord::FIRST_FREE_FIELD, header.first_free_offset)?;

        debug!(regions = merged.len(), "concatenated free regions");
        self.records = merged;
        Ok(())
    }
}

pub(crate) fn patch_u32<S: Storage>(s: &mut S, pos: u64, value: u32) -> Result<()> {
    s.seek(SeekFrom::Start(pos))?;
    s.write_u32::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn patch_u64<S: Storage>(s: &mut S, pos: u64, value: u64) -> Result<()> {
    s.seek(SeekFrom::Start(pos))?;
    s.write_u64::<LittleEndian>(value)?;
    Ok(())
}
