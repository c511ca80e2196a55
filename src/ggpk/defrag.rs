//! Best-effort compaction of a pack file.
//!
//! Free regions are merged first. Then, lowest offset first, each free region
//! is filled with records that sit after it and fit exactly or with at least
//! 16 bytes to spare, smallest records first. Regions vacated by those moves
//! are queued as well. Nothing is rewritten when no record fits, so the file
//! may keep holes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::info;

use super::record::{RecordSpan, FREE_RECORD_MIN};
use super::{Ggpk, NodeId};
use crate::cursor::Storage;
use crate::error::Result;

impl<S: Storage> Ggpk<S> {
    /// Merges adjacent free regions and truncates a free tail.
    pub fn concat_free_records(&mut self) -> Result<()> {
        self.free.concat(&mut self.stream, &mut self.header)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Moves records toward the start of the file. `progress` receives the
    /// running count of moved records; the final count is returned.
    pub fn defragment(&mut self, mut progress: impl FnMut(usize)) -> Result<usize> {
        self.concat_free_records()?;

        let mut queue: BinaryHeap<Reverse<u64>> = self.free.iter().map(|r| Reverse(r.offset)).collect();
        let mut candidates: Vec<NodeId> = self.all_nodes()?;
        candidates.sort_by_key(|&id| Reverse(self.nodes[id].length()));

        let mut moved = 0;
        while let Some(Reverse(handle)) = queue.pop() {
            let mut i = candidates.len();
            while i > 0 {
                i -= 1;
                let Some(free) = self.free.get(handle).copied() else { break };
                let id = candidates[i];
                let (offset, length) = (self.nodes[id].offset(), self.nodes[id].length());
                if length > free.length {
                    break;
                }
                if length != free.length && length + FREE_RECORD_MIN > free.length {
                    continue;
                }
                if offset <= free.offset {
                    continue;
                }

                candidates.remove(i);
                if let Some(vacated) = self.move_node(id, Some(handle))? {
                    queue.push(Reverse(vacated));
                }
                moved += 1;
                progress(moved);
            }
        }

        self.concat_free_records()?;
        info!(moved, free_regions = self.free.len(), "defragmented");
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use crate::ggpk::record::RecordSpan;
    use crate::ggpk::{create, Ggpk};
    use std::io::Cursor;

    #[test]
    fn fills_hole_left_by_grown_file() {
        let mut g = create(
            Cursor::new(Vec::new()),
            3,
            &[
                ("a.bin", vec![1u8; 64].as_slice()),
                ("b.bin", vec![2u8; 8].as_slice()),
                ("c.bin", vec![3u8; 8].as_slice()),
            ],
        )
        .unwrap();

        // Growing a.bin leaves a hole at the front of the file.
        let a = g.find_file("a.bin").unwrap();
        let c = g.find_file("c.bin").unwrap();
        g.replace_file(a, &[9u8; 200]).unwrap();
        assert_eq!(g.free_list().len(), 1);
        let hole = g.free_list().iter().next().unwrap().offset;
        let c_before = g.node(c).offset();

        let mut reports = Vec::new();
        let moved = g.defragment(|n| reports.push(n)).unwrap();
        assert!(moved > 0);
        assert_eq!(reports.last(), Some(&moved));
        assert!(g.node(c).offset() < c_before);
        assert!(g.node(c).offset() >= hole);

        let regions: Vec<_> = g.free_list().iter().copied().collect();
        for r in &regions {
            assert!(regions.iter().all(|o| o.offset != r.end()));
        }

        let mut reopened = Ggpk::from_stream(g.into_inner()).unwrap();
        for (path, expected) in [("a.bin", vec![9u8; 200]), ("b.bin", vec![2u8; 8]), ("c.bin", vec![3u8; 8])] {
            let id = reopened.find_file(path).unwrap();
            assert_eq!(reopened.read_file(id).unwrap(), expected);
        }
    }

    #[test]
    fn record_right_after_hole_moves_into_it() {
        let mut g = create(
            Cursor::new(Vec::new()),
            3,
            &[("a.bin", [1u8].as_slice()), ("b.bin", [2u8].as_slice())],
        )
        .unwrap();

        let a = g.find_file("a.bin").unwrap();
        let b = g.find_file("b.bin").unwrap();
        g.replace_file(a, &[9u8; 300]).unwrap();

        let hole = *g.free_list().iter().next().unwrap();
        assert_eq!(hole.end(), g.node(b).offset());
        assert_eq!(hole.length, g.node(b).length());
        let b_before = g.node(b).offset();

        let moved = g.defragment(|_| {}).unwrap();
        assert_eq!(moved, 1);
        assert_eq!(g.node(b).offset(), hole.offset);
        let regions: Vec<_> = g.free_list().iter().map(|r| (r.offset, r.length)).collect();
        assert_eq!(regions, vec![(b_before, hole.length)]);

        let mut reopened = Ggpk::from_stream(g.into_inner()).unwrap();
        let b = reopened.find_file("b.bin").unwrap();
        assert_eq!(reopened.node(b).offset(), hole.offset);
        assert_eq!(reopened.read_file(b).unwrap(), vec![2u8]);
        let a = reopened.find_file("a.bin").unwrap();
        assert_eq!(reopened.read_file(a).unwrap(), vec![9u8; 300]);
    }
}
