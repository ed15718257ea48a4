//! Index-based intrusive list of frame blocks.
//!
//! The links live inside the [`Frame`](crate::Frame) records (`next`/`prev`
//! as frame table indices), so a list is only a head, a tail and a length.
//! A block is on at most one list at a time; which list is recorded by the
//! head frame's role (`Pmm` for zone free areas, `Pcp` for per-CPU caches,
//! `None` for caller-owned batches).
//!
//! ```text
//!  head ──► [idx 7] ⇄ [idx 2] ⇄ [idx 12] ◄── tail
//!            prev=NIL               next=NIL
//! ```

use crate::frame::NIL;
use crate::frame_table::{FrameHandle, FrameTable};
use kernel_memory_addresses::Pfn;

/// List of block heads linked through their frame records.
///
/// Dropping a non-empty list leaks its blocks; hand it back with
/// [`PhysicalMemoryManager::free_frames`](crate::PhysicalMemoryManager::free_frames).
pub struct FrameList {
    head: u32,
    tail: u32,
    len: usize,
}

impl Default for FrameList {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push_front(&mut self, table: &FrameTable<'_>, idx: u32) {
        let frame = table.at(idx);
        frame.set_prev(NIL);
        frame.set_next(self.head);
        if self.head == NIL {
            self.tail = idx;
        } else {
            table.at(self.head).set_prev(idx);
        }
        self.head = idx;
        self.len += 1;
    }

    pub(crate) fn push_back(&mut self, table: &FrameTable<'_>, idx: u32) {
        let frame = table.at(idx);
        frame.set_next(NIL);
        frame.set_prev(self.tail);
        if self.tail == NIL {
            self.head = idx;
        } else {
            table.at(self.tail).set_next(idx);
        }
        self.tail = idx;
        self.len += 1;
    }

    pub(crate) fn pop_front(&mut self, table: &FrameTable<'_>) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.unlink(table, idx);
        Some(idx)
    }

    /// Unlinks `idx`, which must be on this list.
    pub(crate) fn unlink(&mut self, table: &FrameTable<'_>, idx: u32) {
        let frame = table.at(idx);
        let (prev, next) = (frame.prev(), frame.next());
        assert!(self.len > 0, "unlink from empty frame list");

        if prev == NIL {
            assert_eq!(self.head, idx, "frame list head mismatch");
            self.head = next;
        } else {
            table.at(prev).set_next(next);
        }
        if next == NIL {
            assert_eq!(self.tail, idx, "frame list tail mismatch");
            self.tail = prev;
        } else {
            table.at(next).set_prev(prev);
        }

        frame.set_next(NIL);
        frame.set_prev(NIL);
        self.len -= 1;
    }

    /// Moves every entry of `other` to the end of `self`.
    pub(crate) fn append(&mut self, table: &FrameTable<'_>, other: &mut Self) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = core::mem::take(other);
            return;
        }
        table.at(self.tail).set_next(other.head);
        table.at(other.head).set_prev(self.tail);
        self.tail = other.tail;
        self.len += other.len;
        *other = Self::new();
    }

    /// Table indices from head to tail.
    pub(crate) fn indices<'t, 'f>(
        &self,
        table: &'t FrameTable<'f>,
    ) -> impl Iterator<Item = u32> + use<'t, 'f> {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let idx = cur;
            cur = table.at(idx).next();
            Some(idx)
        })
    }

    /// Adds a caller-owned block; its order is taken from the head frame.
    ///
    /// # Panics
    /// Panics if the handle does not belong to `table`.
    pub fn push(&mut self, table: &FrameTable<'_>, handle: FrameHandle) {
        let idx = table
            .index_of(handle.pfn())
            .unwrap_or_else(|| panic!("{handle:?} outside the frame table"));
        self.push_back(table, idx);
    }

    /// Removes the first block and returns its ownership token.
    pub fn take(&mut self, table: &FrameTable<'_>) -> Option<FrameHandle> {
        self.pop_front(table)
            .map(|idx| FrameHandle::new(table.pfn_at(idx)))
    }

    /// `(head pfn, order)` of every block, head to tail.
    pub fn iter<'t, 'f>(
        &self,
        table: &'t FrameTable<'f>,
    ) -> impl Iterator<Item = (Pfn, u32)> + use<'t, 'f> {
        self.indices(table)
            .map(move |idx| (table.pfn_at(idx), table.at(idx).order()))
    }

    /// Number of frames across all blocks.
    #[must_use]
    pub fn frame_count(&self, table: &FrameTable<'_>) -> u64 {
        self.iter(table).map(|(_, order)| 1u64 << order).sum()
    }
}

impl core::fmt::Debug for FrameList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameList")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn table(frames: &[Frame]) -> FrameTable<'_> {
        FrameTable::new(frames, Pfn::new(0))
    }

    fn backing(n: u64) -> Vec<Frame> {
        (0..n).map(|i| Frame::absent(Pfn::new(i))).collect()
    }

    #[test]
    fn push_and_pop_keep_order() {
        let frames = backing(8);
        let t = table(&frames);
        let mut list = FrameList::new();
        list.push_back(&t, 1);
        list.push_back(&t, 2);
        list.push_front(&t, 5);

        assert_eq!(list.indices(&t).collect::<Vec<_>>(), vec![5, 1, 2]);
        assert_eq!(list.pop_front(&t), Some(5));
        assert_eq!(list.pop_front(&t), Some(1));
        assert_eq!(list.pop_front(&t), Some(2));
        assert_eq!(list.pop_front(&t), None);
        assert!(list.is_empty());
    }

    #[test]
    fn unlink_from_middle_head_and_tail() {
        let frames = backing(8);
        let t = table(&frames);
        let mut list = FrameList::new();
        for idx in [0, 3, 4, 7] {
            list.push_back(&t, idx);
        }

        list.unlink(&t, 4);
        assert_eq!(list.indices(&t).collect::<Vec<_>>(), vec![0, 3, 7]);
        list.unlink(&t, 0);
        list.unlink(&t, 7);
        assert_eq!(list.indices(&t).collect::<Vec<_>>(), vec![3]);
        assert_eq!(list.len(), 1);

        list.push_front(&t, 6);
        assert_eq!(list.indices(&t).collect::<Vec<_>>(), vec![6, 3]);
    }

    #[test]
    fn append_moves_all_entries() {
        let frames = backing(8);
        let t = table(&frames);
        let (mut a, mut b) = (FrameList::new(), FrameList::new());
        a.push_back(&t, 1);
        b.push_back(&t, 2);
        b.push_back(&t, 3);

        a.append(&t, &mut b);
        assert!(b.is_empty());
        assert_eq!(a.indices(&t).collect::<Vec<_>>(), vec![1, 2, 3]);

        let mut c = FrameList::new();
        c.append(&t, &mut a);
        assert_eq!(c.len(), 3);
        assert_eq!(c.pop_front(&t), Some(1));
    }

    #[test]
    fn handles_round_trip_through_the_list() {
        let frames = backing(8);
        let t = table(&frames);
        t.at(4).set_allocated_head(2);

        let mut list = FrameList::new();
        list.push(&t, FrameHandle::new(Pfn::new(4)));
        assert_eq!(list.iter(&t).collect::<Vec<_>>(), vec![(Pfn::new(4), 2)]);
        assert_eq!(list.frame_count(&t), 4);

        let h = list.take(&t);
        assert_eq!(h.map(FrameHandle::into_pfn), Some(Pfn::new(4)));
        assert!(list.take(&t).is_none());
    }
}
