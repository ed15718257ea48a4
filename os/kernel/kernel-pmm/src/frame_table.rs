//! # Frame Table
//!
//! Dense array of [`Frame`] records covering `[base_pfn, base_pfn + len)`.
//! Sized once at bring-up from the boot allocator's lowest and highest
//! addresses and never freed; holes in physical memory are represented by
//! absent frames rather than gaps in the array.
//!
//! Frames are addressed by their index into the table (`pfn - base_pfn`).
//! Index-based free-list links are `u32`, which limits one table to
//! `u32::MAX - 1` frames (just below 16 TiB with 4 KiB frames).

use crate::frame::{Frame, NIL};
use kernel_memory_addresses::{PhysicalAddress, Pfn};

/// Upper bound on the number of frames a table may cover.
#[allow(clippy::cast_lossless)]
pub const MAX_TABLE_FRAMES: u64 = NIL as u64;

#[derive(Copy, Clone)]
pub struct FrameTable<'a> {
    frames: &'a [Frame],
    base: Pfn,
}

impl<'a> FrameTable<'a> {
    /// Wraps `frames`, which describes the frames starting at `base`.
    ///
    /// # Panics
    /// Panics if the slice is too long to be indexed with `u32` links.
    #[must_use]
    pub fn new(frames: &'a [Frame], base: Pfn) -> Self {
        assert!(
            (frames.len() as u64) < MAX_TABLE_FRAMES,
            "frame table too large for index links"
        );
        Self { frames, base }
    }

    #[inline]
    #[must_use]
    pub const fn base_pfn(&self) -> Pfn {
        self.base
    }

    /// Exclusive end of the covered range.
    #[inline]
    #[must_use]
    pub fn end_pfn(&self) -> Pfn {
        self.base + self.frames.len() as u64
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pfn: Pfn) -> bool {
        pfn >= self.base && pfn < self.end_pfn()
    }

    /// Table index of `pfn`, if covered.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of(&self, pfn: Pfn) -> Option<u32> {
        self.contains(pfn).then(|| (pfn - self.base) as u32)
    }

    #[inline]
    #[must_use]
    pub fn pfn_at(&self, idx: u32) -> Pfn {
        self.base + u64::from(idx)
    }

    /// The record at `idx`.
    ///
    /// # Panics
    /// Panics if `idx` is outside the table; links are only ever created
    /// from valid indices, so this indicates corrupted list state.
    #[inline]
    #[must_use]
    pub fn at(&self, idx: u32) -> &'a Frame {
        &self.frames[idx as usize]
    }

    #[inline]
    #[must_use]
    pub fn pfn_to_frame(&self, pfn: Pfn) -> Option<&'a Frame> {
        self.index_of(pfn).map(|idx| self.at(idx))
    }

    #[inline]
    #[must_use]
    pub fn phys_to_frame(&self, pa: PhysicalAddress) -> Option<&'a Frame> {
        self.pfn_to_frame(pa.pfn())
    }

    /// Physical address of the frame at `pfn`.
    #[inline]
    #[must_use]
    pub const fn frame_to_phys(pfn: Pfn) -> PhysicalAddress {
        pfn.base()
    }

    /// Iterates `(pfn, frame)` over `[start, end)`, clamped to the table.
    pub fn range(&self, start: Pfn, end: Pfn) -> impl Iterator<Item = (Pfn, &'a Frame)> + use<'a> {
        let lo = start.clamp(self.base, self.end_pfn());
        let hi = end.clamp(lo, self.end_pfn());
        #[allow(clippy::cast_possible_truncation)]
        let (first, last) = ((lo - self.base) as usize, (hi - self.base) as usize);
        let (frames, base) = (self.frames, self.base);
        frames[first..last]
            .iter()
            .enumerate()
            .map(move |(i, f)| (base + (first + i) as u64, f))
    }
}

impl core::fmt::Debug for FrameTable<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameTable")
            .field("base", &self.base)
            .field("end", &self.end_pfn())
            .finish()
    }
}

/// Ownership token for an allocated block of `2^order` frames.
///
/// Returned by the allocation entry points and consumed by the free entry
/// points. The token is neither `Copy` nor `Clone`: exactly one holder owns
/// the block at any time.
#[must_use = "dropping a FrameHandle leaks the frames it owns"]
#[derive(PartialEq, Eq)]
pub struct FrameHandle {
    pfn: Pfn,
}

impl FrameHandle {
    #[inline]
    pub(crate) const fn new(pfn: Pfn) -> Self {
        Self { pfn }
    }

    /// Re-creates the token for a block previously released with
    /// [`into_pfn`](Self::into_pfn).
    ///
    /// # Safety
    /// `pfn` must be the head of an allocated block that no other handle owns.
    #[inline]
    pub const unsafe fn from_pfn(pfn: Pfn) -> Self {
        Self { pfn }
    }

    #[inline]
    #[must_use]
    pub const fn pfn(&self) -> Pfn {
        self.pfn
    }

    #[inline]
    #[must_use]
    pub const fn phys(&self) -> PhysicalAddress {
        self.pfn.base()
    }

    /// Gives up the token without freeing the block.
    #[inline]
    #[must_use]
    pub const fn into_pfn(self) -> Pfn {
        self.pfn
    }
}

impl core::fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FrameHandle({:?})", self.pfn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|i| Frame::absent(Pfn::new(i as u64))).collect()
    }

    #[test]
    fn translation_is_relative_to_base() {
        let backing = frames(16);
        let table = FrameTable::new(&backing, Pfn::new(0x100));

        assert_eq!(table.index_of(Pfn::new(0x100)), Some(0));
        assert_eq!(table.index_of(Pfn::new(0x10F)), Some(15));
        assert_eq!(table.index_of(Pfn::new(0x110)), None);
        assert_eq!(table.index_of(Pfn::new(0xFF)), None);
        assert_eq!(table.pfn_at(3), Pfn::new(0x103));

        let f = table.phys_to_frame(PhysicalAddress::new(0x10_2FFF));
        assert!(f.is_some_and(|f| core::ptr::eq(f, table.at(2))));
        assert_eq!(
            FrameTable::frame_to_phys(Pfn::new(0x102)),
            PhysicalAddress::new(0x10_2000)
        );
    }

    #[test]
    fn range_is_clamped() {
        let backing = frames(8);
        let table = FrameTable::new(&backing, Pfn::new(8));
        let pfns: Vec<_> = table
            .range(Pfn::new(0), Pfn::new(11))
            .map(|(pfn, _)| pfn.as_u64())
            .collect();
        assert_eq!(pfns, vec![8, 9, 10]);
        assert_eq!(table.range(Pfn::new(20), Pfn::new(30)).count(), 0);
    }

    #[test]
    fn handle_exposes_address() {
        let h = FrameHandle::new(Pfn::new(0x200));
        assert_eq!(h.phys(), PhysicalAddress::new(0x20_0000));
        assert_eq!(h.into_pfn(), Pfn::new(0x200));
    }
}
