//! # Buddy Zones
//!
//! A [`Zone`] manages the frames of one `(node, memory class)` pair as
//! power-of-two blocks. Free blocks of order `o` sit on `free[o]`; only the
//! head frame of a block is linked and tagged (`role = Pmm`, `order = o`).
//!
//! ```text
//! alloc(order 0) on an empty order-2 block at p:
//!
//!   free[2]: p                  free[2]: -
//!   free[1]: -         ──►      free[1]: p+2
//!   free[0]: -                  free[0]: p+1        returns p
//! ```
//!
//! Freeing walks the other way: the buddy of `pfn` at order `o` is
//! `pfn ^ 2^o`; while the buddy is a free head of the same order in the same
//! zone, it is unlinked and the two merge into one block of order `o + 1`.
//!
//! ## Locking
//!
//! One spin lock guards all free lists of a zone; a whole split or merge
//! cascade runs under it. Per-CPU caches lock their own slot first and the
//! zone second, never the other way around, and no code path holds two zone
//! locks.
//!
//! ## Accounting
//!
//! `managed` counts the frames that are free from the caller's point of view,
//! including blocks parked in per-CPU caches. It only changes when a caller
//! allocates or frees, or when memory is handed to the zone.

use crate::config::{MAX_FRAME_ORDER, MAX_PCPU_FRAME_ORDER, NR_FRAME_ORDERS, NodeId, PcpConfig};
use crate::frame::{FrameBits, FrameRole};
use crate::frame_table::{FrameHandle, FrameTable};
use crate::free_list::FrameList;
use crate::pcp::PerCpuFrameCache;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::Pfn;
use kernel_sync::{CachePadded, SpinLock};
use log::{debug, info};

/// Number of memory classes.
pub const NR_ZONE_TYPES: usize = 3;

/// Memory class of a zone, ordered from most to least restricted.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(u8)]
pub enum ZoneType {
    /// Below 16 MiB; reachable by ISA DMA.
    Dma = 0,
    /// Below 4 GiB; reachable by 32-bit DMA.
    Dma32 = 1,
    /// Everything else.
    Normal = 2,
}

impl ZoneType {
    pub const ALL: [Self; NR_ZONE_TYPES] = [Self::Dma, Self::Dma32, Self::Normal];

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Dma,
            1 => Self::Dma32,
            _ => Self::Normal,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dma => "DMA",
            Self::Dma32 => "DMA32",
            Self::Normal => "Normal",
        }
    }

    /// This class followed by every more restricted one.
    ///
    /// Memory of a lower class satisfies every constraint of a higher one, so
    /// a `Normal` request may fall back to `Dma32` and then `Dma`.
    pub fn fallbacks(self) -> impl Iterator<Item = Self> {
        let all: &'static [Self] = &Self::ALL;
        all[..=self.index()].iter().rev().copied()
    }
}

/// Free-frame thresholds of a zone.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum Watermark {
    /// Only allocations that cannot fail should dip below this.
    Critical = 0,
    /// Background reclaim should start.
    Moderate = 1,
    /// Background reclaim may stop.
    Sufficient = 2,
}

struct FreeArea {
    lists: [FrameList; NR_FRAME_ORDERS],
}

impl FreeArea {
    const fn new() -> Self {
        Self {
            lists: [const { FrameList::new() }; NR_FRAME_ORDERS],
        }
    }
}

/// Buddy allocator over `[start_pfn, start_pfn + spanned)` of one node.
pub struct Zone<'a> {
    node: NodeId,
    ty: ZoneType,
    start_pfn: Pfn,
    spanned: AtomicU64,
    present: AtomicU64,
    managed: AtomicU64,
    reserved: AtomicU64,
    watermarks: [AtomicU64; 3],
    frames: FrameTable<'a>,
    free: SpinLock<FreeArea>,
    pcp: &'a [CachePadded<SpinLock<PerCpuFrameCache>>],
    pcp_config: PcpConfig,
}

impl<'a> Zone<'a> {
    /// Creates an empty zone. Frames arrive through [`free_range`](Self::free_range).
    ///
    /// # Panics
    /// Panics if the span is not covered by `frames`.
    #[must_use]
    pub fn new(
        node: NodeId,
        ty: ZoneType,
        start_pfn: Pfn,
        spanned: u64,
        frames: FrameTable<'a>,
        pcp: &'a [CachePadded<SpinLock<PerCpuFrameCache>>],
        pcp_config: PcpConfig,
    ) -> Self {
        assert!(
            spanned == 0 || (frames.contains(start_pfn) && frames.contains(start_pfn + (spanned - 1))),
            "zone span outside the frame table"
        );
        Self {
            node,
            ty,
            start_pfn,
            spanned: AtomicU64::new(spanned),
            present: AtomicU64::new(0),
            managed: AtomicU64::new(0),
            reserved: AtomicU64::new(0),
            watermarks: [const { AtomicU64::new(0) }; 3],
            frames,
            free: SpinLock::new(FreeArea::new()),
            pcp,
            pcp_config,
        }
    }

    #[inline]
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    #[must_use]
    pub const fn zone_type(&self) -> ZoneType {
        self.ty
    }

    #[inline]
    #[must_use]
    pub const fn start_pfn(&self) -> Pfn {
        self.start_pfn
    }

    #[inline]
    #[must_use]
    pub fn end_pfn(&self) -> Pfn {
        self.start_pfn + self.spanned_frames()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pfn: Pfn) -> bool {
        pfn >= self.start_pfn && pfn < self.end_pfn()
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameTable<'a> {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub const fn pcp_config(&self) -> &PcpConfig {
        &self.pcp_config
    }

    #[inline]
    #[must_use]
    pub fn spanned_frames(&self) -> u64 {
        self.spanned.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn present_frames(&self) -> u64 {
        self.present.load(Ordering::Relaxed)
    }

    /// Frames currently free, including those parked in per-CPU caches.
    #[inline]
    #[must_use]
    pub fn managed_frames(&self) -> u64 {
        self.managed.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn reserved_frames(&self) -> u64 {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn set_present_frames(&self, n: u64) {
        debug_assert!(n <= self.spanned_frames());
        self.present.store(n, Ordering::Relaxed);
    }

    pub fn set_reserved_frames(&self, n: u64) {
        self.reserved.store(n, Ordering::Relaxed);
    }

    /// Threshold for `mark`, in frames.
    #[inline]
    #[must_use]
    pub fn watermark(&self, mark: Watermark) -> u64 {
        self.watermarks[mark as usize].load(Ordering::Relaxed)
    }

    /// Whether the free frames dropped below `mark`.
    #[inline]
    #[must_use]
    pub fn is_below(&self, mark: Watermark) -> bool {
        self.managed_frames() < self.watermark(mark)
    }

    /// Derives the watermarks from the managed frames.
    pub fn compute_watermarks(&self) {
        let critical = self.managed_frames() >> 7;
        let marks = [critical, critical + critical / 4, critical + critical / 2];
        for (slot, v) in self.watermarks.iter().zip(marks) {
            slot.store(v, Ordering::Relaxed);
        }
    }

    /// Number of free blocks of `order` on the zone lists.
    #[must_use]
    pub fn free_blocks(&self, order: u32) -> usize {
        self.free
            .lock()
            .lists
            .get(order as usize)
            .map_or(0, FrameList::len)
    }

    /// Frames on the zone lists (excluding per-CPU caches).
    #[must_use]
    pub fn free_list_frames(&self) -> u64 {
        let area = self.free.lock();
        area.lists
            .iter()
            .zip(0u32..)
            .map(|(list, order)| (list.len() as u64) << order)
            .sum()
    }

    /// Frames parked in the per-CPU caches.
    #[must_use]
    pub fn cached_frames(&self) -> u64 {
        self.pcp.iter().map(|c| c.lock().cached_frames()).sum()
    }

    #[inline]
    fn uses_pcp(&self, cpu: usize, order: u32) -> bool {
        self.pcp_config.is_enabled() && order <= MAX_PCPU_FRAME_ORDER && cpu < self.pcp.len()
    }

    fn index_of(&self, pfn: Pfn) -> u32 {
        self.frames
            .index_of(pfn)
            .unwrap_or_else(|| panic!("{pfn:?} outside the frame table"))
    }

    /// Allocates a block of `2^order` frames, through the per-CPU cache of
    /// `cpu` for small orders.
    #[must_use]
    pub fn alloc_frame(&self, cpu: usize, order: u32) -> Option<FrameHandle> {
        if order > MAX_FRAME_ORDER {
            return None;
        }

        let idx = if self.uses_pcp(cpu, order) {
            self.pcp[cpu].lock().alloc(self, order)
        } else {
            let mut area = self.free.lock();
            self.alloc_from_area(&mut area, order)
        }?;

        self.frames.at(idx).set_allocated_head(order);
        self.managed.fetch_sub(1 << order, Ordering::Relaxed);
        Some(FrameHandle::new(self.frames.pfn_at(idx)))
    }

    /// Returns a block of `2^order` frames.
    ///
    /// # Panics
    /// Panics if the block does not belong to this zone, is misaligned for
    /// `order`, lies inside a free block (double free), or was allocated
    /// with a different order.
    pub fn free_frame(&self, cpu: usize, handle: FrameHandle, order: u32) {
        let pfn = handle.into_pfn();
        assert!(order <= MAX_FRAME_ORDER, "freeing {pfn:?} with order {order}");
        assert!(
            self.contains(pfn) && pfn.is_aligned_to_order(order),
            "{pfn:?}/{order} does not belong to zone {} of node {}",
            self.ty.name(),
            self.node
        );

        let idx = self.index_of(pfn);
        let frame = self.frames.at(idx);
        assert!(frame.is_present(), "freeing absent frame {pfn:?}");
        if let Some(head) = self.free_block_containing(pfn, order) {
            panic!("double free of {pfn:?}: covered by free block at {head:?}");
        }
        assert_eq!(
            frame.order(),
            order,
            "{pfn:?} was allocated with order {} but freed with order {order}",
            frame.order()
        );
        frame.clear_refcount();
        self.managed.fetch_add(1 << order, Ordering::Relaxed);

        if self.uses_pcp(cpu, order) {
            self.pcp[cpu].lock().free(self, idx, order);
        } else {
            let mut area = self.free.lock();
            self.free_to_area(&mut area, idx, order);
        }
    }

    /// Hands `[start, end)` to the zone as free memory, largest aligned
    /// blocks first, and returns the number of frames added.
    ///
    /// # Panics
    /// Panics if the range leaves the zone span.
    pub fn free_range(&self, start: Pfn, end: Pfn) -> u64 {
        if start >= end {
            return 0;
        }
        assert!(
            self.contains(start) && end <= self.end_pfn(),
            "range {start:?}..{end:?} outside zone {}",
            self.ty.name()
        );

        let mut area = self.free.lock();
        let mut pfn = start;
        while pfn < end {
            let remaining = end - pfn;
            let mut order = MAX_FRAME_ORDER;
            while order > 0 && (!pfn.is_aligned_to_order(order) || (1 << order) > remaining) {
                order -= 1;
            }
            let idx = self.index_of(pfn);
            self.free_to_area(&mut area, idx, order);
            pfn += 1 << order;
        }
        drop(area);

        let added = end - start;
        self.managed.fetch_add(added, Ordering::Relaxed);
        debug!(
            "zone {}/{}: handed {added} frames [{start}, {end})",
            self.node,
            self.ty.name()
        );
        added
    }

    /// Moves up to `count` blocks of `order` from the zone to `out` under one
    /// lock acquisition; the blocks are tagged as per-CPU cached.
    pub(crate) fn take_batch(&self, order: u32, count: usize, out: &mut FrameList) -> usize {
        let mut area = self.free.lock();
        let mut taken = 0;
        while taken < count {
            let Some(idx) = self.alloc_from_area(&mut area, order) else {
                break;
            };
            self.frames.at(idx).set_free_head(FrameRole::Pcp, order);
            out.push_back(&self.frames, idx);
            taken += 1;
        }
        taken
    }

    /// Returns up to `count` blocks of `order` from `list` to the zone under
    /// one lock acquisition.
    pub(crate) fn give_batch(&self, list: &mut FrameList, order: u32, count: usize) -> usize {
        let mut area = self.free.lock();
        let mut given = 0;
        while given < count {
            let Some(idx) = list.pop_front(&self.frames) else {
                break;
            };
            self.free_to_area(&mut area, idx, order);
            given += 1;
        }
        given
    }

    /// Flushes the per-CPU cache of `cpu` back to the zone.
    pub fn drain_pcp(&self, cpu: usize) -> usize {
        self.pcp.get(cpu).map_or(0, |c| c.lock().drain(self))
    }

    /// Flushes every per-CPU cache back to the zone.
    pub fn drain_all_pcp(&self) -> usize {
        (0..self.pcp.len()).map(|cpu| self.drain_pcp(cpu)).sum()
    }

    /// Head of a free block of at least `order` (on a zone list or in a
    /// per-CPU cache) that covers `pfn`.
    ///
    /// Only free heads carry the `Pmm` or `Pcp` role, so checking the aligned
    /// head of every larger order finds any block that absorbed `pfn`.
    fn free_block_containing(&self, pfn: Pfn, order: u32) -> Option<Pfn> {
        (order..=MAX_FRAME_ORDER)
            .map(|o| (o, pfn.align_down_to_order(o)))
            .filter(|&(_, head)| self.contains(head))
            .find(|&(o, head)| {
                let b = self.frames.at(self.index_of(head)).bits();
                matches!(b.role(), FrameRole::Pmm | FrameRole::Pcp) && u32::from(b.order()) >= o
            })
            .map(|(_, head)| head)
    }

    /// Pops a block of at least `order` and splits it down to `order`.
    ///
    /// The returned head loses its free role before the lock is dropped, so
    /// a concurrent free of a split-off half never sees it as covering.
    fn alloc_from_area(&self, area: &mut FreeArea, order: u32) -> Option<u32> {
        for current in order..=MAX_FRAME_ORDER {
            let Some(idx) = area.lists[current as usize].pop_front(&self.frames) else {
                continue;
            };
            let frame = self.frames.at(idx);
            assert!(
                frame.is_role(FrameRole::Pmm) && frame.order() == current,
                "zone {}: {:?} on free list {current} has {frame:?}",
                self.ty.name(),
                self.frames.pfn_at(idx)
            );

            let mut split = current;
            while split > order {
                split -= 1;
                let upper = idx + (1 << split);
                self.frames.at(upper).set_free_head(FrameRole::Pmm, split);
                area.lists[split as usize].push_front(&self.frames, upper);
            }
            frame.set_free_head(FrameRole::None, order);
            return Some(idx);
        }
        None
    }

    /// Inserts a block and merges it with free buddies.
    fn free_to_area(&self, area: &mut FreeArea, idx: u32, order: u32) {
        let head = self.frames.at(idx).bits();
        self.frames.at(idx).set_role(FrameRole::None);

        let mut pfn = self.frames.pfn_at(idx);
        let mut order = order;
        while order < MAX_FRAME_ORDER {
            let buddy = pfn.buddy(order);
            let Some(bidx) = self.buddy_index(buddy, order, head) else {
                break;
            };
            area.lists[order as usize].unlink(&self.frames, bidx);
            self.frames.at(bidx).set_role(FrameRole::None);
            pfn = pfn.min(buddy);
            order += 1;
        }

        let idx = self.index_of(pfn);
        self.frames.at(idx).set_free_head(FrameRole::Pmm, order);
        area.lists[order as usize].push_front(&self.frames, idx);
    }

    /// Index of `buddy` if it is a free block of `order` that may merge with
    /// a block described by `like`.
    fn buddy_index(&self, buddy: Pfn, order: u32, like: FrameBits) -> Option<u32> {
        if !self.contains(buddy) {
            return None;
        }
        let idx = self.frames.index_of(buddy)?;
        let b = self.frames.at(idx).bits();
        let eligible = b.present()
            && b.role() == FrameRole::Pmm
            && u32::from(b.order()) == order
            && b.node() == like.node()
            && b.zone() == like.zone()
            && b.section() == like.section();
        eligible.then_some(idx)
    }

    /// Logs counters and free lists at info level.
    pub fn dump(&self) {
        info!(
            "  zone {:<6} node {} pfn [{}, {}) spanned {} present {} managed {} reserved {}",
            self.ty.name(),
            self.node,
            self.start_pfn,
            self.end_pfn(),
            self.spanned_frames(),
            self.present_frames(),
            self.managed_frames(),
            self.reserved_frames()
        );
        let area = self.free.lock();
        for (order, list) in area.lists.iter().enumerate().filter(|(_, l)| !l.is_empty()) {
            info!("    order {order:>2}: {} blocks", list.len());
        }
    }
}

impl fmt::Debug for Zone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("node", &self.node)
            .field("type", &self.ty)
            .field("start_pfn", &self.start_pfn)
            .field("spanned", &self.spanned_frames())
            .field("present", &self.present_frames())
            .field("managed", &self.managed_frames())
            .finish_non_exhaustive()
    }
}
