//! # Boot Memory Allocator
//!
//! Serves every allocation the kernel makes before the buddy allocator exists,
//! including the frame table and the node/zone descriptors of the buddy
//! allocator itself.
//!
//! Two [`RegionTable`]s describe physical memory:
//!
//! ```text
//!   available:  [ Unused ][ Normal      ]     [ Normal            ]
//!   reserved:                           [Rsv]       [Rsv]   [NoInit]
//!               0      1 MiB                                          →
//! ```
//!
//! - **available** holds RAM that nobody owns (`Normal`, `Unused`).
//! - **reserved** holds claimed RAM (`Reserved`) and ranges without usable RAM
//!   (`ReservedAndNoInit`).
//!
//! The two tables never overlap: allocating moves a range from available to
//! reserved, freeing moves it back.
//!
//! ## Self-hosted growth
//!
//! Both tables start on small caller-provided seed arrays. When an operation
//! needs more slots than a table has, a larger array is carved out of the
//! available table, the entries are copied, the storage is swapped and only then
//! is the new array recorded as reserved (and the old one, if it was not a
//! seed, released). Every public operation first makes sure both tables have
//! enough spare slots for itself and for one more growth step, so the
//! bookkeeping of a growth never needs another growth in the middle of a
//! mutation.

mod region;
mod table;

pub use region::{Region, RegionFlags, RegionType};
pub use table::{MIN_TABLE_CAPACITY, RegionTable, calc_new_capacity};

use crate::config::{MAX_NODES, NodeId};
use crate::error::{PmmError, Status};
use crate::phys_mapper::PhysMapper;
use core::fmt;
use core::mem::MaybeUninit;
use kernel_memory_addresses::{FRAME_SIZE, Pfn, PhysicalAddress, frames_for};
use log::{debug, trace, warn};
use table::range_end;

/// Slots each table keeps free for the bookkeeping of one growth step.
const GROW_SLACK: usize = 4;

/// Smallest seed array accepted for either table.
pub const MIN_SEED_REGIONS: usize = 2 * GROW_SLACK;

/// Where [`BootMem::allocate_bounded`] starts looking.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AllocationDirection {
    /// Highest fitting address first; keeps low memory for DMA-limited users.
    #[default]
    TopDown,
    BottomUp,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Which {
    Available,
    Reserved,
}

/// Tables an [`IterationContext`] walks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionSource {
    Available,
    Reserved,
    Both,
}

/// Resumable cursor over the boot tables.
///
/// The cursor stores an index, not a reference, so it stays valid when a
/// table is grown between two calls to [`BootMem::iterate`].
#[derive(Debug, Clone)]
pub struct IterationContext {
    source: RegionSource,
    node: Option<NodeId>,
    kinds: u8,
    lo: PhysicalAddress,
    hi: PhysicalAddress,
    phase: u8,
    idx: usize,
}

impl IterationContext {
    #[must_use]
    pub const fn new(source: RegionSource) -> Self {
        Self {
            source,
            node: None,
            kinds: 0b1111,
            lo: PhysicalAddress::zero(),
            hi: PhysicalAddress::MAX,
            phase: 0,
            idx: 0,
        }
    }

    /// Only regions of node `nid`.
    #[must_use]
    pub const fn on_node(self, nid: NodeId) -> Self {
        Self {
            node: Some(nid),
            ..self
        }
    }

    /// Only regions of one of `kinds`.
    #[must_use]
    pub fn of_kinds(self, kinds: &[RegionType]) -> Self {
        Self {
            kinds: kinds.iter().fold(0, |m, k| m | k.mask()),
            ..self
        }
    }

    /// Clip results to `[lo, hi)`.
    #[must_use]
    pub const fn within(self, lo: PhysicalAddress, hi: PhysicalAddress) -> Self {
        Self { lo, hi, ..self }
    }

    /// Restart from the first region.
    pub const fn reset(&mut self) {
        self.phase = 0;
        self.idx = 0;
    }

    fn wants(&self, phase: u8) -> bool {
        !matches!(
            (self.source, phase),
            (RegionSource::Available, 1) | (RegionSource::Reserved, 0)
        )
    }

    fn matches(&self, r: &Region) -> bool {
        self.kinds & r.kind().mask() != 0 && self.node.is_none_or(|n| n == r.node())
    }
}

/// The boot allocator.
pub struct BootMem<'a, M: PhysMapper> {
    mapper: &'a M,
    available: RegionTable<'a>,
    reserved: RegionTable<'a>,
    direction: AllocationDirection,
    limit: PhysicalAddress,
}

impl<'a, M: PhysMapper> BootMem<'a, M> {
    /// Creates an empty allocator on two seed arrays.
    ///
    /// # Panics
    /// Panics if a seed holds fewer than [`MIN_SEED_REGIONS`] slots.
    pub fn new(
        mapper: &'a M,
        available_seed: &'a mut [Region],
        reserved_seed: &'a mut [Region],
    ) -> Self {
        assert!(
            available_seed.len() >= MIN_SEED_REGIONS && reserved_seed.len() >= MIN_SEED_REGIONS,
            "boot region seeds need at least {MIN_SEED_REGIONS} slots"
        );
        Self {
            mapper,
            available: RegionTable::new("available", available_seed),
            reserved: RegionTable::new("reserved", reserved_seed),
            direction: AllocationDirection::TopDown,
            limit: PhysicalAddress::MAX,
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &'a M {
        self.mapper
    }

    #[must_use]
    pub const fn available(&self) -> &RegionTable<'a> {
        &self.available
    }

    #[must_use]
    pub const fn reserved(&self) -> &RegionTable<'a> {
        &self.reserved
    }

    #[must_use]
    pub const fn direction(&self) -> AllocationDirection {
        self.direction
    }

    pub const fn set_direction(&mut self, direction: AllocationDirection) {
        self.direction = direction;
    }

    /// Exclusive upper bound for every boot allocation.
    #[must_use]
    pub const fn current_limit(&self) -> PhysicalAddress {
        self.limit
    }

    pub const fn set_current_limit(&mut self, limit: PhysicalAddress) {
        self.limit = limit;
    }

    /// Registers RAM. Parts already covered by either table are skipped.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range.
    /// - [`PmmError::InvalidArguments`] for a reserved `kind` (use [`protect`](Self::protect)).
    /// - [`PmmError::AlreadyExisting`] if nothing new was added.
    /// - [`PmmError::OutOfMemory`] if the available table could not grow.
    pub fn add(&mut self, base: PhysicalAddress, size: u64, kind: RegionType, nid: NodeId) -> Status {
        let end = range_end(base, size)?;
        if !kind.is_available() || usize::from(nid) >= MAX_NODES {
            return Err(PmmError::InvalidArguments);
        }

        let needed = self.available.insertions_needed(base, end)
            + self.reserved.overlapping(base, end).len();
        self.ensure_spare(needed, 0)?;

        let flags = RegionFlags::of(kind, nid);
        let mut added = false;
        let mut cursor = base;
        for i in self.reserved.overlapping(base, end) {
            let Some(r) = self.reserved.get(i) else { break };
            if r.base > cursor {
                added |= self.add_to(Which::Available, cursor, r.base, flags)?;
            }
            cursor = cursor.max(r.end());
        }
        if cursor < end {
            added |= self.add_to(Which::Available, cursor, end, flags)?;
        }

        if added {
            Ok(())
        } else {
            Err(PmmError::AlreadyExisting)
        }
    }

    fn add_to(
        &mut self,
        which: Which,
        base: PhysicalAddress,
        end: PhysicalAddress,
        flags: RegionFlags,
    ) -> Status<bool> {
        match self.table_mut(which).add_range(base, end - base, flags) {
            Ok(()) => Ok(true),
            Err(PmmError::AlreadyExisting) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Forgets available memory in `[base, base + size)`.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range, or if
    ///   no available region overlaps it.
    /// - [`PmmError::OutOfMemory`] if the table could not grow for the split.
    pub fn remove(&mut self, base: PhysicalAddress, size: u64) -> Status {
        range_end(base, size)?;
        self.ensure_spare(2, 0)?;
        match self.available.remove_range(base, size)? {
            0 => Err(PmmError::InvalidRange),
            _ => Ok(()),
        }
    }

    /// Records `[base, base + size)` as reserved with `kind` and takes it out
    /// of the available table.
    ///
    /// Each available region under the range lends its node to the reserved
    /// piece covering it; ranges without RAM take the node of the first one.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range.
    /// - [`PmmError::InvalidArguments`] for an available `kind`.
    /// - [`PmmError::AlreadyExisting`] if the range was fully reserved already.
    /// - [`PmmError::OutOfMemory`] if a table could not grow.
    pub fn protect(&mut self, base: PhysicalAddress, size: u64, kind: RegionType) -> Status {
        let end = range_end(base, size)?;
        if kind.is_available() {
            return Err(PmmError::InvalidArguments);
        }

        let pieces = self.available.overlapping(base, end).len();
        self.ensure_spare(2, self.reserved.insertions_needed(base, end) + pieces)?;

        // RAM pieces keep their node and remember whether they were `Unused`.
        let mut added = false;
        let mut gap_node = None;
        for i in self.available.overlapping(base, end) {
            let Some(piece) = self.available.get(i).and_then(|r| r.clip(base, end)) else {
                continue;
            };
            gap_node.get_or_insert(piece.node());
            let flags = RegionFlags::of(kind, piece.node())
                .with_unused_origin(piece.kind() == RegionType::Unused);
            added |= self.add_to(Which::Reserved, piece.base, piece.end(), flags)?;
        }
        let gap_flags = RegionFlags::of(kind, gap_node.unwrap_or(0));
        added |= self.add_to(Which::Reserved, base, end, gap_flags)?;
        self.available.remove_range(base, size)?;

        if added {
            Ok(())
        } else {
            Err(PmmError::AlreadyExisting)
        }
    }

    /// Tags everything in `[base, base + size)` with node `nid`.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range.
    /// - [`PmmError::InvalidArguments`] for a node id beyond [`MAX_NODES`].
    /// - [`PmmError::OutOfMemory`] if a table could not grow.
    pub fn set_node(&mut self, base: PhysicalAddress, size: u64, nid: NodeId) -> Status {
        let end = range_end(base, size)?;
        if usize::from(nid) >= MAX_NODES {
            return Err(PmmError::InvalidArguments);
        }
        self.ensure_spare(2, 2)?;
        self.available.set_node(base, end, nid);
        self.reserved.set_node(base, end, nid);
        trace!(
            "bootmem: [{:#x}, {:#x}) -> node {nid}",
            base.as_u64(),
            end.as_u64()
        );
        Ok(())
    }

    /// Allocates `size` bytes aligned to `align` inside `[lo, hi)`, optionally
    /// restricted to node `nid`.
    ///
    /// Only `Normal` regions are considered. Returns `None` if nothing fits.
    pub fn allocate_bounded(
        &mut self,
        size: u64,
        align: u64,
        lo: PhysicalAddress,
        hi: PhysicalAddress,
        nid: Option<NodeId>,
    ) -> Option<PhysicalAddress> {
        if size == 0 || !align.is_power_of_two() {
            warn!("bootmem: rejecting allocation of {size:#x} bytes aligned to {align:#x}");
            return None;
        }
        if let Err(e) = self.ensure_spare(2, 1) {
            warn!("bootmem: cannot grow region tables: {e}");
            return None;
        }

        let Some(pa) = self.find_free(size, align, lo, hi, nid) else {
            debug!(
                "bootmem: no fit for {size:#x} bytes in [{:#x}, {:#x}) node {nid:?}",
                lo.as_u64(),
                hi.as_u64()
            );
            return None;
        };
        let node = self.available.find(pa).map_or(0, |r| r.node());
        self.record_allocation(pa, size, node).ok()?;
        trace!("bootmem: allocated {size:#x} bytes at {pa}");
        Some(pa)
    }

    /// [`allocate_bounded`](Self::allocate_bounded) below the current limit on any node.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<PhysicalAddress> {
        self.allocate_bounded(size, align, PhysicalAddress::zero(), PhysicalAddress::MAX, None)
    }

    /// Returns `[base, base + size)` from the reserved to the available table.
    ///
    /// Pieces protected out of `Unused` memory come back as `Unused`, the
    /// rest as `Normal`.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range, if no
    ///   reserved region overlaps it, or if it overlaps ranges without RAM.
    /// - [`PmmError::OutOfMemory`] if a table could not grow.
    pub fn deallocate(&mut self, base: PhysicalAddress, size: u64) -> Status {
        let end = range_end(base, size)?;
        let overlapping = self.reserved.overlapping(base, end);
        if overlapping.is_empty() {
            return Err(PmmError::InvalidRange);
        }
        if self.reserved.regions()[overlapping.clone()]
            .iter()
            .any(|r| r.kind() != RegionType::Reserved)
        {
            warn!("bootmem: refusing to free non-RAM range at {base}");
            return Err(PmmError::InvalidRange);
        }

        self.ensure_spare(overlapping.len() + 1, 2)?;
        for i in self.reserved.overlapping(base, end) {
            let Some(piece) = self.reserved.get(i).and_then(|r| r.clip(base, end)) else {
                continue;
            };
            let flags = RegionFlags::of(piece.flags.available_kind(), piece.node());
            self.available.add_range(piece.base, piece.size, flags)?;
        }
        self.reserved.remove_range(base, size)?;
        trace!("bootmem: freed {size:#x} bytes at {base}");
        Ok(())
    }

    /// Allocates and initializes `count` values of `T`, preferring node `nid`.
    ///
    /// # Errors
    /// - [`PmmError::InvalidArguments`] for `count == 0`, zero-sized `T` or a
    ///   byte size that overflows.
    /// - [`PmmError::OutOfMemory`] if no node has room.
    pub fn alloc_objects<T>(
        &mut self,
        count: usize,
        nid: Option<NodeId>,
        mut init: impl FnMut(usize) -> T,
    ) -> Status<&'a mut [T]> {
        let slots = self.reserve_slots::<T>(count, nid)?;
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.write(init(i));
        }
        // SAFETY: Every slot was initialized above.
        Ok(unsafe { core::slice::from_raw_parts_mut(slots.as_mut_ptr().cast::<T>(), count) })
    }

    /// Moves `value` into boot memory, preferring node `nid`.
    ///
    /// # Errors
    /// Same as [`alloc_objects`](Self::alloc_objects).
    pub fn alloc_object<T>(&mut self, value: T, nid: Option<NodeId>) -> Status<&'a mut T> {
        let slots = self.reserve_slots::<T>(1, nid)?;
        Ok(slots[0].write(value))
    }

    fn reserve_slots<T>(
        &mut self,
        count: usize,
        nid: Option<NodeId>,
    ) -> Status<&'a mut [MaybeUninit<T>]> {
        if count == 0 || size_of::<T>() == 0 {
            return Err(PmmError::InvalidArguments);
        }
        let bytes = (size_of::<T>() as u64)
            .checked_mul(count as u64)
            .ok_or(PmmError::InvalidArguments)?;
        let align = align_of::<T>().max(align_of::<u64>()) as u64;

        let pa = nid
            .and_then(|n| {
                self.allocate_bounded(bytes, align, PhysicalAddress::zero(), PhysicalAddress::MAX, Some(n))
            })
            .or_else(|| self.allocate(bytes, align))
            .ok_or(PmmError::OutOfMemory)?;

        // SAFETY: The range was just moved to the reserved table and is owned by nobody else.
        Ok(unsafe { self.mapper.phys_to_mut_slice::<T>(pa, count) })
    }

    /// Advances `ctx` and returns the next matching region, clipped to the
    /// context's range.
    pub fn iterate(&self, ctx: &mut IterationContext) -> Option<Region> {
        while ctx.phase < 2 {
            if ctx.wants(ctx.phase) {
                let table = if ctx.phase == 0 {
                    &self.available
                } else {
                    &self.reserved
                };
                while let Some(r) = table.get(ctx.idx) {
                    ctx.idx += 1;
                    if ctx.matches(&r)
                        && let Some(clipped) = r.clip(ctx.lo, ctx.hi)
                    {
                        return Some(clipped);
                    }
                }
            }
            ctx.phase += 1;
            ctx.idx = 0;
        }
        None
    }

    /// Iterator form of [`iterate`](Self::iterate).
    pub fn regions(&self, mut ctx: IterationContext) -> impl Iterator<Item = Region> + '_ {
        core::iter::from_fn(move || self.iterate(&mut ctx))
    }

    fn present_regions(&self) -> impl Iterator<Item = &Region> + '_ {
        self.available
            .regions()
            .iter()
            .chain(self.reserved.regions())
            .filter(|r| r.kind().is_present())
    }

    /// Lowest address backed by RAM.
    #[must_use]
    pub fn start_address(&self) -> Option<PhysicalAddress> {
        self.present_regions().map(|r| r.base).min()
    }

    /// End of the highest range backed by RAM.
    #[must_use]
    pub fn end_address(&self) -> Option<PhysicalAddress> {
        self.present_regions().map(Region::end).max()
    }

    /// Span of the RAM tagged with node `nid`.
    #[must_use]
    pub fn node_range(&self, nid: NodeId) -> Option<(PhysicalAddress, PhysicalAddress)> {
        self.present_regions()
            .filter(|r| r.node() == nid)
            .fold(None, |acc, r| match acc {
                None => Some((r.base, r.end())),
                Some((lo, hi)) => Some((lo.min(r.base), hi.max(r.end()))),
            })
    }

    /// [`node_range`](Self::node_range) in frames, widened to whole frames.
    #[must_use]
    pub fn node_pfn_range(&self, nid: NodeId) -> Option<(Pfn, Pfn)> {
        self.node_range(nid)
            .map(|(lo, hi)| (lo.pfn(), hi.align_up(FRAME_SIZE).pfn()))
    }

    /// Number of regions backed by RAM overlapping `[start, end)`.
    #[must_use]
    pub fn count_present_blocks(&self, start: Pfn, end: Pfn) -> usize {
        self.present_regions()
            .filter(|r| r.overlaps(start.base(), end.base()))
            .count()
    }

    /// Number of whole frames backed by RAM in `[start, end)`.
    #[must_use]
    pub fn count_present_frames(&self, start: Pfn, end: Pfn) -> u64 {
        self.present_regions()
            .filter_map(|r| r.clip(start.base(), end.base()))
            .map(|r| {
                let first = r.base.align_up(FRAME_SIZE).pfn();
                let last = r.end().pfn();
                last.as_u64().saturating_sub(first.as_u64())
            })
            .sum()
    }

    /// Ends the boot allocator and yields the physical ranges of the grown
    /// table storage, which the caller may now reuse.
    pub fn retire(self) -> impl Iterator<Item = (PhysicalAddress, u64)> {
        debug!(
            "bootmem: retiring ({} available, {} reserved regions)",
            self.available.len(),
            self.reserved.len()
        );
        [self.available.backing(), self.reserved.backing()]
            .into_iter()
            .flatten()
    }

    fn table(&self, which: Which) -> &RegionTable<'a> {
        match which {
            Which::Available => &self.available,
            Which::Reserved => &self.reserved,
        }
    }

    fn table_mut(&mut self, which: Which) -> &mut RegionTable<'a> {
        match which {
            Which::Available => &mut self.available,
            Which::Reserved => &mut self.reserved,
        }
    }

    /// Grows tables until the available table has `avail` and the reserved
    /// table `res` spare slots on top of the growth slack.
    fn ensure_spare(&mut self, avail: usize, res: usize) -> Status {
        loop {
            let short_avail = self.available.spare() < avail + GROW_SLACK;
            let short_res = self.reserved.spare() < res + GROW_SLACK;
            match (short_avail, short_res) {
                (false, false) => return Ok(()),
                (_, true) if self.available.spare() >= GROW_SLACK => {
                    self.grow(Which::Reserved, res)?;
                }
                _ => self.grow(Which::Available, avail)?,
            }
        }
    }

    /// Moves table `which` to a larger array carved from available memory.
    fn grow(&mut self, which: Which, needed: usize) -> Status {
        let other = match which {
            Which::Available => Which::Reserved,
            Which::Reserved => Which::Available,
        };
        assert!(
            self.table(other).spare() >= GROW_SLACK,
            "bootmem: {} table exhausted during growth",
            self.table(other).name()
        );

        let table = self.table(which);
        let wanted = calc_new_capacity(table.capacity()).max(table.len() + needed + 4 * GROW_SLACK);
        let bytes = frames_for((wanted * size_of::<Region>()) as u64) * FRAME_SIZE;
        #[allow(clippy::cast_possible_truncation)]
        let capacity = (bytes / size_of::<Region>() as u64) as usize;

        let Some(pa) = self.find_free(bytes, FRAME_SIZE, PhysicalAddress::zero(), self.limit, None) else {
            warn!(
                "bootmem: no room to grow the {} table to {capacity} slots",
                self.table(which).name()
            );
            return Err(PmmError::OutOfMemory);
        };
        let node = self.available.find(pa).map_or(0, |r| r.node());

        // SAFETY: `pa` lies in available memory, which nothing references.
        let slots = unsafe { self.mapper.phys_to_mut_slice::<Region>(pa, capacity) };
        for slot in slots.iter_mut() {
            slot.write(Region::EMPTY);
        }
        // SAFETY: Every slot was initialized above.
        let slots = unsafe { core::slice::from_raw_parts_mut(slots.as_mut_ptr().cast::<Region>(), capacity) };

        let old = self.table_mut(which).replace_storage(slots, Some((pa, bytes)));
        self.record_allocation(pa, bytes, node)?;
        if let Some((old_pa, old_bytes)) = old {
            self.release_storage(old_pa, old_bytes)?;
        }

        trace!(
            "bootmem: {} table grown to {capacity} slots at {pa}",
            self.table(which).name()
        );
        Ok(())
    }

    fn record_allocation(&mut self, pa: PhysicalAddress, size: u64, node: NodeId) -> Status {
        let flags = RegionFlags::of(RegionType::Reserved, node);
        let recorded = self.reserved.add_range(pa, size, flags);
        assert!(recorded.is_ok(), "bootmem: allocated range {pa} already reserved");
        self.available.remove_range(pa, size)?;
        Ok(())
    }

    fn release_storage(&mut self, pa: PhysicalAddress, size: u64) -> Status {
        let node = self.reserved.find(pa).map_or(0, |r| r.node());
        self.reserved.remove_range(pa, size)?;
        self.add_to(Which::Available, pa, pa + size, RegionFlags::of(RegionType::Normal, node))?;
        Ok(())
    }

    fn find_free(
        &self,
        size: u64,
        align: u64,
        lo: PhysicalAddress,
        hi: PhysicalAddress,
        nid: Option<NodeId>,
    ) -> Option<PhysicalAddress> {
        let hi = hi.min(self.limit);
        if lo >= hi {
            return None;
        }

        let mut candidates = self
            .available
            .regions()
            .iter()
            .filter(|r| r.kind() == RegionType::Normal && nid.is_none_or(|n| n == r.node()))
            .filter_map(|r| r.clip(lo, hi));

        match self.direction {
            AllocationDirection::TopDown => candidates.rev().find_map(|r| {
                if r.size < size {
                    return None;
                }
                let start = PhysicalAddress::new(r.end().as_u64() - size).align_down(align);
                (start >= r.base).then_some(start)
            }),
            AllocationDirection::BottomUp => candidates.find_map(|r| {
                let start = r.base.checked_align_up(align)?;
                let end = start.checked_add(size)?;
                (end <= r.end()).then_some(start)
            }),
        }
    }

    /// Logs both tables at debug level.
    pub fn dump(&self) {
        for table in [&self.available, &self.reserved] {
            debug!(
                "bootmem: {} ({} regions, {:#x} bytes, capacity {})",
                table.name(),
                table.len(),
                table.total_size(),
                table.capacity()
            );
            for r in table.regions() {
                debug!("  {r:?}");
            }
        }
    }
}

impl<M: PhysMapper> fmt::Debug for BootMem<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootMem")
            .field("available", &self.available)
            .field("reserved", &self.reserved)
            .field("direction", &self.direction)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
