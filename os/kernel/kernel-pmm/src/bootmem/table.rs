use super::region::{Region, RegionFlags};
use crate::config::NodeId;
use crate::error::{PmmError, Status};
use core::ops::Range;
use kernel_memory_addresses::PhysicalAddress;
use log::trace;

/// Smallest capacity a grown table gets.
pub const MIN_TABLE_CAPACITY: usize = 16;

/// Capacity after growing a table of `old` slots (amortized doubling).
#[inline]
#[must_use]
pub const fn calc_new_capacity(old: usize) -> usize {
    let doubled = old.saturating_mul(2);
    if doubled < MIN_TABLE_CAPACITY {
        MIN_TABLE_CAPACITY
    } else {
        doubled
    }
}

/// Checks `size` and returns the exclusive end of `[base, base + size)`.
pub(crate) fn range_end(base: PhysicalAddress, size: u64) -> Status<PhysicalAddress> {
    if size == 0 {
        return Err(PmmError::InvalidRange);
    }
    base.checked_add(size).ok_or(PmmError::InvalidRange)
}

/// Sorted, non-overlapping array of [`Region`]s over caller-provided storage.
///
/// The table never allocates. Mutations that add entries assert that enough
/// spare slots exist; [`BootMem`](super::BootMem) grows the storage before it
/// calls them, so a failed assertion means corrupted bookkeeping.
pub struct RegionTable<'a> {
    name: &'static str,
    slots: &'a mut [Region],
    len: usize,
    /// Physical range of the storage when it was obtained from the table
    /// itself; `None` for seed arrays.
    backing: Option<(PhysicalAddress, u64)>,
}

impl<'a> RegionTable<'a> {
    /// Empty table using `seed` as its initial storage.
    #[must_use]
    pub const fn new(name: &'static str, seed: &'a mut [Region]) -> Self {
        Self {
            name,
            slots: seed,
            len: 0,
            backing: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
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

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn spare(&self) -> usize {
        self.slots.len() - self.len
    }

    #[inline]
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.slots[..self.len]
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Region> {
        self.regions().get(idx).copied()
    }

    #[inline]
    #[must_use]
    pub const fn backing(&self) -> Option<(PhysicalAddress, u64)> {
        self.backing
    }

    /// Sum of all region sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.regions().iter().map(|r| r.size).sum()
    }

    /// Region containing `pa`.
    #[must_use]
    pub fn find(&self, pa: PhysicalAddress) -> Option<Region> {
        let regions = self.regions();
        let idx = regions.partition_point(|r| r.end() <= pa);
        regions.get(idx).filter(|r| r.contains(pa)).copied()
    }

    /// Indices of the regions overlapping `[base, end)`.
    #[must_use]
    pub fn overlapping(&self, base: PhysicalAddress, end: PhysicalAddress) -> Range<usize> {
        let regions = self.regions();
        let first = regions.partition_point(|r| r.end() <= base);
        let last = first + regions[first..].partition_point(|r| r.base < end);
        first..last
    }

    #[must_use]
    pub fn overlaps(&self, base: PhysicalAddress, end: PhysicalAddress) -> bool {
        !self.overlapping(base, end).is_empty()
    }

    /// Number of gaps in `[base, end)` not covered by any region; this is
    /// how many entries [`add_range`](Self::add_range) inserts at most.
    #[must_use]
    pub fn insertions_needed(&self, base: PhysicalAddress, end: PhysicalAddress) -> usize {
        let mut cursor = base;
        let mut gaps = 0;
        for r in &self.regions()[self.overlapping(base, end)] {
            if r.base > cursor {
                gaps += 1;
            }
            cursor = cursor.max(r.end());
        }
        gaps + usize::from(cursor < end)
    }

    /// Inserts `[base, base + size)` with `flags`, filling only the parts not
    /// yet covered; existing regions keep their attributes.
    ///
    /// # Errors
    /// - [`PmmError::InvalidRange`] for an empty or overflowing range.
    /// - [`PmmError::AlreadyExisting`] if the range is fully covered already.
    pub fn add_range(&mut self, base: PhysicalAddress, size: u64, flags: RegionFlags) -> Status {
        let end = range_end(base, size)?;
        let template = Region {
            base,
            size,
            flags,
        };

        let mut cursor = base;
        let mut inserted = 0;
        let mut i = self.overlapping(base, end).start;
        while i < self.len && cursor < end {
            let r = self.slots[i];
            if r.base >= end {
                break;
            }
            if r.base > cursor {
                self.insert_at(i, template.with_range(cursor, r.base));
                inserted += 1;
                i += 1;
            }
            cursor = cursor.max(r.end());
            i += 1;
        }
        if cursor < end {
            self.insert_at(i, template.with_range(cursor, end));
            inserted += 1;
        }

        if inserted == 0 {
            return Err(PmmError::AlreadyExisting);
        }

        trace!(
            "{}: add [{:#x}, {:#x}) {:?} node {} ({inserted} new)",
            self.name,
            base.as_u64(),
            end.as_u64(),
            flags.kind(),
            flags.node()
        );
        self.merge();
        Ok(())
    }

    /// Splits regions so that `[base, end)` starts and ends on region
    /// boundaries, and returns the indices of the regions inside it.
    ///
    /// Needs up to two spare slots.
    pub fn isolate(&mut self, base: PhysicalAddress, end: PhysicalAddress) -> Range<usize> {
        let mut i = self.overlapping(base, end).start;
        let mut inside: Option<Range<usize>> = None;

        while i < self.len {
            let r = self.slots[i];
            let (rbase, rend) = (r.base, r.end());
            if rbase >= end {
                break;
            }
            if rbase < base {
                self.slots[i] = r.with_range(base, rend);
                self.insert_at(i, r.with_range(rbase, base));
                i += 1;
                continue;
            }
            if rend > end {
                self.slots[i] = r.with_range(end, rend);
                self.insert_at(i, r.with_range(rbase, end));
                continue;
            }
            inside = Some(inside.map_or(i..i + 1, |range| range.start..i + 1));
            i += 1;
        }

        inside.unwrap_or(i..i)
    }

    /// Removes everything in `[base, base + size)` and returns how many
    /// regions (or parts of regions) were dropped.
    ///
    /// # Errors
    /// [`PmmError::InvalidRange`] for an empty or overflowing range.
    pub fn remove_range(&mut self, base: PhysicalAddress, size: u64) -> Status<usize> {
        let end = range_end(base, size)?;
        let range = self.isolate(base, end);
        let removed = range.len();
        self.erase(range);
        if removed > 0 {
            trace!(
                "{}: remove [{:#x}, {:#x}) ({removed} dropped)",
                self.name,
                base.as_u64(),
                end.as_u64()
            );
        }
        self.debug_check();
        Ok(removed)
    }

    /// Retags everything in `[base, end)` with `nid`.
    pub fn set_node(&mut self, base: PhysicalAddress, end: PhysicalAddress, nid: NodeId) {
        let range = self.isolate(base, end);
        for r in &mut self.slots[range] {
            r.flags = r.flags.with_node(nid);
        }
        self.merge();
    }

    /// Moves the table to `slots`, which must be large enough for the current
    /// entries, and returns the previous backing range (if it was allocated).
    ///
    /// # Panics
    /// Panics if `slots` cannot hold the current entries.
    pub fn replace_storage(
        &mut self,
        slots: &'a mut [Region],
        backing: Option<(PhysicalAddress, u64)>,
    ) -> Option<(PhysicalAddress, u64)> {
        assert!(slots.len() >= self.len, "{}: new storage too small", self.name);
        slots[..self.len].copy_from_slice(&self.slots[..self.len]);
        self.slots = slots;
        core::mem::replace(&mut self.backing, backing)
    }

    fn insert_at(&mut self, idx: usize, region: Region) {
        assert!(self.len < self.slots.len(), "{}: region table full", self.name);
        self.slots.copy_within(idx..self.len, idx + 1);
        self.slots[idx] = region;
        self.len += 1;
    }

    fn erase(&mut self, range: Range<usize>) {
        let n = range.len();
        if n == 0 {
            return;
        }
        self.slots.copy_within(range.end..self.len, range.start);
        self.len -= n;
    }

    /// Folds adjacent regions with identical attributes.
    fn merge(&mut self) {
        let mut i = 0;
        while i + 1 < self.len {
            let (a, b) = (self.slots[i], self.slots[i + 1]);
            if a.end() == b.base && a.flags == b.flags {
                self.slots[i].size += b.size;
                self.erase(i + 1..i + 2);
            } else {
                i += 1;
            }
        }
        self.debug_check();
    }

    fn debug_check(&self) {
        debug_assert!(
            self.regions().iter().all(|r| r.size > 0),
            "{}: empty region",
            self.name
        );
        debug_assert!(
            self.regions().windows(2).all(|w| w[0].end() <= w[1].base),
            "{}: regions unsorted or overlapping",
            self.name
        );
    }
}

impl core::fmt::Debug for RegionTable<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionTable")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("regions", &self.regions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootmem::RegionType;

    const N: RegionFlags = RegionFlags::of(RegionType::Normal, 0);

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn ranges(t: &RegionTable<'_>) -> Vec<(u64, u64)> {
        t.regions()
            .iter()
            .map(|r| (r.base.as_u64(), r.end().as_u64()))
            .collect()
    }

    #[test]
    fn capacity_doubles() {
        assert_eq!(calc_new_capacity(0), MIN_TABLE_CAPACITY);
        assert_eq!(calc_new_capacity(4), MIN_TABLE_CAPACITY);
        assert_eq!(calc_new_capacity(128), 256);
    }

    #[test]
    fn add_keeps_sorted_and_merges_neighbours() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x5000), 0x1000, N).unwrap();
        t.add_range(pa(0x1000), 0x1000, N).unwrap();
        t.add_range(pa(0x2000), 0x1000, N).unwrap();
        assert_eq!(ranges(&t), vec![(0x1000, 0x3000), (0x5000, 0x6000)]);

        t.add_range(pa(0x3000), 0x2000, N).unwrap();
        assert_eq!(ranges(&t), vec![(0x1000, 0x6000)]);
    }

    #[test]
    fn add_does_not_merge_different_attributes() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x1000), 0x1000, N).unwrap();
        t.add_range(pa(0x2000), 0x1000, RegionFlags::of(RegionType::Normal, 1))
            .unwrap();
        t.add_range(pa(0x3000), 0x1000, RegionFlags::of(RegionType::Unused, 0))
            .unwrap();
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn add_fills_gaps_only() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x2000), 0x1000, RegionFlags::of(RegionType::Unused, 0))
            .unwrap();
        t.add_range(pa(0x4000), 0x1000, RegionFlags::of(RegionType::Unused, 0))
            .unwrap();
        assert_eq!(t.insertions_needed(pa(0x1000), pa(0x6000)), 3);

        t.add_range(pa(0x1000), 0x5000, N).unwrap();
        let kinds: Vec<_> = t.regions().iter().map(Region::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RegionType::Normal,
                RegionType::Unused,
                RegionType::Normal,
                RegionType::Unused,
                RegionType::Normal
            ]
        );
        assert_eq!(t.total_size(), 0x5000);
    }

    #[test]
    fn add_rejects_empty_overflowing_and_covered_ranges() {
        let mut seed = [Region::EMPTY; 4];
        let mut t = RegionTable::new("test", &mut seed);
        assert_eq!(t.add_range(pa(0x1000), 0, N), Err(PmmError::InvalidRange));
        assert_eq!(
            t.add_range(pa(u64::MAX - 0xFFF), 0x2000, N),
            Err(PmmError::InvalidRange)
        );
        t.add_range(pa(0x1000), 0x4000, N).unwrap();
        assert_eq!(
            t.add_range(pa(0x2000), 0x1000, N),
            Err(PmmError::AlreadyExisting)
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_from_middle_splits() {
        let mut seed = [Region::EMPTY; 4];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x1000), 0x8000, N).unwrap();
        assert_eq!(t.remove_range(pa(0x3000), 0x2000), Ok(1));
        assert_eq!(ranges(&t), vec![(0x1000, 0x3000), (0x5000, 0x9000)]);
        assert_eq!(t.remove_range(pa(0x20_0000), 0x1000), Ok(0));
    }

    #[test]
    fn remove_across_several_regions() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x1000), 0x2000, N).unwrap();
        t.add_range(pa(0x4000), 0x2000, N).unwrap();
        t.add_range(pa(0x7000), 0x2000, N).unwrap();
        assert_eq!(t.remove_range(pa(0x2000), 0x6000), Ok(3));
        assert_eq!(ranges(&t), vec![(0x1000, 0x2000), (0x8000, 0x9000)]);
    }

    #[test]
    fn isolate_splits_at_most_two_regions() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x0), 0x4000, N).unwrap();
        t.add_range(pa(0x8000), 0x4000, RegionFlags::of(RegionType::Unused, 0))
            .unwrap();

        let inside = t.isolate(pa(0x2000), pa(0xA000));
        assert_eq!(
            ranges(&t),
            vec![(0x0, 0x2000), (0x2000, 0x4000), (0x8000, 0xA000), (0xA000, 0xC000)]
        );
        assert_eq!(inside, 1..3);

        let inside = t.isolate(pa(0x5000), pa(0x6000));
        assert!(inside.is_empty());
    }

    #[test]
    fn set_node_retags_and_remerges() {
        let mut seed = [Region::EMPTY; 8];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x0), 0x10000, N).unwrap();
        t.set_node(pa(0x8000), pa(0x10000), 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.find(pa(0x9000)).map(|r| r.node()), Some(1));
        assert_eq!(t.find(pa(0x1000)).map(|r| r.node()), Some(0));

        t.set_node(pa(0x0), pa(0x10000), 1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn storage_swap_keeps_entries() {
        let mut seed = [Region::EMPTY; 2];
        let mut bigger = [Region::EMPTY; 16];
        let mut t = RegionTable::new("test", &mut seed);
        t.add_range(pa(0x1000), 0x1000, N).unwrap();
        t.add_range(pa(0x3000), 0x1000, N).unwrap();
        assert_eq!(t.spare(), 0);

        let old = t.replace_storage(&mut bigger, Some((pa(0x10_0000), 0x1000)));
        assert!(old.is_none());
        assert_eq!(t.capacity(), 16);
        assert_eq!(ranges(&t), vec![(0x1000, 0x2000), (0x3000, 0x4000)]);
        assert_eq!(t.backing(), Some((pa(0x10_0000), 0x1000)));
    }
}
