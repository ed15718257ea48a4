//! Per-CPU frame caches.
//!
//! Each zone owns one cache slot per CPU. A slot keeps a short list of free
//! blocks for every order up to [`MAX_PCPU_FRAME_ORDER`] so that the common
//! single-frame allocation takes only the CPU's own slot lock.
//!
//! - **Refill**: an empty list pulls `batch` blocks from the zone.
//! - **Drain**: a list longer than `high` pushes `batch` blocks back.
//!
//! Cached blocks stay free from the zone's accounting point of view; their
//! head frames carry `role = Pcp` so the buddy allocator never merges them.

use crate::config::{MAX_PCPU_FRAME_ORDER, NR_PCPU_ORDERS};
use crate::frame::FrameRole;
use crate::free_list::FrameList;
use crate::zone::Zone;
use log::{debug, trace};

pub struct PerCpuFrameCache {
    lists: [FrameList; NR_PCPU_ORDERS],
    refills: u64,
    drains: u64,
}

impl Default for PerCpuFrameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PerCpuFrameCache {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lists: [const { FrameList::new() }; NR_PCPU_ORDERS],
            refills: 0,
            drains: 0,
        }
    }

    /// Blocks cached for `order`.
    #[must_use]
    pub fn count(&self, order: u32) -> usize {
        self.lists.get(order as usize).map_or(0, FrameList::len)
    }

    /// Frames cached across all orders.
    #[must_use]
    pub fn cached_frames(&self) -> u64 {
        self.lists
            .iter()
            .zip(0u32..)
            .map(|(list, order)| (list.len() as u64) << order)
            .sum()
    }

    /// Number of batches pulled from the zone so far.
    #[must_use]
    pub const fn refills(&self) -> u64 {
        self.refills
    }

    /// Number of batches returned to the zone so far.
    #[must_use]
    pub const fn drains(&self) -> u64 {
        self.drains
    }

    /// Takes a block of `order`, refilling from `zone` when empty.
    pub(crate) fn alloc(&mut self, zone: &Zone<'_>, order: u32) -> Option<u32> {
        debug_assert!(order <= MAX_PCPU_FRAME_ORDER);
        let list = &mut self.lists[order as usize];
        if list.is_empty() {
            let wanted = zone.pcp_config().batch_for(order);
            let got = zone.take_batch(order, wanted, list);
            if got == 0 {
                return None;
            }
            self.refills += 1;
            trace!("pcp: refilled {got} blocks of order {order}");
        }
        list.pop_front(zone.frames())
    }

    /// Parks a freed block of `order`, draining a batch when over the limit.
    pub(crate) fn free(&mut self, zone: &Zone<'_>, idx: u32, order: u32) {
        debug_assert!(order <= MAX_PCPU_FRAME_ORDER);
        zone.frames().at(idx).set_free_head(FrameRole::Pcp, order);
        let list = &mut self.lists[order as usize];
        list.push_front(zone.frames(), idx);

        let config = zone.pcp_config();
        if list.len() > config.high_for(order) {
            let given = zone.give_batch(list, order, config.batch_for(order));
            self.drains += 1;
            trace!("pcp: drained {given} blocks of order {order}");
        }
    }

    /// Returns every cached block to `zone`.
    pub(crate) fn drain(&mut self, zone: &Zone<'_>) -> usize {
        let mut total = 0;
        for (list, order) in self.lists.iter_mut().zip(0u32..) {
            let len = list.len();
            total += zone.give_batch(list, order, len);
        }
        if total > 0 {
            self.drains += 1;
            debug!(
                "pcp: flushed {total} blocks to zone {}/{}",
                zone.node(),
                zone.zone_type().name()
            );
        }
        total
    }
}

impl core::fmt::Debug for PerCpuFrameCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let counts: [usize; NR_PCPU_ORDERS] = core::array::from_fn(|o| self.lists[o].len());
        f.debug_struct("PerCpuFrameCache")
            .field("counts", &counts)
            .field("refills", &self.refills)
            .field("drains", &self.drains)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PcpConfig;
    use crate::frame::{Frame, FrameBits};
    use crate::frame_table::FrameTable;
    use crate::zone::ZoneType;
    use kernel_memory_addresses::Pfn;
    use kernel_sync::{CachePadded, SpinLock};

    fn zone_with_cpus(frames: u64, cpus: usize, pcp: PcpConfig) -> Zone<'static> {
        let v: Vec<Frame> = (0..frames)
            .map(|_| Frame::with_bits(FrameBits::present_in(0, ZoneType::Normal, 0)))
            .collect();
        let table = FrameTable::new(Vec::leak(v), Pfn::new(0));
        let caches: Vec<_> = (0..cpus)
            .map(|_| CachePadded::new(SpinLock::new(PerCpuFrameCache::new())))
            .collect();
        let zone = Zone::new(
            0,
            ZoneType::Normal,
            Pfn::new(0),
            frames,
            table,
            Vec::leak(caches),
            pcp,
        );
        zone.free_range(Pfn::new(0), Pfn::new(frames));
        zone
    }

    #[test]
    fn first_allocation_refills_a_batch() {
        let zone = zone_with_cpus(64, 1, PcpConfig { high: 8, batch: 4 });
        let h = zone.alloc_frame(0, 0).expect("frame");

        assert_eq!(zone.cached_frames(), 3);
        assert_eq!(zone.managed_frames(), 63);
        assert_eq!(zone.free_list_frames(), 60);
        let cached = zone.frames().pfn_to_frame(Pfn::new(1)).map(Frame::role);
        assert_eq!(cached, Some(FrameRole::Pcp));
        zone.free_frame(0, h, 0);
        assert_eq!(zone.cached_frames(), 4);
    }

    #[test]
    fn overflowing_the_high_mark_drains_a_batch() {
        let zone = zone_with_cpus(64, 1, PcpConfig { high: 4, batch: 2 });
        let handles: Vec<_> = (0..8).map(|_| zone.alloc_frame(0, 0).expect("frame")).collect();
        for h in handles {
            zone.free_frame(0, h, 0);
            assert!(zone.cached_frames() <= 4);
        }
        assert_eq!(zone.managed_frames(), 64);
        assert_eq!(zone.cached_frames() + zone.free_list_frames(), 64);
    }

    #[test]
    fn drain_restores_maximal_blocks() {
        let zone = zone_with_cpus(64, 2, PcpConfig::default());
        let a = zone.alloc_frame(0, 0).expect("frame");
        let b = zone.alloc_frame(1, 1).expect("block");
        zone.free_frame(1, a, 0);
        zone.free_frame(0, b, 1);
        assert!(zone.cached_frames() > 0);

        zone.drain_all_pcp();
        assert_eq!(zone.cached_frames(), 0);
        assert_eq!(zone.free_blocks(6), 1);
        assert_eq!(zone.free_list_frames(), 64);
    }

    #[test]
    fn large_orders_bypass_the_cache() {
        let zone = zone_with_cpus(64, 1, PcpConfig::default());
        let h = zone.alloc_frame(0, MAX_PCPU_FRAME_ORDER + 1).expect("block");
        assert_eq!(zone.cached_frames(), 0);
        zone.free_frame(0, h, MAX_PCPU_FRAME_ORDER + 1);
        assert_eq!(zone.free_blocks(6), 1);
    }

    #[test]
    fn unknown_cpus_use_the_zone_directly() {
        let zone = zone_with_cpus(16, 1, PcpConfig::default());
        let h = zone.alloc_frame(7, 0).expect("frame");
        assert_eq!(zone.cached_frames(), 0);
        zone.free_frame(7, h, 0);
        assert_eq!(zone.free_blocks(4), 1);
    }
}
