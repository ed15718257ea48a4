//! # Allocator Configuration
//!
//! Compile-time limits of the buddy allocator plus the run-time tunables a
//! kernel passes to [`PhysicalMemoryManager::init`](crate::PhysicalMemoryManager::init).

use crate::bootmem::AllocationDirection;
use crate::zone::{NR_ZONE_TYPES, ZoneType};
use kernel_info::memory::{DMA_ZONE_END, DMA32_ZONE_END, MAX_PHYSICAL_ADDRESS};
pub use kernel_info::topology::MAX_CPUS;
use kernel_memory_addresses::{PhysicalAddress, Pfn};

pub use kernel_info::topology::{MAX_NODES, NR_ZONES_PER_NODE};

/// Number of buddy orders (`0..NR_FRAME_ORDERS`).
pub const NR_FRAME_ORDERS: usize = 11;

/// Largest block order handed out or coalesced: `2^10` frames = 4 MiB.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_FRAME_ORDER: u32 = NR_FRAME_ORDERS as u32 - 1;

/// Largest order served from the per-CPU caches.
pub const MAX_PCPU_FRAME_ORDER: u32 = 3;

/// Number of per-CPU cache lists (`0..=MAX_PCPU_FRAME_ORDER`).
pub const NR_PCPU_ORDERS: usize = MAX_PCPU_FRAME_ORDER as usize + 1;

/// Node identifier (`0..MAX_NODES`).
pub type NodeId = u8;

/// Logical CPU index (`0..PmmConfig::nr_cpus`).
pub type CpuId = usize;

const _: () = {
    assert!(MAX_PCPU_FRAME_ORDER < MAX_FRAME_ORDER);
    assert!(NR_FRAME_ORDERS <= 16, "frame records reserve 4 bits for the order");
    assert!(MAX_NODES <= NodeId::MAX as usize);
};

/// Per-CPU frame cache tuning, in blocks of the cached order.
///
/// Order `o` lists use `high >> o` and `batch >> o` (at least one block) so
/// every list caches roughly the same number of bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcpConfig {
    /// Drain a batch back to the zone once a list grows beyond this.
    pub high: usize,
    /// Blocks moved per refill or drain.
    pub batch: usize,
}

impl PcpConfig {
    /// Caching disabled; every request goes straight to the zone.
    pub const DISABLED: Self = Self { high: 0, batch: 0 };

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.batch > 0
    }

    #[must_use]
    pub const fn high_for(&self, order: u32) -> usize {
        scale(self.high, order)
    }

    #[must_use]
    pub const fn batch_for(&self, order: u32) -> usize {
        scale(self.batch, order)
    }
}

const fn scale(v: usize, order: u32) -> usize {
    if v == 0 {
        return 0;
    }
    let scaled = v >> order;
    if scaled == 0 { 1 } else { scaled }
}

impl Default for PcpConfig {
    fn default() -> Self {
        Self { high: 64, batch: 16 }
    }
}

/// Bounded retry applied to `Gaf::NEVER_FAIL` requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional allocation attempts after the first failure.
    pub max_attempts: u32,
    /// Spin iterations before the first retry; doubled on each attempt.
    pub backoff_spins: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_spins: 64,
        }
    }
}

/// Run-time configuration of the physical memory manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PmmConfig {
    /// Exclusive upper PFN of each zone class, in [`ZoneType`] order.
    pub zone_limits: [Pfn; NR_ZONE_TYPES],
    /// Number of CPUs that get a per-CPU frame cache.
    pub nr_cpus: usize,
    pub pcp: PcpConfig,
    pub retry: RetryPolicy,
    /// Search direction of the boot allocator.
    pub boot_direction: AllocationDirection,
}

impl PmmConfig {
    /// Places every frame into the `Normal` zone.
    #[must_use]
    pub const fn single_zone(self) -> Self {
        let mut limits = [Pfn::new(0); NR_ZONE_TYPES];
        limits[ZoneType::Normal.index()] = PhysicalAddress::new(MAX_PHYSICAL_ADDRESS).pfn();
        Self {
            zone_limits: limits,
            ..self
        }
    }

    #[must_use]
    pub const fn with_cpus(self, nr_cpus: usize) -> Self {
        Self { nr_cpus, ..self }
    }

    #[must_use]
    pub const fn with_pcp(self, pcp: PcpConfig) -> Self {
        Self { pcp, ..self }
    }

    #[must_use]
    pub const fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// PFN range `[lo, hi)` of the zone class `ty`.
    #[must_use]
    pub const fn zone_range(&self, ty: ZoneType) -> (Pfn, Pfn) {
        let hi = self.zone_limits[ty.index()];
        let lo = match ty {
            ZoneType::Dma => Pfn::new(0),
            ZoneType::Dma32 => self.zone_limits[ZoneType::Dma.index()],
            ZoneType::Normal => self.zone_limits[ZoneType::Dma32.index()],
        };
        (lo.min(hi), hi)
    }

    /// Zone class that `pfn` falls into.
    #[must_use]
    pub fn zone_type_of(&self, pfn: Pfn) -> ZoneType {
        ZoneType::ALL
            .into_iter()
            .find(|&t| pfn < self.zone_limits[t.index()])
            .unwrap_or(ZoneType::Normal)
    }

    /// Number of CPUs, clamped to the compile-time maximum.
    #[must_use]
    pub const fn effective_cpus(&self) -> usize {
        if self.nr_cpus == 0 {
            1
        } else if self.nr_cpus > MAX_CPUS {
            MAX_CPUS
        } else {
            self.nr_cpus
        }
    }
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self {
            zone_limits: [
                PhysicalAddress::new(DMA_ZONE_END).pfn(),
                PhysicalAddress::new(DMA32_ZONE_END).pfn(),
                PhysicalAddress::new(MAX_PHYSICAL_ADDRESS).pfn(),
            ],
            nr_cpus: 1,
            pcp: PcpConfig::default(),
            retry: RetryPolicy::default(),
            boot_direction: AllocationDirection::TopDown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcp_batches_shrink_with_order() {
        let pcp = PcpConfig { high: 64, batch: 16 };
        assert_eq!(pcp.batch_for(0), 16);
        assert_eq!(pcp.batch_for(2), 4);
        assert_eq!(pcp.batch_for(MAX_PCPU_FRAME_ORDER), 2);
        assert_eq!(PcpConfig { high: 4, batch: 1 }.batch_for(3), 1);
        assert!(!PcpConfig::DISABLED.is_enabled());
        assert_eq!(PcpConfig::DISABLED.batch_for(0), 0);
    }

    #[test]
    fn single_zone_moves_everything_to_normal() {
        let cfg = PmmConfig::default().single_zone();
        assert_eq!(cfg.zone_limits[ZoneType::Dma.index()], Pfn::new(0));
        assert_eq!(cfg.zone_limits[ZoneType::Dma32.index()], Pfn::new(0));
        assert!(cfg.zone_limits[ZoneType::Normal.index()] > Pfn::new(1 << 30));
    }

    #[test]
    fn zone_ranges_partition_the_address_space() {
        let cfg = PmmConfig::default();
        let (dma_lo, dma_hi) = cfg.zone_range(ZoneType::Dma);
        let (dma32_lo, dma32_hi) = cfg.zone_range(ZoneType::Dma32);
        let (normal_lo, _) = cfg.zone_range(ZoneType::Normal);
        assert_eq!(dma_lo, Pfn::new(0));
        assert_eq!(dma_hi, dma32_lo);
        assert_eq!(dma32_hi, normal_lo);

        assert_eq!(cfg.zone_type_of(Pfn::new(0)), ZoneType::Dma);
        assert_eq!(cfg.zone_type_of(dma_hi), ZoneType::Dma32);
        assert_eq!(cfg.zone_type_of(normal_lo), ZoneType::Normal);
        assert_eq!(cfg.single_zone().zone_type_of(Pfn::new(0)), ZoneType::Normal);
    }

    #[test]
    fn cpu_count_is_clamped() {
        assert_eq!(PmmConfig::default().with_cpus(0).effective_cpus(), 1);
        assert_eq!(PmmConfig::default().with_cpus(10_000).effective_cpus(), MAX_CPUS);
    }
}
