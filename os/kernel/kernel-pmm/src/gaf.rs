//! # Allocation Policy Flags
//!
//! Every allocation carries a [`Gaf`] ("get available frame") bitmask. The bits
//! fall into three groups:
//!
//! | Group | Bits | Effect |
//! |-------|------|--------|
//! | Memory class | `DMA`, `DMA32` | Selects the zone type; neither bit means `Normal`. |
//! | Locality | `ONLY_THIS_NODE` | Fail instead of falling back to other nodes. |
//! | Failure policy | `NEVER_FAIL`, `RECLAIM`, `DIRECTLY_RECLAIM`, `ZERO`, `REQUIRED` | What happens around the allocation. |

use crate::zone::ZoneType;

bitflags::bitflags! {
    /// Allocation request descriptor.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Gaf: u32 {
        /// Memory addressable by ISA DMA (below 16 MiB).
        const DMA = 1 << 0;

        /// Memory addressable with 32-bit DMA (below 4 GiB).
        const DMA32 = 1 << 1;

        /// The caller cannot proceed without this memory.
        const REQUIRED = 1 << 2;

        /// Only the preferred node may serve the request.
        const ONLY_THIS_NODE = 1 << 3;

        /// Retry with reclaim instead of reporting exhaustion.
        ///
        /// Bounded by [`RetryPolicy`](crate::RetryPolicy); a request that
        /// still fails afterwards returns `None` like any other.
        const NEVER_FAIL = 1 << 4;

        /// Zero the block before returning it.
        const ZERO = 1 << 5;

        /// Wake background reclaim when a zone runs low.
        const RECLAIM = 1 << 6;

        /// Reclaim synchronously in the allocating context.
        const DIRECTLY_RECLAIM = 1 << 7;
    }
}

/// Bits selecting the memory class.
pub const GAF_ZONE_MASK: Gaf = Gaf::DMA.union(Gaf::DMA32);

/// Requests issued during bring-up.
pub const GAF_BOOT: Gaf = Gaf::ONLY_THIS_NODE;

/// Memory backing user mappings.
pub const GAF_USER: Gaf = Gaf::ONLY_THIS_NODE;

/// General kernel allocations.
pub const GAF_KERNEL: Gaf = Gaf::ONLY_THIS_NODE.union(Gaf::RECLAIM);

/// Zone class indexed by the two class bits (`DMA32 << 1 | DMA`).
///
/// Asking for both classes yields the more restrictive one.
const ZONE_TABLE: [ZoneType; 4] = [
    ZoneType::Normal,
    ZoneType::Dma,
    ZoneType::Dma32,
    ZoneType::Dma,
];

/// Maps the class bits of `gaf` to a zone type without branching.
#[inline]
#[must_use]
pub const fn gaf_zone_type(gaf: Gaf) -> ZoneType {
    ZONE_TABLE[(gaf.bits() & GAF_ZONE_MASK.bits()) as usize]
}

impl Gaf {
    #[inline]
    #[must_use]
    pub const fn zone_type(self) -> ZoneType {
        gaf_zone_type(self)
    }

    /// Whether a failed attempt should be retried.
    #[inline]
    #[must_use]
    pub const fn wants_retry(self) -> bool {
        self.contains(Self::NEVER_FAIL)
    }

    /// Whether the reclaim hook may be invoked at all.
    #[inline]
    #[must_use]
    pub const fn may_reclaim(self) -> bool {
        self.intersects(Self::RECLAIM.union(Self::DIRECTLY_RECLAIM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_bits_select_zone() {
        assert_eq!(gaf_zone_type(Gaf::empty()), ZoneType::Normal);
        assert_eq!(gaf_zone_type(Gaf::DMA), ZoneType::Dma);
        assert_eq!(gaf_zone_type(Gaf::DMA32), ZoneType::Dma32);
        assert_eq!(gaf_zone_type(Gaf::DMA | Gaf::DMA32), ZoneType::Dma);
    }

    #[test]
    fn policy_bits_do_not_change_zone() {
        let all_policy = Gaf::all().difference(GAF_ZONE_MASK);
        assert_eq!(gaf_zone_type(all_policy), ZoneType::Normal);
        assert_eq!((all_policy | Gaf::DMA32).zone_type(), ZoneType::Dma32);
    }

    #[test]
    fn presets() {
        assert!(GAF_BOOT.contains(Gaf::ONLY_THIS_NODE));
        assert!(GAF_KERNEL.contains(Gaf::RECLAIM));
        assert!(GAF_KERNEL.may_reclaim());
        assert!(!GAF_USER.may_reclaim());
        assert!(!GAF_KERNEL.wants_retry());
        assert!((GAF_KERNEL | Gaf::NEVER_FAIL).wants_retry());
    }
}
