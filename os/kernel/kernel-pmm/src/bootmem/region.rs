use crate::config::NodeId;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// Disposition of a boot-time memory range.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum RegionType {
    /// Usable RAM; boot allocations are served from here.
    Normal = 0,
    /// Usable RAM the boot allocator leaves alone (legacy low memory).
    /// Still handed to the buddy allocator.
    Unused = 1,
    /// RAM that is present but claimed (kernel image, boot allocations,
    /// firmware tables that may be reclaimed later).
    Reserved = 2,
    /// No usable RAM behind the range: firmware runtime data, bad memory.
    /// Frames in such ranges stay absent.
    ReservedAndNoInit = 3,
}

impl RegionType {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Normal,
            1 => Self::Unused,
            2 => Self::Reserved,
            _ => Self::ReservedAndNoInit,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Whether frames in this range are backed by RAM.
    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        !matches!(self, Self::ReservedAndNoInit)
    }

    /// Whether the range belongs in the available table.
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Normal | Self::Unused)
    }

    /// Single-bit mask used by iteration filters.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << self.into_bits()
    }
}

/// Packed attributes of a [`Region`].
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct RegionFlags {
    #[bits(2)]
    pub kind: RegionType,
    #[bits(6)]
    pub node: u8,
    /// Reserved range carved out of `Unused` memory; it goes back as
    /// `Unused` when freed.
    #[bits(1)]
    pub unused_origin: bool,
    #[bits(7)]
    __: u8,
}

impl RegionFlags {
    #[inline]
    #[must_use]
    pub const fn of(kind: RegionType, node: NodeId) -> Self {
        Self::new().with_kind(kind).with_node(node)
    }

    /// Kind the range takes when it returns to the available table.
    #[inline]
    #[must_use]
    pub const fn available_kind(self) -> RegionType {
        if self.unused_origin() {
            RegionType::Unused
        } else {
            RegionType::Normal
        }
    }
}

/// Contiguous physical range with uniform attributes.
///
/// `base + size` never overflows for regions stored in a table.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub base: PhysicalAddress,
    pub size: u64,
    pub flags: RegionFlags,
}

impl Region {
    /// Filler for unused table slots.
    pub const EMPTY: Self = Self {
        base: PhysicalAddress::zero(),
        size: 0,
        flags: RegionFlags::new(),
    };

    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u64, kind: RegionType, node: NodeId) -> Self {
        Self {
            base,
            size,
            flags: RegionFlags::of(kind, node),
        }
    }

    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.size
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegionType {
        self.flags.kind()
    }

    #[inline]
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.flags.node()
    }

    /// Same attributes, covering `[base, end)` instead.
    #[inline]
    #[must_use]
    pub fn with_range(self, base: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self {
            base,
            size: end - base,
            flags: self.flags,
        }
    }

    #[inline]
    #[must_use]
    pub fn overlaps(&self, base: PhysicalAddress, end: PhysicalAddress) -> bool {
        self.base < end && base < self.end()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        self.base <= pa && pa < self.end()
    }

    /// Intersection with `[lo, hi)`, if any.
    #[must_use]
    pub fn clip(&self, lo: PhysicalAddress, hi: PhysicalAddress) -> Option<Self> {
        let base = self.base.max(lo);
        let end = self.end().min(hi);
        (base < end).then(|| self.with_range(base, end))
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#014x}-{:#014x}) {:?} node {}",
            self.base.as_u64(),
            self.end().as_u64(),
            self.kind(),
            self.node()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_pack_kind_and_node() {
        let flags = RegionFlags::of(RegionType::ReservedAndNoInit, 17);
        assert_eq!(flags.kind(), RegionType::ReservedAndNoInit);
        assert_eq!(flags.node(), 17);
        assert_eq!(flags.into_bits(), 0b11 | (17 << 2));
        assert_eq!(RegionFlags::KIND_BITS, 2);
        assert_eq!(RegionFlags::NODE_OFFSET, 2);
        assert_eq!(flags.available_kind(), RegionType::Normal);
        assert_eq!(flags.with_unused_origin(true).available_kind(), RegionType::Unused);
    }

    #[test]
    fn clipping() {
        let r = Region::new(PhysicalAddress::new(0x1000), 0x3000, RegionType::Normal, 0);
        let c = r.clip(PhysicalAddress::new(0x2000), PhysicalAddress::new(0x10000));
        assert_eq!(
            c.map(|c| (c.base.as_u64(), c.size)),
            Some((0x2000, 0x2000))
        );
        assert!(r.clip(PhysicalAddress::new(0x4000), PhysicalAddress::MAX).is_none());
        assert!(r.overlaps(PhysicalAddress::new(0x3FFF), PhysicalAddress::new(0x5000)));
        assert!(!r.overlaps(PhysicalAddress::new(0x4000), PhysicalAddress::new(0x5000)));
    }

    #[test]
    fn only_no_init_ranges_are_absent() {
        assert!(RegionType::Normal.is_present());
        assert!(RegionType::Unused.is_present());
        assert!(RegionType::Reserved.is_present());
        assert!(!RegionType::ReservedAndNoInit.is_present());
        assert!(RegionType::Unused.is_available());
        assert!(!RegionType::Reserved.is_available());
    }
}
