use crate::{FRAME_SHIFT, PhysicalAddress, SECTION_SHIFT};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Section number: `physical address >> SECTION_SHIFT`.
pub type SecNum = u32;

/// Page Frame Number.
///
/// The physical address of a frame divided by the frame size. This is the
/// index space of the frame table and the unit buddy arithmetic works in.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pfn = Pfn::new(0x100);
/// assert_eq!(pfn.base(), PhysicalAddress::new(0x10_0000));
/// assert_eq!(pfn.buddy(0), Pfn::new(0x101));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u64);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Frame containing `pa` (truncating).
    #[inline]
    #[must_use]
    pub const fn from_phys(pa: PhysicalAddress) -> Self {
        pa.pfn()
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// First byte of this frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn section(self) -> SecNum {
        (self.0 >> (SECTION_SHIFT - FRAME_SHIFT)) as SecNum
    }

    /// The PFN of the buddy block of size `2^order`: `pfn XOR 2^order`.
    #[inline]
    #[must_use]
    pub const fn buddy(self, order: u32) -> Self {
        Self(self.0 ^ (1 << order))
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to_order(self, order: u32) -> bool {
        self.0 & ((1 << order) - 1) == 0
    }

    /// Head of the `2^order` block containing this frame.
    #[inline]
    #[must_use]
    pub const fn align_down_to_order(self, order: u32) -> Self {
        Self(self.0 & !((1 << order) - 1))
    }

    #[inline]
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 < other.0 { self } else { other }
    }

    #[inline]
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if self.0 > other.0 { self } else { other }
    }

    #[inline]
    #[must_use]
    pub const fn clamp(self, lo: Self, hi: Self) -> Self {
        self.max(lo).min(hi)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFN(0x{:X})", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl Add<u64> for Pfn {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for Pfn {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Number of frames between two PFNs.
impl Sub for Pfn {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
