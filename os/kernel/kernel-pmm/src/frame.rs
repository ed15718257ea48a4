//! # Frame Records
//!
//! One [`Frame`] per physical page. The record is three words: a packed
//! metadata word ([`FrameBits`]), two free-list links stored as frame table
//! indices and a reference count.
//!
//! ### Metadata layout
//!
//! | Bits   | Field     | Meaning |
//! |--------|-----------|---------|
//! | 0–5    | `node`    | NUMA node id |
//! | 6–7    | `zone`    | [`ZoneType`] |
//! | 8–11   | `order`   | Block order; valid on block heads only |
//! | 12–15  | `role`    | [`FrameRole`] |
//! | 16–27  | `state`   | [`FrameState`] bits |
//! | 28–55  | `section` | `phys >> SECTION_SHIFT` |
//! | 56     | `present` | Backed by RAM |
//! | 57–63  | –         | Reserved |
//!
//! Offsets and widths are exported as associated constants
//! (`FrameBits::ORDER_OFFSET`, `FrameBits::ORDER_BITS`, ...) so that the
//! encoding can be checked independent of the accessor functions.
//!
//! ### Ownership
//!
//! All fields are atomics accessed with `Relaxed` ordering. The frame's owner
//! (a zone under its lock, a per-CPU cache under its lock, or the caller
//! holding the [`FrameHandle`](crate::FrameHandle)) is the only writer; the
//! locks provide the ordering between owners.

use crate::config::NodeId;
use crate::zone::ZoneType;
use bitfield_struct::bitfield;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use kernel_memory_addresses::{Pfn, SecNum};

/// What a frame is currently used for.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum FrameRole {
    /// Allocated to a caller that did not tag it, or not in use.
    None = 0,
    /// Head of a free block on a zone free list.
    Pmm = 1,
    /// Head of a free block parked in a per-CPU cache.
    Pcp = 2,
    /// Page table.
    Mmu = 3,
    /// Object cache slab.
    Slab = 4,
    /// I/O buffer.
    Io = 5,
    /// Page cache on an LRU list.
    Lru = 6,
    /// Kernel heap.
    Heap = 7,
}

impl FrameRole {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Pmm,
            2 => Self::Pcp,
            3 => Self::Mmu,
            4 => Self::Slab,
            5 => Self::Io,
            6 => Self::Lru,
            7 => Self::Heap,
            _ => Self::None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

bitflags::bitflags! {
    /// Frame state bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct FrameState: u16 {
        const ACTIVE = 1 << 0;
        const PINNED = 1 << 1;
        const DIRTY = 1 << 2;
        const UP_TO_DATE = 1 << 3;
        const FOREIGN = 1 << 4;
        const BEING_WAITED = 1 << 5;
        const FOLIO = 1 << 6;
        const RECLAIMABLE = 1 << 7;
        /// Claimed during boot; never handed to the buddy allocator.
        const RESERVED = 1 << 8;
    }
}

/// Packed frame metadata (see the module docs for the layout).
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct FrameBits {
    #[bits(6)]
    pub node: u8,
    #[bits(2)]
    pub zone: ZoneType,
    #[bits(4)]
    pub order: u8,
    #[bits(4)]
    pub role: FrameRole,
    #[bits(12)]
    pub state: u16,
    #[bits(28)]
    pub section: u32,
    pub present: bool,
    #[bits(7)]
    __: u8,
}

impl FrameBits {
    /// Metadata of a present frame that nobody owns yet.
    #[inline]
    #[must_use]
    pub const fn present_in(node: NodeId, zone: ZoneType, section: SecNum) -> Self {
        Self::new()
            .with_node(node)
            .with_zone(zone)
            .with_section(section)
            .with_present(true)
    }

    #[inline]
    #[must_use]
    pub const fn states(self) -> FrameState {
        FrameState::from_bits_retain(self.state())
    }

    #[inline]
    #[must_use]
    pub const fn with_states(self, states: FrameState) -> Self {
        self.with_state(states.bits())
    }
}

/// Sentinel for "no link" in index-based lists.
pub(crate) const NIL: u32 = u32::MAX;

/// Per-page metadata record.
#[repr(C)]
pub struct Frame {
    bits: AtomicU64,
    next: AtomicU32,
    prev: AtomicU32,
    refcount: AtomicU32,
}

impl Frame {
    /// A frame with no RAM behind it.
    #[inline]
    #[must_use]
    pub const fn absent(pfn: Pfn) -> Self {
        Self::with_bits(FrameBits::new().with_section(pfn.section()))
    }

    #[inline]
    #[must_use]
    pub const fn with_bits(bits: FrameBits) -> Self {
        Self {
            bits: AtomicU64::new(bits.into_bits()),
            next: AtomicU32::new(NIL),
            prev: AtomicU32::new(NIL),
            refcount: AtomicU32::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn bits(&self) -> FrameBits {
        FrameBits::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_bits(&self, bits: FrameBits) {
        self.bits.store(bits.into_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn update(&self, f: impl FnOnce(FrameBits) -> FrameBits) {
        self.set_bits(f(self.bits()));
    }

    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.bits().node()
    }

    #[inline]
    #[must_use]
    pub fn zone_type(&self) -> ZoneType {
        self.bits().zone()
    }

    #[inline]
    #[must_use]
    pub fn order(&self) -> u32 {
        u32::from(self.bits().order())
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> FrameRole {
        self.bits().role()
    }

    #[inline]
    #[must_use]
    pub fn is_role(&self, role: FrameRole) -> bool {
        self.role() == role
    }

    #[inline]
    pub fn set_role(&self, role: FrameRole) {
        self.update(|b| b.with_role(role));
    }

    #[inline]
    #[must_use]
    pub fn states(&self) -> FrameState {
        self.bits().states()
    }

    #[inline]
    pub fn insert_states(&self, states: FrameState) {
        self.update(|b| b.with_states(b.states().union(states)));
    }

    #[inline]
    pub fn remove_states(&self, states: FrameState) {
        self.update(|b| b.with_states(b.states().difference(states)));
    }

    #[inline]
    #[must_use]
    pub fn section(&self) -> SecNum {
        self.bits().section()
    }

    #[inline]
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.bits().present()
    }

    /// Marks the frame as the head of a free block of `order` owned by `role`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_free_head(&self, role: FrameRole, order: u32) {
        self.update(|b| b.with_role(role).with_order(order as u8));
    }

    /// Marks the frame as the head of an allocated block of `order`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_allocated_head(&self, order: u32) {
        self.update(|b| b.with_role(FrameRole::None).with_order(order as u8));
        self.refcount.store(1, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    /// Takes an additional reference.
    #[inline]
    pub fn get(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drops a reference and returns the remaining count.
    ///
    /// # Panics
    /// Panics if the count is already zero.
    #[inline]
    pub fn put(&self) -> u32 {
        let prev = self.refcount.fetch_sub(1, Ordering::Release);
        assert!(prev != 0, "frame reference count underflow");
        prev - 1
    }

    #[inline]
    pub(crate) fn clear_refcount(&self) {
        self.refcount.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn prev(&self) -> u32 {
        self.prev.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_next(&self, idx: u32) {
        self.next.store(idx, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_prev(&self, idx: u32) {
        self.prev.store(idx, Ordering::Relaxed);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bits();
        f.debug_struct("Frame")
            .field("node", &b.node())
            .field("zone", &b.zone())
            .field("order", &b.order())
            .field("role", &b.role())
            .field("state", &b.states())
            .field("present", &b.present())
            .field("refcount", &self.refcount())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(FrameBits::NODE_OFFSET, 0);
        assert_eq!(FrameBits::NODE_BITS, 6);
        assert_eq!(FrameBits::ZONE_OFFSET, 6);
        assert_eq!(FrameBits::ORDER_OFFSET, 8);
        assert_eq!(FrameBits::ROLE_OFFSET, 12);
        assert_eq!(FrameBits::STATE_OFFSET, 16);
        assert_eq!(FrameBits::SECTION_OFFSET, 28);
        assert_eq!(FrameBits::PRESENT_OFFSET, 56);
        assert!(size_of::<Frame>() <= 3 * size_of::<u64>());
    }

    #[test]
    fn fields_land_on_documented_bits() {
        let bits = FrameBits::present_in(5, ZoneType::Normal, 0x3)
            .with_order(10)
            .with_role(FrameRole::Pmm)
            .with_states(FrameState::PINNED);

        let raw = bits.into_bits();
        assert_eq!(raw & 0x3F, 5);
        assert_eq!((raw >> 6) & 0x3, u64::from(ZoneType::Normal.into_bits()));
        assert_eq!((raw >> 8) & 0xF, 10);
        assert_eq!((raw >> 12) & 0xF, u64::from(FrameRole::Pmm.into_bits()));
        assert_eq!((raw >> 16) & 0xFFF, u64::from(FrameState::PINNED.bits()));
        assert_eq!((raw >> 28) & 0xFFF_FFFF, 3);
        assert_eq!((raw >> 56) & 1, 1);
        assert_eq!(FrameBits::from_bits(raw), bits);
    }

    #[test]
    fn state_updates_keep_other_fields() {
        let frame = Frame::with_bits(FrameBits::present_in(1, ZoneType::Dma32, 0));
        frame.insert_states(FrameState::DIRTY | FrameState::ACTIVE);
        frame.set_role(FrameRole::Slab);
        frame.remove_states(FrameState::DIRTY);

        assert_eq!(frame.states(), FrameState::ACTIVE);
        assert!(frame.is_role(FrameRole::Slab));
        assert_eq!(frame.node(), 1);
        assert_eq!(frame.zone_type(), ZoneType::Dma32);
        assert!(frame.is_present());
    }

    #[test]
    fn refcounting() {
        let frame = Frame::absent(Pfn::new(0));
        frame.set_allocated_head(2);
        assert_eq!(frame.refcount(), 1);
        assert_eq!(frame.get(), 2);
        assert_eq!(frame.put(), 1);
        assert_eq!(frame.put(), 0);
        assert_eq!(frame.order(), 2);
    }

    #[test]
    fn absent_frames_carry_their_section() {
        let frame = Frame::absent(Pfn::new(3 << 15));
        assert_eq!(frame.section(), 3);
        assert!(!frame.is_present());
        assert!(frame.is_role(FrameRole::None));
    }
}
