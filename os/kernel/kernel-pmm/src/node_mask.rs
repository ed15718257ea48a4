//! Node bitsets and the global node state masks.

use crate::config::{MAX_NODES, NodeId};
use crate::zone::ZoneType;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Set of node ids.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeMask(u64);

impl NodeMask {
    /// No nodes.
    pub const EMPTY: Self = Self(0);

    /// Every node id below [`MAX_NODES`].
    #[allow(clippy::cast_possible_truncation)]
    pub const ALL: Self = Self(if MAX_NODES == 64 {
        u64::MAX
    } else {
        (1u64 << MAX_NODES) - 1
    });

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn single(nid: NodeId) -> Self {
        Self::EMPTY.with(nid)
    }

    #[inline]
    #[must_use]
    pub const fn with(self, nid: NodeId) -> Self {
        debug_assert!((nid as usize) < MAX_NODES);
        Self(self.0 | (1 << nid))
    }

    #[inline]
    #[must_use]
    pub const fn without(self, nid: NodeId) -> Self {
        Self(self.0 & !(1 << nid))
    }

    #[inline]
    pub const fn set(&mut self, nid: NodeId) {
        *self = self.with(nid);
    }

    #[inline]
    pub const fn clear(&mut self, nid: NodeId) {
        *self = self.without(nid);
    }

    #[inline]
    #[must_use]
    pub const fn test(self, nid: NodeId) -> bool {
        (nid as usize) < MAX_NODES && self.0 & (1 << nid) != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Lowest node id in the set.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn first(self) -> Option<NodeId> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as NodeId)
        }
    }

    /// Node ids in increasing order.
    #[must_use]
    pub const fn iter(self) -> NodeMaskIter {
        NodeMaskIter(self.0)
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl IntoIterator for NodeMask {
    type Item = NodeId;
    type IntoIter = NodeMaskIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<NodeId> for NodeMask {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

pub struct NodeMaskIter(u64);

impl Iterator for NodeMaskIter {
    type Item = NodeId;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<NodeId> {
        if self.0 == 0 {
            return None;
        }
        let nid = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(nid as NodeId)
    }
}

/// Node state classes tracked in [`NodeStates`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    /// The node has a zone of type `Dma` with present frames.
    DmaMemory = 0,
    /// The node has a zone of type `Dma32` with present frames.
    Dma32Memory = 1,
    /// The node has a zone of type `Normal` with present frames.
    NormalMemory = 2,
    /// Described by firmware; may come online later.
    Possible = 3,
    /// Initialized; allocations may target it.
    Online = 4,
    /// Spans at least one frame of memory.
    Memory = 5,
}

const NR_NODE_STATES: usize = 6;

impl NodeState {
    /// The per-class state for zones of `ty`.
    #[must_use]
    pub const fn for_zone(ty: ZoneType) -> Self {
        match ty {
            ZoneType::Dma => Self::DmaMemory,
            ZoneType::Dma32 => Self::Dma32Memory,
            ZoneType::Normal => Self::NormalMemory,
        }
    }
}

/// Global node state masks.
///
/// Written during bring-up and on node on/offlining, read on every allocation.
pub struct NodeStates {
    masks: [AtomicU64; NR_NODE_STATES],
}

impl Default for NodeStates {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStates {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            masks: [const { AtomicU64::new(0) }; NR_NODE_STATES],
        }
    }

    #[inline]
    #[must_use]
    pub fn mask(&self, state: NodeState) -> NodeMask {
        NodeMask::from_bits(self.masks[state as usize].load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn is_state(&self, nid: NodeId, state: NodeState) -> bool {
        self.mask(state).test(nid)
    }

    #[inline]
    pub fn set_state(&self, nid: NodeId, state: NodeState, on: bool) {
        let bit = NodeMask::single(nid).bits();
        let slot = &self.masks[state as usize];
        if on {
            slot.fetch_or(bit, Ordering::AcqRel);
        } else {
            slot.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    #[inline]
    #[must_use]
    pub fn is_online(&self, nid: NodeId) -> bool {
        self.is_state(nid, NodeState::Online)
    }

    #[inline]
    pub fn set_online(&self, nid: NodeId, on: bool) {
        self.set_state(nid, NodeState::Online, on);
    }

    #[inline]
    #[must_use]
    pub fn is_possible(&self, nid: NodeId) -> bool {
        self.is_state(nid, NodeState::Possible)
    }

    #[inline]
    #[must_use]
    pub fn online(&self) -> NodeMask {
        self.mask(NodeState::Online)
    }
}

impl fmt::Debug for NodeStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStates")
            .field("possible", &self.mask(NodeState::Possible))
            .field("online", &self.mask(NodeState::Online))
            .field("memory", &self.mask(NodeState::Memory))
            .finish_non_exhaustive()
    }
}
