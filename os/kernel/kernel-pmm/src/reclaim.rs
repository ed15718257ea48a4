//! Hooks into memory reclaim.
//!
//! The memory core does not know how to evict anything. A kernel that can
//! (page cache, slab shrinkers) registers a [`ReclaimHook`] with
//! [`PhysicalMemoryManager::set_reclaim_hook`](crate::PhysicalMemoryManager::set_reclaim_hook).

use crate::config::NodeId;
use crate::gaf::Gaf;
use crate::zone::ZoneType;

/// A failed allocation asking for memory to be released.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReclaimRequest {
    /// Node the request preferred.
    pub node: NodeId,
    pub zone: ZoneType,
    pub order: u32,
    pub gaf: Gaf,
    /// Retry number, starting at 1.
    pub attempt: u32,
}

/// Releases memory on behalf of the allocator.
pub trait ReclaimHook: Sync {
    /// Frees memory in the calling context and returns the number of frames
    /// given back to the allocator.
    fn reclaim(&self, request: &ReclaimRequest) -> usize;

    /// Wakes background reclaim for a zone that fell below its moderate
    /// watermark. Must not block.
    fn kick(&self, node: NodeId, zone: ZoneType) {
        let _ = (node, zone);
    }
}
