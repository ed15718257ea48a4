//! # NUMA Nodes
//!
//! A [`Node`] groups the zones of one NUMA node and carries the order in
//! which other nodes are tried when it runs dry:
//!
//! ```text
//! node 1 ─┬─ zones: [DMA: -, DMA32: [0x100000, 0x140000), Normal: ...]
//!         └─ route: 1 → 0 → 3 → 2      (increasing distance)
//! ```

use crate::config::{CpuId, MAX_NODES, NR_ZONES_PER_NODE, NodeId};
use crate::frame_table::FrameHandle;
use crate::node_mask::NodeMask;
use crate::topology::NodeDistances;
use crate::zone::{NR_ZONE_TYPES, Zone, ZoneType};
use core::fmt;
use kernel_memory_addresses::Pfn;
use log::{debug, info};

const _: () = assert!(NR_ZONE_TYPES <= NR_ZONES_PER_NODE);

/// Memory of one NUMA node.
pub struct Node<'a> {
    id: NodeId,
    start_pfn: Pfn,
    spanned: u64,
    present: u64,
    /// Indexed by [`ZoneType::index`].
    zones: [Option<Zone<'a>>; NR_ZONES_PER_NODE],
    route: [NodeId; MAX_NODES],
    route_len: usize,
}

impl<'a> Node<'a> {
    /// Creates a node without zones whose route only contains itself.
    #[must_use]
    pub fn new(id: NodeId, start_pfn: Pfn, spanned: u64) -> Self {
        let mut route = [0; MAX_NODES];
        route[0] = id;
        Self {
            id,
            start_pfn,
            spanned,
            present: 0,
            zones: [const { None }; NR_ZONES_PER_NODE],
            route,
            route_len: 1,
        }
    }

    /// Installs `zone` in its class slot.
    ///
    /// # Panics
    /// Panics if the zone belongs to another node or leaves the node span.
    pub fn set_zone(&mut self, zone: Zone<'a>) {
        assert_eq!(zone.node(), self.id, "zone of node {} given to node {}", zone.node(), self.id);
        assert!(
            zone.spanned_frames() == 0
                || (zone.start_pfn() >= self.start_pfn && zone.end_pfn() <= self.end_pfn()),
            "zone {} outside node {}",
            zone.zone_type().name(),
            self.id
        );
        self.present += zone.present_frames();
        let slot = zone.zone_type().index();
        self.zones[slot] = Some(zone);
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn start_pfn(&self) -> Pfn {
        self.start_pfn
    }

    #[inline]
    #[must_use]
    pub fn end_pfn(&self) -> Pfn {
        self.start_pfn + self.spanned
    }

    #[inline]
    #[must_use]
    pub const fn spanned_frames(&self) -> u64 {
        self.spanned
    }

    /// Frames backed by RAM across all zones.
    #[inline]
    #[must_use]
    pub const fn present_frames(&self) -> u64 {
        self.present
    }

    /// Free frames across all zones.
    #[must_use]
    pub fn managed_frames(&self) -> u64 {
        self.zones().map(Zone::managed_frames).sum()
    }

    #[inline]
    #[must_use]
    pub fn zone(&self, ty: ZoneType) -> Option<&Zone<'a>> {
        self.zones[ty.index()].as_ref()
    }

    /// Zones in class order.
    pub fn zones(&self) -> impl Iterator<Item = &Zone<'a>> {
        self.zones.iter().flatten()
    }

    /// Zone whose span holds `pfn`.
    #[must_use]
    pub fn zone_of(&self, pfn: Pfn) -> Option<&Zone<'a>> {
        self.zones().find(|z| z.contains(pfn))
    }

    /// Nodes to try, starting with this one.
    #[inline]
    #[must_use]
    pub fn route(&self) -> &[NodeId] {
        &self.route[..self.route_len]
    }

    /// Orders `online` nodes by increasing distance from this node, ties
    /// broken by the lower id. The node itself always comes first.
    pub fn build_optimal_node_route(&mut self, online: NodeMask, distances: &NodeDistances) {
        let mut len = 0;
        self.route[len] = self.id;
        len += 1;
        for nid in online.without(self.id) {
            self.route[len] = nid;
            len += 1;
        }

        let me = self.id;
        self.route[1..len].sort_unstable_by_key(|&nid| (distances.get(me, nid), nid));
        self.route_len = len;
        debug!("node {me}: route {:?}", self.route());
    }

    /// Allocates from the zone for `ty`, then from every more restricted
    /// zone of this node.
    #[must_use]
    pub fn alloc_frame(&self, cpu: CpuId, ty: ZoneType, order: u32) -> Option<FrameHandle> {
        ty.fallbacks()
            .filter_map(|t| self.zone(t))
            .find_map(|z| z.alloc_frame(cpu, order))
    }

    /// Flushes the per-CPU caches of `cpu` in every zone.
    pub fn drain_pcp(&self, cpu: CpuId) -> usize {
        self.zones().map(|z| z.drain_pcp(cpu)).sum()
    }

    /// Flushes all per-CPU caches in every zone.
    pub fn drain_all_pcp(&self) -> usize {
        self.zones().map(Zone::drain_all_pcp).sum()
    }

    /// Logs the node and its zones at info level.
    pub fn dump(&self) {
        info!(
            "node {} pfn [{}, {}) spanned {} present {} managed {} route {:?}",
            self.id,
            self.start_pfn,
            self.end_pfn(),
            self.spanned,
            self.present,
            self.managed_frames(),
            self.route()
        );
        for z in self.zones() {
            z.dump();
        }
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("start_pfn", &self.start_pfn)
            .field("spanned", &self.spanned)
            .field("present", &self.present)
            .field("route", &self.route())
            .finish_non_exhaustive()
    }
}
