//! # Physical Memory Manager
//!
//! The process-wide owner of nodes, zones and the frame table. It is built
//! once from a populated [`BootMem`] and then shared by reference with every
//! subsystem that needs frames.
//!
//! ## Bring-up
//!
//! ```text
//! BootMem ──► topology ──► frame table ──► nodes/zones ──► tag frames
//!                                                              │
//!          retire BootMem ◄── hand off available regions ◄─────┘
//! ```
//!
//! Every structure created on the way (frame table, node descriptors,
//! per-CPU cache arrays) is itself carved out of the boot allocator, on the
//! node it describes when possible.
//!
//! ## Allocation path
//!
//! 1. The preferred node (of the CPU, or given explicitly) tries the zone
//!    selected by the [`Gaf`] class bits, then every more restricted zone.
//! 2. Unless `ONLY_THIS_NODE` is set, the remaining nodes of the mask are
//!    tried in the preferred node's route order.
//! 3. `NEVER_FAIL` and `DIRECTLY_RECLAIM` requests retry a bounded number of
//!    times, draining the per-CPU caches and calling the [`ReclaimHook`]
//!    before each attempt.

use crate::bootmem::{BootMem, IterationContext, RegionSource, RegionType};
use crate::config::{CpuId, MAX_CPUS, MAX_FRAME_ORDER, MAX_NODES, NodeId, PmmConfig};
use crate::error::{PmmError, Status};
use crate::frame::{Frame, FrameBits, FrameState};
use crate::frame_table::{FrameHandle, FrameTable, MAX_TABLE_FRAMES};
use crate::free_list::FrameList;
use crate::gaf::Gaf;
use crate::node::Node;
use crate::node_mask::{NodeMask, NodeState, NodeStates};
use crate::pcp::PerCpuFrameCache;
use crate::phys_mapper::PhysMapper;
use crate::reclaim::{ReclaimHook, ReclaimRequest};
use crate::topology::{NodeDistances, NumaInfo, NumaTopology};
use crate::zone::{NR_ZONE_TYPES, Watermark, Zone, ZoneType};
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_memory_addresses::{FRAME_SIZE, Pfn, PhysicalAddress};
use kernel_sync::{CachePadded, SpinLock};
use log::{debug, error, info, warn};

/// Cap on the doubling of the retry backoff.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Smallest order whose block holds `n` frames (`ceil(log2(n))`).
#[inline]
#[must_use]
pub const fn num_to_order(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

/// Owner of all nodes, zones and frame metadata.
pub struct PhysicalMemoryManager<'a, M: PhysMapper> {
    mapper: &'a M,
    config: PmmConfig,
    frames: FrameTable<'a>,
    nodes: [Option<&'a Node<'a>>; MAX_NODES],
    states: NodeStates,
    distances: NodeDistances,
    cpu_nodes: [AtomicU8; MAX_CPUS],
    reclaim: Option<&'a dyn ReclaimHook>,
}

impl<'a, M: PhysMapper> PhysicalMemoryManager<'a, M> {
    /// Builds the buddy allocator from `bootmem` and retires it.
    ///
    /// # Errors
    /// - [`PmmError::OutOfMemory`] if `bootmem` holds no RAM or runs out
    ///   while allocating the allocator's own structures.
    /// - [`PmmError::InvalidArguments`] if the RAM span needs more frames
    ///   than a frame table can index.
    /// - Errors from applying the NUMA topology to the boot tables.
    #[allow(clippy::too_many_lines)]
    pub fn init(
        mut bootmem: BootMem<'a, M>,
        topology: &dyn NumaTopology,
        config: PmmConfig,
    ) -> Status<Self> {
        bootmem.set_direction(config.boot_direction);
        let mapper = bootmem.mapper();
        let (Some(start), Some(end)) = (bootmem.start_address(), bootmem.end_address()) else {
            return Err(PmmError::OutOfMemory);
        };

        let numa = match NumaInfo::discover(topology, &mut bootmem) {
            Ok(info) => info,
            Err(PmmError::Unsupported) => {
                info!("pmm: no memory affinity data, using a single node");
                bootmem.set_node(start, end - start, 0)?;
                NumaInfo::single_node()
            }
            Err(e) => return Err(e),
        };

        let base = start.pfn();
        let limit = end.align_up(FRAME_SIZE).pfn();
        let count = limit - base;
        if count >= MAX_TABLE_FRAMES {
            return Err(PmmError::InvalidArguments);
        }
        let count = usize::try_from(count).map_err(|_| PmmError::InvalidArguments)?;
        let slots = bootmem.alloc_objects(count, None, |i| Frame::absent(base + i as u64))?;
        let frames = FrameTable::new(slots, base);
        debug!("pmm: frame table for {count} frames at {base}");

        let present = tag_frames(&bootmem, &frames, &config);

        let states = NodeStates::new();
        let cpus = config.effective_cpus();
        let mut built: [Option<&'a mut Node<'a>>; MAX_NODES] = [const { None }; MAX_NODES];
        for nid in NodeMask::ALL {
            let Some((lo, hi)) = bootmem.node_pfn_range(nid) else {
                continue;
            };
            let (lo, hi) = (lo.max(base), hi.min(limit));
            let mut node = Node::new(nid, lo, hi - lo);

            for ty in ZoneType::ALL {
                let (zlo, zhi) = config.zone_range(ty);
                let (zlo, zhi) = (zlo.max(lo), zhi.min(hi));
                if zlo >= zhi {
                    continue;
                }
                let frames_present = present[usize::from(nid)][ty.index()];
                let pcp: &'a [CachePadded<SpinLock<PerCpuFrameCache>>] =
                    if config.pcp.is_enabled() && frames_present > 0 {
                        bootmem.alloc_objects(cpus, Some(nid), |_| {
                            CachePadded::new(SpinLock::new(PerCpuFrameCache::new()))
                        })?
                    } else {
                        &[]
                    };
                let zone = Zone::new(nid, ty, zlo, zhi - zlo, frames, pcp, config.pcp);
                zone.set_present_frames(frames_present);
                if frames_present > 0 {
                    states.set_state(nid, NodeState::for_zone(ty), true);
                }
                node.set_zone(zone);
            }

            states.set_state(nid, NodeState::Possible, true);
            states.set_state(nid, NodeState::Memory, node.present_frames() > 0);
            states.set_online(nid, true);
            built[usize::from(nid)] = Some(bootmem.alloc_object(node, Some(nid))?);
        }
        for nid in numa.possible() {
            states.set_state(nid, NodeState::Possible, true);
        }

        let online = states.online();
        for node in built.iter_mut().flatten() {
            node.build_optimal_node_route(online, numa.distances());
        }
        let nodes = built.map(|slot| slot.map(|node| -> &'a Node<'a> { node }));

        let claimed = IterationContext::new(RegionSource::Reserved).of_kinds(&[RegionType::Reserved]);
        for r in bootmem.regions(claimed) {
            let first = r.base.align_up(FRAME_SIZE).pfn();
            for (_, frame) in frames.range(first, r.end().pfn()) {
                frame.insert_states(FrameState::RESERVED);
            }
        }

        let mut handed = 0;
        let available = IterationContext::new(RegionSource::Available)
            .of_kinds(&[RegionType::Normal, RegionType::Unused]);
        for r in bootmem.regions(available) {
            let first = r.base.align_up(FRAME_SIZE).pfn();
            handed += hand_off(&frames, &nodes, r.node(), first, r.end().pfn());
        }
        for (pa, size) in bootmem.retire() {
            let (first, last) = (pa.align_up(FRAME_SIZE).pfn(), (pa + size).pfn());
            let nid = frames.pfn_to_frame(first).map_or(0, Frame::node);
            handed += hand_off(&frames, &nodes, nid, first, last);
        }

        for zone in nodes.iter().flatten().flat_map(|n| n.zones()) {
            zone.set_reserved_frames(zone.present_frames().saturating_sub(zone.managed_frames()));
            zone.compute_watermarks();
        }

        let first_online = online.first().unwrap_or(0);
        let pmm = Self {
            mapper,
            config,
            frames,
            nodes,
            states,
            distances: numa.distances().clone(),
            cpu_nodes: [const { AtomicU8::new(0) }; MAX_CPUS],
            reclaim: None,
        };
        for slot in &pmm.cpu_nodes {
            slot.store(first_online, Ordering::Relaxed);
        }

        info!(
            "pmm: {} node(s), {} frames present, {handed} handed to the buddy allocator",
            online.count(),
            pmm.present_frames_count()
        );
        Ok(pmm)
    }

    /// Handle that allocates on behalf of `cpu`.
    #[must_use]
    pub const fn cpu(&self, cpu: CpuId) -> CpuAllocator<'_, 'a, M> {
        CpuAllocator { pmm: self, cpu }
    }

    /// Installs the hook consulted by retrying and reclaiming requests.
    pub fn set_reclaim_hook(&mut self, hook: &'a dyn ReclaimHook) {
        self.reclaim = Some(hook);
    }

    #[must_use]
    pub const fn config(&self) -> &PmmConfig {
        &self.config
    }

    #[must_use]
    pub const fn mapper(&self) -> &'a M {
        self.mapper
    }

    #[must_use]
    pub const fn frames(&self) -> &FrameTable<'a> {
        &self.frames
    }

    #[must_use]
    pub const fn node_states(&self) -> &NodeStates {
        &self.states
    }

    /// The node `nid` if it is online.
    #[must_use]
    pub fn node(&self, nid: NodeId) -> Option<&'a Node<'a>> {
        if !self.states.is_online(nid) {
            return None;
        }
        self.nodes.get(usize::from(nid)).copied().flatten()
    }

    /// Online nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a Node<'a>> + '_ {
        self.states.online().into_iter().filter_map(|nid| self.node(nid))
    }

    #[must_use]
    pub fn zone(&self, nid: NodeId, ty: ZoneType) -> Option<&'a Zone<'a>> {
        self.node(nid)?.zone(ty)
    }

    /// Relative access distance between two nodes.
    #[must_use]
    pub fn distance(&self, from: NodeId, to: NodeId) -> u8 {
        self.distances.get(from, to)
    }

    /// Binds `cpu` to the node it allocates from by default.
    ///
    /// # Errors
    /// [`PmmError::InvalidArguments`] for an unknown CPU or an offline node.
    pub fn set_cpu_node(&self, cpu: CpuId, nid: NodeId) -> Status {
        let slot = self.cpu_nodes.get(cpu).ok_or(PmmError::InvalidArguments)?;
        if !self.states.is_online(nid) {
            return Err(PmmError::InvalidArguments);
        }
        slot.store(nid, Ordering::Relaxed);
        Ok(())
    }

    /// Default node of `cpu`.
    #[must_use]
    pub fn cpu_node(&self, cpu: CpuId) -> NodeId {
        self.cpu_nodes.get(cpu).map_or_else(
            || self.states.online().first().unwrap_or(0),
            |slot| slot.load(Ordering::Relaxed),
        )
    }

    /// Allocates `2^order` frames preferring the node of `cpu`.
    #[must_use]
    pub fn alloc_frame(&self, cpu: CpuId, gaf: Gaf, order: u32, mask: NodeMask) -> Option<FrameHandle> {
        self.alloc_frame_on(cpu, self.cpu_node(cpu), gaf, order, mask)
    }

    /// Allocates `2^order` frames preferring node `nid`.
    ///
    /// Naming a node does not pin the request to it: once `nid` is exhausted
    /// the nodes of `mask` are tried in route order. Pass `ONLY_THIS_NODE`
    /// in `gaf` for a strict per-node allocation. Returns `None` when memory
    /// is exhausted, including after the retry budget of `NEVER_FAIL`
    /// requests is spent.
    #[must_use]
    pub fn alloc_frame_on(
        &self,
        cpu: CpuId,
        nid: NodeId,
        gaf: Gaf,
        order: u32,
        mask: NodeMask,
    ) -> Option<FrameHandle> {
        if order > MAX_FRAME_ORDER {
            warn!("pmm: order {order} exceeds the maximum of {MAX_FRAME_ORDER}");
            return None;
        }

        let budget = self.retry_budget(gaf);
        let mut attempt = 0;
        loop {
            if let Some(handle) = self.try_alloc(cpu, nid, gaf, order, mask) {
                self.prepare(&handle, gaf, order);
                return Some(handle);
            }
            if attempt == budget {
                break;
            }
            attempt += 1;
            self.reclaim_for_retry(nid, gaf, order, attempt);
        }

        if gaf.intersects(Gaf::NEVER_FAIL | Gaf::REQUIRED) {
            error!(
                "pmm: order {order} {} allocation on node {nid} failed after {attempt} retries ({gaf:?})",
                gaf.zone_type().name()
            );
        } else {
            warn!(
                "pmm: order {order} {} allocation on node {nid} failed ({gaf:?})",
                gaf.zone_type().name()
            );
        }
        None
    }

    /// Allocates `n` frames as a list of blocks (binary decomposition of `n`).
    ///
    /// Either every block is appended to `out` or nothing is.
    ///
    /// # Errors
    /// - [`PmmError::InvalidArguments`] for `n == 0`.
    /// - [`PmmError::OutOfMemory`] if any block could not be allocated.
    pub fn alloc_frames(&self, cpu: CpuId, gaf: Gaf, out: &mut FrameList, n: u64) -> Status {
        if n == 0 {
            return Err(PmmError::InvalidArguments);
        }

        let mut batch = FrameList::new();
        let mut remaining = n;
        while remaining > 0 {
            let order = (u64::BITS - 1 - remaining.leading_zeros()).min(MAX_FRAME_ORDER);
            let Some(handle) = self.alloc_frame(cpu, gaf, order, NodeMask::ALL) else {
                self.free_frames(cpu, batch);
                return Err(PmmError::OutOfMemory);
            };
            batch.push(&self.frames, handle);
            remaining -= 1 << order;
        }
        out.append(&self.frames, &mut batch);
        Ok(())
    }

    /// Allocates up to `n` single frames into `out` and returns how many it got.
    pub fn alloc_frames_bulk(&self, cpu: CpuId, gaf: Gaf, out: &mut FrameList, n: usize) -> usize {
        let mut got = 0;
        while got < n {
            let Some(handle) = self.alloc_frame(cpu, gaf, 0, NodeMask::ALL) else {
                break;
            };
            out.push(&self.frames, handle);
            got += 1;
        }
        got
    }

    /// Returns a block of `2^order` frames.
    ///
    /// # Panics
    /// Panics if the block is not managed by any zone, or on a double free.
    pub fn free_frame(&self, cpu: CpuId, handle: FrameHandle, order: u32) {
        let zone = self
            .zone_of(handle.pfn())
            .unwrap_or_else(|| panic!("{handle:?} is not managed by any zone"));
        zone.free_frame(cpu, handle, order);
    }

    /// Returns every block of `list`; orders come from the head frames.
    pub fn free_frames(&self, cpu: CpuId, mut list: FrameList) {
        while let Some(handle) = list.take(&self.frames) {
            let order = self.frames.pfn_to_frame(handle.pfn()).map_or(0, Frame::order);
            self.free_frame(cpu, handle, order);
        }
    }

    #[inline]
    #[must_use]
    pub const fn frame_to_phys(&self, handle: &FrameHandle) -> PhysicalAddress {
        handle.phys()
    }

    /// Metadata of the frame holding `pa`.
    #[inline]
    #[must_use]
    pub fn phys_to_frame(&self, pa: PhysicalAddress) -> Option<&'a Frame> {
        self.frames.phys_to_frame(pa)
    }

    #[inline]
    #[must_use]
    pub fn pfn_to_frame(&self, pfn: Pfn) -> Option<&'a Frame> {
        self.frames.pfn_to_frame(pfn)
    }

    /// Flushes the per-CPU caches of `cpu` on every node.
    pub fn drain_cpu_caches(&self, cpu: CpuId) -> usize {
        self.nodes().map(|n| n.drain_pcp(cpu)).sum()
    }

    /// Flushes every per-CPU cache on every node.
    pub fn drain_all_caches(&self) -> usize {
        self.nodes().map(Node::drain_all_pcp).sum()
    }

    /// Free frames across all nodes, including per-CPU caches.
    #[must_use]
    pub fn free_frames_count(&self) -> u64 {
        self.nodes().map(Node::managed_frames).sum()
    }

    /// Frames backed by RAM across all nodes.
    #[must_use]
    pub fn present_frames_count(&self) -> u64 {
        self.nodes().map(Node::present_frames).sum()
    }

    /// Logs every node and zone at info level.
    pub fn dump(&self) {
        info!(
            "pmm: frames [{}, {}) free {} of {} present, online {:?}",
            self.frames.base_pfn(),
            self.frames.end_pfn(),
            self.free_frames_count(),
            self.present_frames_count(),
            self.states.online()
        );
        for node in self.nodes() {
            node.dump();
        }
    }

    fn zone_of(&self, pfn: Pfn) -> Option<&'a Zone<'a>> {
        let frame = self.frames.pfn_to_frame(pfn)?;
        self.zone(frame.node(), frame.zone_type())
    }

    fn first_online(&self) -> Option<&'a Node<'a>> {
        self.nodes().next()
    }

    fn try_alloc(
        &self,
        cpu: CpuId,
        nid: NodeId,
        gaf: Gaf,
        order: u32,
        mask: NodeMask,
    ) -> Option<FrameHandle> {
        let ty = gaf.zone_type();
        let preferred = self.node(nid);
        if let Some(node) = preferred
            && let Some(handle) = node.alloc_frame(cpu, ty, order)
        {
            return Some(handle);
        }
        if gaf.contains(Gaf::ONLY_THIS_NODE) {
            return None;
        }

        let route = preferred
            .or_else(|| self.first_online())
            .map_or(&[] as &[NodeId], |n| n.route());
        route
            .iter()
            .copied()
            .filter(|&other| other != nid && mask.test(other))
            .filter_map(|other| self.node(other))
            .find_map(|node| node.alloc_frame(cpu, ty, order))
    }

    fn retry_budget(&self, gaf: Gaf) -> u32 {
        if gaf.wants_retry() {
            self.config.retry.max_attempts
        } else if gaf.contains(Gaf::DIRECTLY_RECLAIM) {
            1
        } else {
            0
        }
    }

    fn reclaim_for_retry(&self, nid: NodeId, gaf: Gaf, order: u32, attempt: u32) {
        let drained = self.drain_all_caches();
        let reclaimed = self.reclaim.map_or(0, |hook| {
            hook.reclaim(&ReclaimRequest {
                node: nid,
                zone: gaf.zone_type(),
                order,
                gaf,
                attempt,
            })
        });
        debug!("pmm: retry {attempt} for order {order}: drained {drained} blocks, reclaimed {reclaimed} frames");

        let shift = (attempt - 1).min(MAX_BACKOFF_SHIFT);
        let spins = self.config.retry.backoff_spins.saturating_mul(1 << shift);
        for _ in 0..spins {
            core::hint::spin_loop();
        }
    }

    /// Applies the post-allocation parts of `gaf` to a fresh block.
    #[allow(clippy::cast_possible_truncation)]
    fn prepare(&self, handle: &FrameHandle, gaf: Gaf, order: u32) {
        if gaf.contains(Gaf::ZERO) {
            let len = (FRAME_SIZE << order) as usize;
            // SAFETY: The block was just allocated and is owned by this call.
            unsafe { self.mapper.zero(handle.phys(), len) };
        }
        if gaf.contains(Gaf::RECLAIM)
            && let Some(hook) = self.reclaim
            && let Some(zone) = self.zone_of(handle.pfn())
            && zone.is_below(Watermark::Moderate)
        {
            hook.kick(zone.node(), zone.zone_type());
        }
    }
}

impl<M: PhysMapper> fmt::Debug for PhysicalMemoryManager<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalMemoryManager")
            .field("frames", &self.frames)
            .field("states", &self.states)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Marks every whole frame of RAM present with its node, zone and section,
/// and counts the present frames per `(node, zone)`.
fn tag_frames<M: PhysMapper>(
    bootmem: &BootMem<'_, M>,
    frames: &FrameTable<'_>,
    config: &PmmConfig,
) -> [[u64; NR_ZONE_TYPES]; MAX_NODES] {
    let mut present = [[0u64; NR_ZONE_TYPES]; MAX_NODES];
    let ram = IterationContext::new(RegionSource::Both).of_kinds(&[
        RegionType::Normal,
        RegionType::Unused,
        RegionType::Reserved,
    ]);
    for r in bootmem.regions(ram) {
        let first = r.base.align_up(FRAME_SIZE).pfn();
        for (pfn, frame) in frames.range(first, r.end().pfn()) {
            let ty = config.zone_type_of(pfn);
            frame.set_bits(FrameBits::present_in(r.node(), ty, pfn.section()));
            present[usize::from(r.node())][ty.index()] += 1;
        }
    }
    present
}

/// Gives `[start, end)` of node `nid` to the zones it overlaps.
fn hand_off(
    frames: &FrameTable<'_>,
    nodes: &[Option<&Node<'_>>; MAX_NODES],
    nid: NodeId,
    start: Pfn,
    end: Pfn,
) -> u64 {
    let Some(node) = nodes.get(usize::from(nid)).copied().flatten() else {
        warn!("pmm: dropping frames [{start}, {end}) of unknown node {nid}");
        return 0;
    };
    for (_, frame) in frames.range(start, end) {
        frame.remove_states(FrameState::RESERVED);
    }
    node.zones()
        .map(|z| z.free_range(start.max(z.start_pfn()), end.min(z.end_pfn())))
        .sum()
}

/// A [`PhysicalMemoryManager`] bound to one CPU.
pub struct CpuAllocator<'m, 'a, M: PhysMapper> {
    pmm: &'m PhysicalMemoryManager<'a, M>,
    cpu: CpuId,
}

impl<M: PhysMapper> Clone for CpuAllocator<'_, '_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for CpuAllocator<'_, '_, M> {}

impl<'a, M: PhysMapper> CpuAllocator<'_, 'a, M> {
    #[must_use]
    pub const fn cpu_id(&self) -> CpuId {
        self.cpu
    }

    #[must_use]
    pub fn alloc_frame(&self, gaf: Gaf, order: u32, mask: NodeMask) -> Option<FrameHandle> {
        self.pmm.alloc_frame(self.cpu, gaf, order, mask)
    }

    /// See [`PhysicalMemoryManager::alloc_frame_on`]; `nid` is a preference
    /// unless `gaf` holds `ONLY_THIS_NODE`.
    #[must_use]
    pub fn alloc_frame_on(&self, nid: NodeId, gaf: Gaf, order: u32, mask: NodeMask) -> Option<FrameHandle> {
        self.pmm.alloc_frame_on(self.cpu, nid, gaf, order, mask)
    }

    /// See [`PhysicalMemoryManager::alloc_frames`].
    ///
    /// # Errors
    /// Same as [`PhysicalMemoryManager::alloc_frames`].
    pub fn alloc_frames(&self, gaf: Gaf, out: &mut FrameList, n: u64) -> Status {
        self.pmm.alloc_frames(self.cpu, gaf, out, n)
    }

    pub fn free_frame(&self, handle: FrameHandle, order: u32) {
        self.pmm.free_frame(self.cpu, handle, order);
    }

    pub fn free_frames(&self, list: FrameList) {
        self.pmm.free_frames(self.cpu, list);
    }

    /// Flushes this CPU's caches.
    pub fn drain(&self) -> usize {
        self.pmm.drain_cpu_caches(self.cpu)
    }

    #[must_use]
    pub fn node(&self) -> Option<&'a Node<'a>> {
        self.pmm.node(self.pmm.cpu_node(self.cpu))
    }
}

impl<M: PhysMapper> fmt::Debug for CpuAllocator<'_, '_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuAllocator").field("cpu", &self.cpu).finish_non_exhaustive()
    }
}
