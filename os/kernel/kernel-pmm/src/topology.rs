//! # NUMA Topology
//!
//! Firmware (ACPI SRAT/SLIT on x86) describes memory as proximity domains.
//! Parsing those tables happens elsewhere; this module only consumes the
//! facts through [`NumaTopology`]:
//!
//! - which physical ranges belong to which proximity domain, and
//! - the relative access distance between two domains.
//!
//! [`NumaInfo::discover`] turns domains into dense [`NodeId`]s (in discovery
//! order), tags the boot tables and records the node distance matrix.

use crate::bootmem::BootMem;
use crate::config::{MAX_NODES, NodeId};
use crate::error::{PmmError, Status};
use crate::node_mask::NodeMask;
use crate::phys_mapper::PhysMapper;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, info, warn};

/// Distance of a node to itself.
pub const LOCAL_DISTANCE: u8 = 10;

/// Distance assumed between two nodes when firmware gives none.
pub const REMOTE_DISTANCE: u8 = 20;

/// One `(proximity domain, physical range)` fact.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryAffinity {
    pub proximity_domain: u32,
    pub base: PhysicalAddress,
    pub size: u64,
}

/// Source of NUMA facts.
pub trait NumaTopology {
    /// Calls `f` once per memory affinity entry.
    fn for_each_memory_affinity(&self, f: &mut dyn FnMut(MemoryAffinity));

    /// Relative distance from domain `from` to domain `to`, if known.
    fn distance(&self, from: u32, to: u32) -> Option<u8>;
}

/// Topology without any NUMA information.
#[derive(Debug, Default, Copy, Clone)]
pub struct FlatTopology;

impl NumaTopology for FlatTopology {
    fn for_each_memory_affinity(&self, _f: &mut dyn FnMut(MemoryAffinity)) {}

    fn distance(&self, _from: u32, _to: u32) -> Option<u8> {
        None
    }
}

/// Topology backed by fixed tables.
#[derive(Debug, Default, Copy, Clone)]
pub struct StaticTopology<'t> {
    affinities: &'t [MemoryAffinity],
    distances: &'t [(u32, u32, u8)],
}

impl<'t> StaticTopology<'t> {
    /// `distances` holds `(from, to, distance)` triples; missing pairs use
    /// [`LOCAL_DISTANCE`]/[`REMOTE_DISTANCE`].
    #[must_use]
    pub const fn new(affinities: &'t [MemoryAffinity], distances: &'t [(u32, u32, u8)]) -> Self {
        Self {
            affinities,
            distances,
        }
    }
}

impl NumaTopology for StaticTopology<'_> {
    fn for_each_memory_affinity(&self, f: &mut dyn FnMut(MemoryAffinity)) {
        for a in self.affinities {
            f(*a);
        }
    }

    fn distance(&self, from: u32, to: u32) -> Option<u8> {
        self.distances
            .iter()
            .find(|(f, t, _)| *f == from && *t == to)
            .map(|(_, _, d)| *d)
    }
}

/// Node-to-node distance matrix.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeDistances {
    table: [[u8; MAX_NODES]; MAX_NODES],
}

impl Default for NodeDistances {
    fn default() -> Self {
        Self::uniform()
    }
}

impl NodeDistances {
    /// Local distance on the diagonal, remote distance everywhere else.
    #[must_use]
    pub const fn uniform() -> Self {
        let mut table = [[REMOTE_DISTANCE; MAX_NODES]; MAX_NODES];
        let mut i = 0;
        while i < MAX_NODES {
            table[i][i] = LOCAL_DISTANCE;
            i += 1;
        }
        Self { table }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, from: NodeId, to: NodeId) -> u8 {
        self.table
            .get(usize::from(from))
            .and_then(|row| row.get(usize::from(to)))
            .copied()
            .unwrap_or(u8::MAX)
    }

    pub fn set(&mut self, from: NodeId, to: NodeId, distance: u8) {
        if let Some(slot) = self
            .table
            .get_mut(usize::from(from))
            .and_then(|row| row.get_mut(usize::from(to)))
        {
            *slot = distance;
        }
    }
}

impl fmt::Debug for NodeDistances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDistances").finish_non_exhaustive()
    }
}

/// Result of topology discovery.
#[derive(Debug, Clone)]
pub struct NumaInfo {
    domains: [Option<u32>; MAX_NODES],
    possible: NodeMask,
    distances: NodeDistances,
}

impl NumaInfo {
    /// A single node 0 covering all memory.
    #[must_use]
    pub fn single_node() -> Self {
        let mut domains = [None; MAX_NODES];
        domains[0] = Some(0);
        Self {
            domains,
            possible: NodeMask::single(0),
            distances: NodeDistances::uniform(),
        }
    }

    /// Maps proximity domains to nodes and tags the boot tables.
    ///
    /// # Errors
    /// - [`PmmError::Unsupported`] if the topology reports no memory affinity.
    /// - Errors from [`BootMem::set_node`] while tagging.
    pub fn discover<M: PhysMapper>(
        topology: &dyn NumaTopology,
        bootmem: &mut BootMem<'_, M>,
    ) -> Status<Self> {
        let mut info = Self {
            domains: [None; MAX_NODES],
            possible: NodeMask::EMPTY,
            distances: NodeDistances::uniform(),
        };
        let mut entries = 0usize;
        let mut failure = None;

        topology.for_each_memory_affinity(&mut |a| {
            entries += 1;
            let Some(nid) = info.node_for_domain(a.proximity_domain) else {
                warn!(
                    "numa: dropping domain {} beyond {MAX_NODES} nodes",
                    a.proximity_domain
                );
                return;
            };
            match bootmem.set_node(a.base, a.size, nid) {
                Ok(()) => debug!(
                    "numa: domain {} [{:#x}+{:#x}] -> node {nid}",
                    a.proximity_domain,
                    a.base.as_u64(),
                    a.size
                ),
                Err(PmmError::InvalidRange) => warn!("numa: ignoring malformed affinity {a:?}"),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        if entries == 0 || info.possible.is_empty() {
            return Err(PmmError::Unsupported);
        }

        for from in info.possible {
            for to in info.possible {
                let fallback = if from == to {
                    LOCAL_DISTANCE
                } else {
                    REMOTE_DISTANCE
                };
                let d = match (info.domain_of(from), info.domain_of(to)) {
                    (Some(a), Some(b)) => topology.distance(a, b).unwrap_or(fallback),
                    _ => fallback,
                };
                info.distances.set(from, to, d);
            }
        }

        info!("numa: {} node(s) discovered", info.possible.count());
        Ok(info)
    }

    /// Node for `domain`, assigning the next free id on first sight.
    #[allow(clippy::cast_possible_truncation)]
    fn node_for_domain(&mut self, domain: u32) -> Option<NodeId> {
        if let Some(nid) = self.node_of_domain(domain) {
            return Some(nid);
        }
        let nid = self.domains.iter().position(Option::is_none)?;
        self.domains[nid] = Some(domain);
        let nid = nid as NodeId;
        self.possible.set(nid);
        Some(nid)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn node_of_domain(&self, domain: u32) -> Option<NodeId> {
        self.domains
            .iter()
            .position(|d| *d == Some(domain))
            .map(|nid| nid as NodeId)
    }

    #[must_use]
    pub fn domain_of(&self, nid: NodeId) -> Option<u32> {
        self.domains.get(usize::from(nid)).copied().flatten()
    }

    /// Nodes described by firmware.
    #[must_use]
    pub const fn possible(&self) -> NodeMask {
        self.possible
    }

    #[must_use]
    pub const fn distances(&self) -> &NodeDistances {
        &self.distances
    }
}
