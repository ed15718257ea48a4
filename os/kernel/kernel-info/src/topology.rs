//! # Topology Limits

/// Maximum number of NUMA nodes.
pub const MAX_NODES: usize = 32;

/// Number of bits needed to encode a node id.
pub const MAX_NODES_BITS: u32 = usize::BITS - (MAX_NODES - 1).leading_zeros();

/// Zone slots reserved per node (DMA, DMA32, Normal and one spare).
pub const NR_ZONES_PER_NODE: usize = 4;

/// Maximum number of logical CPUs that get a per-CPU frame cache.
pub const MAX_CPUS: usize = 64;

const _: () = {
    assert!(MAX_NODES <= 64, "node masks are 64 bits wide");
    assert!(MAX_NODES_BITS <= 6, "frame records reserve 6 bits for the node");
    assert!(NR_ZONES_PER_NODE <= 4, "frame records reserve 2 bits for the zone");
    assert!(MAX_CPUS > 0);
};
