//! # Physical Memory Management
//!
//! This crate is the physical-memory core of the kernel: it turns the
//! firmware memory map into individually addressable page frames and serves
//! frame allocations to every other subsystem (virtual memory, object caches,
//! thread stacks).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            PhysicalMemoryManager                    │
//! │    • Gaf policy: class, locality, retry, zeroing    │
//! │    • NUMA routing across nodes                      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Node  ──►  Zone (DMA / DMA32 / Normal) │
//! │    • Buddy free lists, split and coalesce           │
//! │    • Per-CPU caches for orders 0..=3                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              FrameTable                             │
//! │    • One bit-packed Frame record per page           │
//! │    • Index-based intrusive free-list links          │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ sized and allocated by
//! ┌─────────────────▼───────────────────────────────────┐
//! │              BootMem                                │
//! │    • available / reserved region tables             │
//! │    • Self-hosted table growth                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Boot allocator ([`bootmem`])
//!
//! Two sorted, non-overlapping [`RegionTable`]s describe free and claimed
//! physical memory before anything else exists. [`BootMem`] answers bounded,
//! aligned, node-aware requests by moving ranges from one table to the other,
//! and grows its own tables out of the memory it manages.
//!
//! ### Frames ([`frame`], [`frame_table`], [`free_list`])
//!
//! - [`Frame`]: node, zone, section, order, role and state packed into one
//!   `u64`, plus `u32` list links and a reference count.
//! - [`FrameTable`]: the dense array of frames, indexed by PFN.
//! - [`FrameHandle`]: move-only ownership token of an allocated block.
//! - [`FrameList`]: index-based list of blocks, used by the free areas, the
//!   per-CPU caches and the batch allocation API.
//!
//! ### Buddy allocator ([`zone`], [`pcp`], [`node`])
//!
//! A [`Zone`] manages the frames of one `(node, memory class)` pair in
//! power-of-two blocks up to [`MAX_FRAME_ORDER`]. Small orders go through a
//! [`PerCpuFrameCache`] first. A [`Node`] groups the zones of one NUMA node
//! and knows in which order to fall back to other nodes.
//!
//! ### Policy ([`gaf`], [`reclaim`])
//!
//! Every request carries a [`Gaf`] bitmask. `NEVER_FAIL` requests retry a
//! bounded number of times, asking an optional [`ReclaimHook`] for memory.
//!
//! ### Inputs ([`firmware`], [`topology`])
//!
//! [`ingest_firmware_map`] feeds the firmware memory map into [`BootMem`];
//! a [`NumaTopology`] assigns ranges to proximity domains.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_pmm::{
//!     BootMem, FirmwareEntry, FirmwareRegionKind, FlatTopology, Gaf, HhdmPhysMapper,
//!     NodeMask, PhysicalMemoryManager, PmmConfig, Region, ingest_firmware_map,
//! };
//!
//! let mapper = HhdmPhysMapper;
//! let mut available = [Region::EMPTY; 16];
//! let mut reserved = [Region::EMPTY; 16];
//! let mut bootmem = BootMem::new(&mapper, &mut available, &mut reserved);
//! ingest_firmware_map(
//!     &mut bootmem,
//!     &[FirmwareEntry::new(0, 0x8000_0000, FirmwareRegionKind::Available)],
//! )?;
//!
//! let pmm = PhysicalMemoryManager::init(bootmem, &FlatTopology, PmmConfig::default())?;
//! let cpu = pmm.cpu(0);
//! if let Some(frame) = cpu.alloc_frame(Gaf::ZERO, 0, NodeMask::ALL) {
//!     cpu.free_frame(frame, 0);
//! }
//! # Ok::<(), kernel_pmm::PmmError>(())
//! ```
//!
//! ## Concurrency
//!
//! Boot allocation is single-threaded and needs `&mut BootMem`. After
//! [`PhysicalMemoryManager::init`] every entry point takes `&self`: each zone
//! serializes its free lists behind one spin lock, and each per-CPU cache
//! slot has its own lock, always taken before the zone lock.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod bootmem;
pub mod config;
pub mod error;
pub mod firmware;
pub mod frame;
pub mod frame_table;
pub mod free_list;
pub mod gaf;
pub mod node;
pub mod node_mask;
pub mod pcp;
pub mod phys_mapper;
pub mod pmm;
pub mod reclaim;
pub mod topology;
pub mod zone;

pub use bootmem::{
    AllocationDirection, BootMem, IterationContext, Region, RegionSource, RegionTable, RegionType,
};
pub use config::{
    CpuId, MAX_CPUS, MAX_FRAME_ORDER, MAX_NODES, MAX_PCPU_FRAME_ORDER, NodeId, PcpConfig, PmmConfig,
    RetryPolicy,
};
pub use error::{PmmError, Status};
pub use firmware::{FirmwareEntry, FirmwareRegionKind, IngestSummary, ingest_firmware_map};
pub use frame::{Frame, FrameBits, FrameRole, FrameState};
pub use frame_table::{FrameHandle, FrameTable};
pub use free_list::FrameList;
pub use gaf::{GAF_BOOT, GAF_KERNEL, GAF_USER, Gaf, gaf_zone_type};
pub use node::Node;
pub use node_mask::{NodeMask, NodeState, NodeStates};
pub use pcp::PerCpuFrameCache;
pub use phys_mapper::{HhdmPhysMapper, PhysMapper};
pub use pmm::{CpuAllocator, PhysicalMemoryManager, num_to_order};
pub use reclaim::{ReclaimHook, ReclaimRequest};
pub use topology::{FlatTopology, MemoryAffinity, NodeDistances, NumaInfo, NumaTopology, StaticTopology};
pub use zone::{Watermark, Zone, ZoneType};

pub use kernel_memory_addresses::{FRAME_SIZE, Pfn, PhysicalAddress};
