//! # Kernel Platform Limits
//!
//! Compile-time constants shared by the memory subsystem crates. Everything in
//! here is fixed at build time so that per-node and per-CPU tables can be sized
//! statically and checked with `const` assertions.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Direct map**: where physical memory is visible in the kernel's address space
//! * **Memory classes**: the physical limits of the DMA and DMA32 zones
//! * **Legacy memory**: low memory the boot allocator keeps its hands off
//!
//! ### Topology ([`topology`])
//! * **Nodes**: the maximum number of NUMA nodes and zones per node
//! * **CPUs**: the maximum number of logical CPUs with a per-CPU frame cache
//!
//! ```text
//! Physical Address Space (x86-64 defaults):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Legacy low memory (Unused)    │
//! LEGACY_LOW_MEMORY_END ├─────────────────────────────────┤ 0x0000_0000_0010_0000
//!                       │          Zone DMA               │
//! DMA_ZONE_END          ├─────────────────────────────────┤ 0x0000_0000_0100_0000
//!                       │          Zone DMA32             │
//! DMA32_ZONE_END        ├─────────────────────────────────┤ 0x0000_0001_0000_0000
//!                       │          Zone Normal            │
//!                       └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
pub mod topology;
