//! # Physical Address and Frame Number Types
//!
//! Strongly typed wrappers for physical addresses and page frame numbers used
//! by the physical memory core.
//!
//! ## Overview
//!
//! The memory core juggles three views of the same physical location and mixing
//! them up is the classic source of off-by-4096 bugs. The types in this crate
//! keep them apart at compile time while remaining zero-cost wrappers around
//! `u64` values:
//!
//! | Concept | Type | Description |
//! |---------|------|-------------|
//! | Byte address | [`PhysicalAddress`] | A raw 64-bit physical address (RAM or MMIO). |
//! | Frame number | [`Pfn`] | `address >> FRAME_SHIFT`, the index space of the frame table. |
//! | Section | [`SecNum`] | `address >> SECTION_SHIFT`, a coarse 128 MiB bucket. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! let pfn = pa.pfn();
//! assert_eq!(pfn.as_u64(), 0x102);
//! assert_eq!(pfn.base(), PhysicalAddress::new(0x0010_2000));
//! assert!(pa.align_down(0x20_0000).is_aligned(0x20_0000));
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys.
//! - All alignment and conversion helpers are `const fn`.
//! - Alignments are plain `u64` values that must be powers of two; the helpers
//!   do not check this in release builds.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod pfn;
mod physical_address;

pub use pfn::{Pfn, SecNum};
pub use physical_address::PhysicalAddress;

/// log2 of the base frame size.
pub const FRAME_SHIFT: u32 = 12;

/// Base frame size in bytes.
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;

/// log2 of the section size (128 MiB).
pub const SECTION_SHIFT: u32 = 27;

/// Section size in bytes.
pub const SECTION_SIZE: u64 = 1 << SECTION_SHIFT;

const _: () = assert!(SECTION_SHIFT > FRAME_SHIFT);

/// Number of frames needed to cover `bytes`, rounded up.
#[inline]
#[must_use]
pub const fn frames_for(bytes: u64) -> u64 {
    bytes.div_ceil(FRAME_SIZE)
}
