//! # Kernel synchronization primitives
//!
//! The physical memory core needs exactly two things from this crate: a lock
//! for each zone's free lists and a way to lay out per-CPU state so that two
//! CPUs never share a cache line.
//!
//! - [`SpinLock`]: test-and-test-and-set lock that counts contended acquisitions.
//! - [`CachePadded`]: aligns a value to its own 64-byte cache line.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cache_padded;
mod spin_lock;

pub use cache_padded::{CACHE_LINE_SIZE, CachePadded};
pub use spin_lock::{SpinLock, SpinLockGuard};
