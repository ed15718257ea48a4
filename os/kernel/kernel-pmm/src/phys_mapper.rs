//! # Physical Memory Access
//!
//! The memory core stores its own bookkeeping (grown region tables, the frame
//! table, node descriptors, per-CPU caches) in physical memory it just
//! allocated, and zeroes frames for `Gaf::ZERO` requests. Code can only touch
//! virtual addresses, so every such access goes through a [`PhysMapper`].
//!
//! - With a higher-half direct map, [`HhdmPhysMapper`] adds
//!   [`HHDM_BASE`](kernel_info::memory::HHDM_BASE) to the physical address.
//! - Tests back a window of "physical" memory with a host buffer.

use core::mem::MaybeUninit;
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;

/// Turns physical ranges into slices in the current address space.
pub trait PhysMapper {
    /// View `len` values of `T` starting at `pa`.
    ///
    /// # Safety
    /// - `[pa, pa + len * size_of::<T>())` must be mapped, writable and
    ///   exclusively owned by the caller for `'a`.
    /// - `pa` must be aligned for `T`.
    unsafe fn phys_to_mut_slice<'a, T>(
        &self,
        pa: PhysicalAddress,
        len: usize,
    ) -> &'a mut [MaybeUninit<T>];

    /// Fills `len` bytes at `pa` with zeros.
    ///
    /// # Safety
    /// Same requirements as [`phys_to_mut_slice`](Self::phys_to_mut_slice).
    unsafe fn zero(&self, pa: PhysicalAddress, len: usize) {
        let bytes = unsafe { self.phys_to_mut_slice::<u8>(pa, len) };
        bytes.fill(MaybeUninit::new(0));
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    unsafe fn phys_to_mut_slice<'a, T>(
        &self,
        pa: PhysicalAddress,
        len: usize,
    ) -> &'a mut [MaybeUninit<T>] {
        unsafe { (**self).phys_to_mut_slice(pa, len) }
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// The HHDM must cover every physical range the memory core touches.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut_slice<'a, T>(
        &self,
        pa: PhysicalAddress,
        len: usize,
    ) -> &'a mut [MaybeUninit<T>] {
        let va = (HHDM_BASE + pa.as_u64()) as *mut MaybeUninit<T>;
        // SAFETY: Caller guarantees the range is mapped through the HHDM and exclusively owned.
        unsafe { core::slice::from_raw_parts_mut(va, len) }
    }
}
