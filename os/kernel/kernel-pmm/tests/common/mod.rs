//! Host-backed "physical" memory for integration tests.

#![allow(dead_code)]

use kernel_pmm::{BootMem, PhysMapper, PhysicalAddress, Region};
use std::alloc::{Layout, alloc_zeroed};
use std::mem::MaybeUninit;

/// A zeroed host buffer standing in for physical memory `[base, base + len)`.
#[derive(Debug)]
pub struct SimulatedMemory {
    base: u64,
    len: u64,
    host: usize,
}

impl SimulatedMemory {
    /// Allocates the window and leaks it for the rest of the test binary.
    pub fn leak(base: u64, len: u64) -> &'static Self {
        let layout = Layout::from_size_align(len as usize, 4096).expect("layout");
        // SAFETY: The layout has a non-zero size.
        let host = unsafe { alloc_zeroed(layout) };
        assert!(!host.is_null(), "host allocation of {len:#x} bytes failed");
        Box::leak(Box::new(Self {
            base,
            len,
            host: host as usize,
        }))
    }

    pub fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    pub fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base + self.len)
    }

    /// Bytes at `[pa, pa + len)`.
    pub fn bytes(&self, pa: PhysicalAddress, len: usize) -> &mut [u8] {
        let slots = unsafe { self.phys_to_mut_slice::<u8>(pa, len) };
        // SAFETY: The host buffer was zero-initialized.
        unsafe { std::slice::from_raw_parts_mut(slots.as_mut_ptr().cast::<u8>(), len) }
    }
}

impl PhysMapper for SimulatedMemory {
    unsafe fn phys_to_mut_slice<'a, T>(
        &self,
        pa: PhysicalAddress,
        len: usize,
    ) -> &'a mut [MaybeUninit<T>] {
        let bytes = (len * size_of::<T>()) as u64;
        assert!(
            pa.as_u64() >= self.base && pa.as_u64() + bytes <= self.base + self.len,
            "{pa} + {bytes:#x} outside simulated memory"
        );
        let ptr = (self.host + (pa.as_u64() - self.base) as usize) as *mut MaybeUninit<T>;
        // SAFETY: The range lies inside the leaked host buffer.
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }
}

/// A boot allocator over `mem` with seed arrays of `seed` slots.
pub fn boot(mem: &'static SimulatedMemory, seed: usize) -> BootMem<'static, SimulatedMemory> {
    let available = Vec::leak(vec![Region::EMPTY; seed]);
    let reserved = Vec::leak(vec![Region::EMPTY; seed]);
    BootMem::new(mem, available, reserved)
}

/// `(base, end)` of every region in `regions`.
pub fn spans(regions: &[Region]) -> Vec<(u64, u64)> {
    regions
        .iter()
        .map(|r| (r.base.as_u64(), r.end().as_u64()))
        .collect()
}

/// Asserts that `regions` is sorted and free of overlaps.
pub fn assert_sorted_disjoint(regions: &[Region]) {
    for pair in regions.windows(2) {
        assert!(
            pair[0].end() <= pair[1].base,
            "{:?} overlaps or precedes {:?}",
            pair[0],
            pair[1]
        );
    }
}
