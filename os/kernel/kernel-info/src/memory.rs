//! # Memory Layout

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// End (exclusive) of the memory legacy devices and firmware still poke at.
///
/// RAM below this address is registered as `Unused`: the boot allocator never
/// hands it out, the buddy allocator receives it at hand-off.
pub const LEGACY_LOW_MEMORY_END: u64 = 0x0010_0000; // 1 MiB

/// End (exclusive) of the ISA DMA zone.
pub const DMA_ZONE_END: u64 = 0x0100_0000; // 16 MiB

/// End (exclusive) of the 32-bit DMA zone.
pub const DMA32_ZONE_END: u64 = 0x1_0000_0000; // 4 GiB

/// Highest physical address the memory core will ever track (52-bit physical).
pub const MAX_PHYSICAL_ADDRESS: u64 = 1 << 52;

const _: () = {
    assert!(LEGACY_LOW_MEMORY_END < DMA_ZONE_END);
    assert!(DMA_ZONE_END < DMA32_ZONE_END);
    assert!(DMA32_ZONE_END < MAX_PHYSICAL_ADDRESS);
    assert!(DMA_ZONE_END.is_multiple_of(4096));
};
