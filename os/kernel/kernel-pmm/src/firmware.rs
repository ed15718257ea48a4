//! Firmware memory map ingestion.
//!
//! The bootloader hands over the firmware memory map (UEFI `GetMemoryMap`,
//! e820, ...) already reduced to [`FirmwareEntry`] values. This module feeds
//! them into the boot allocator:
//!
//! | Kind | Table | Region type |
//! |------|-------|-------------|
//! | `Available` below 1 MiB | available | `Unused` |
//! | `Available` | available | `Normal` |
//! | `AcpiReclaimable` | reserved | `Reserved` |
//! | `Reserved`, `Nvs`, `Bad` | reserved | `ReservedAndNoInit` |
//!
//! Available RAM is trimmed inwards to whole frames. Reservations are applied
//! after all RAM so that a reservation always wins over an overlapping
//! available entry, whatever the firmware's ordering.

use crate::bootmem::{BootMem, RegionType};
use crate::error::{PmmError, Status};
use crate::phys_mapper::PhysMapper;
use kernel_info::memory::LEGACY_LOW_MEMORY_END;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};
use log::{debug, info, warn};

/// Firmware classification of a physical range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FirmwareRegionKind {
    /// Usable RAM.
    Available,
    /// Never usable.
    Reserved,
    /// RAM holding ACPI tables; usable once they were parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    Nvs,
    /// Defective memory.
    Bad,
}

/// One entry of the firmware memory map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareEntry {
    pub base: PhysicalAddress,
    pub size: u64,
    pub kind: FirmwareRegionKind,
}

impl FirmwareEntry {
    #[must_use]
    pub const fn new(base: u64, size: u64, kind: FirmwareRegionKind) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            size,
            kind,
        }
    }
}

/// What [`ingest_firmware_map`] did with the entries.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Bytes registered as RAM (after trimming to frames).
    pub available_bytes: u64,
    /// Bytes recorded as reserved.
    pub reserved_bytes: u64,
    /// Entries fully covered by earlier ones.
    pub duplicates: usize,
    /// Empty, overflowing or sub-frame entries.
    pub malformed: usize,
}

/// Registers the firmware memory map with the boot allocator.
///
/// # Errors
/// [`PmmError::OutOfMemory`] if a region table could not grow. Malformed and
/// duplicate entries are counted and skipped.
pub fn ingest_firmware_map<M: PhysMapper>(
    bootmem: &mut BootMem<'_, M>,
    entries: &[FirmwareEntry],
) -> Status<IngestSummary> {
    let mut summary = IngestSummary::default();

    for e in entries.iter().filter(|e| e.kind == FirmwareRegionKind::Available) {
        let Some((base, end)) = frame_range(e) else {
            warn!("firmware: skipping malformed RAM entry {e:?}");
            summary.malformed += 1;
            continue;
        };

        let low = PhysicalAddress::new(LEGACY_LOW_MEMORY_END);
        let split = low.clamp(base, end);
        for (lo, hi, kind) in [(base, split, RegionType::Unused), (split, end, RegionType::Normal)] {
            if lo >= hi {
                continue;
            }
            match bootmem.add(lo, hi - lo, kind, 0) {
                Ok(()) => summary.available_bytes += hi - lo,
                Err(PmmError::AlreadyExisting) => summary.duplicates += 1,
                Err(PmmError::InvalidRange) => summary.malformed += 1,
                Err(err) => return Err(err),
            }
        }
    }

    for e in entries.iter().filter(|e| e.kind != FirmwareRegionKind::Available) {
        if e.size == 0 || e.base.checked_add(e.size).is_none() {
            warn!("firmware: skipping malformed reserved entry {e:?}");
            summary.malformed += 1;
            continue;
        }
        let kind = match e.kind {
            FirmwareRegionKind::AcpiReclaimable => RegionType::Reserved,
            _ => RegionType::ReservedAndNoInit,
        };
        match bootmem.protect(e.base, e.size, kind) {
            Ok(()) => summary.reserved_bytes += e.size,
            Err(PmmError::AlreadyExisting) => summary.duplicates += 1,
            Err(PmmError::InvalidRange) => summary.malformed += 1,
            Err(err) => return Err(err),
        }
    }

    if summary.duplicates > 0 {
        debug!("firmware: {} duplicate entries", summary.duplicates);
    }
    info!(
        "firmware: {} entries, {:#x} bytes of RAM, {:#x} bytes reserved",
        entries.len(),
        summary.available_bytes,
        summary.reserved_bytes
    );
    Ok(summary)
}

/// `[base, end)` of `e` shrunk to whole frames, or `None` if nothing remains.
fn frame_range(e: &FirmwareEntry) -> Option<(PhysicalAddress, PhysicalAddress)> {
    if e.size == 0 {
        return None;
    }
    let end = e.base.checked_add(e.size)?.align_down(FRAME_SIZE);
    let base = e.base.checked_align_up(FRAME_SIZE)?;
    (base < end).then_some((base, end))
}
