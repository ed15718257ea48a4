//! Error taxonomy shared by every layer of the memory core.

/// Failure of a memory-core operation.
///
/// Exhaustion is an ordinary, recoverable condition and always surfaces as
/// [`PmmError::OutOfMemory`] (or `None` for the single-frame paths). Corrupted
/// allocator state is never reported through this type; it is fatal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    /// No fitting region or frame block is available.
    #[error("out of memory")]
    OutOfMemory,
    /// Zero size, misaligned request or an order beyond the maximum.
    #[error("invalid arguments")]
    InvalidArguments,
    /// Empty, overflowing or non-overlapping range.
    #[error("invalid range")]
    InvalidRange,
    /// The range is already fully registered.
    #[error("range already exists")]
    AlreadyExisting,
    /// Not available on this configuration (e.g. no NUMA data).
    #[error("unsupported operation")]
    Unsupported,
}

/// Result of a memory-core operation; `Ok(())` is the success status.
pub type Status<T = ()> = Result<T, PmmError>;
