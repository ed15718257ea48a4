use core::fmt;
use core::ops::{Deref, DerefMut};

/// Cache line size assumed for padding.
pub const CACHE_LINE_SIZE: usize = 64;

/// Pads and aligns a value to a full cache line.
///
/// Per-CPU slots stored back to back in an array would otherwise share lines
/// and bounce between CPUs on every write.
#[repr(C, align(64))]
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct CachePadded<T> {
    value: T,
}

const _: () = assert!(align_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);

impl<T> CachePadded<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachePadded").field(&self.value).finish()
    }
}

impl<T> From<T> for CachePadded<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
