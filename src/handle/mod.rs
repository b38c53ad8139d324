//! The type-erased handle and its diagnostics.

mod owned;

use core::alloc::Layout;

use anyhandle_internals::TypeDescriptor;

pub use self::owned::AnyHandle;

/// A copy of the bookkeeping of one payload, taken by
/// [`AnyHandle::debug_snapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSnapshot {
    /// The runtime type tag of the payload.
    pub descriptor: TypeDescriptor,
    /// Size and alignment of the payload.
    pub layout: Layout,
    /// Live strong references: handle clones plus live views.
    pub handle_count: usize,
    /// Live shared views.
    pub shared_count: usize,
    /// Live exclusive views, `0` or `1`.
    pub exclusive_count: usize,
}

impl core::fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} [size {}, align {}] handles: {}, shared: {}, exclusive: {}",
            self.descriptor,
            self.layout.size(),
            self.layout.align(),
            self.handle_count,
            self.shared_count,
            self.exclusive_count
        )
    }
}
