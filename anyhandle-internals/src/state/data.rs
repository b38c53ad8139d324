//! This module encapsulates the fields of the [`SharedState`]. Since this is
//! the only place they are visible, the payload pointer, its layout and the
//! destructor are guaranteed to stay in sync: they are paired when the state
//! is created and the API offers no way to change any of them afterwards.

use core::{alloc::Layout, ffi::c_void, ptr::NonNull};

use crate::{
    descriptor::{Destructor, TypeDescriptor},
    state::borrow::{BorrowFlag, BorrowState},
};

/// The heap record shared by all clones of one handle.
///
/// A [`SharedState`] always lives inside a [`triomphe::Arc`]. The strong count
/// of that `Arc` is the handle count: one per live [`RawHandle`] plus one per
/// live borrow token. When it reaches zero the `Arc` drops the state, which
/// runs the destructor and frees the payload.
///
/// [`RawHandle`]: crate::RawHandle
pub(crate) struct SharedState {
    /// Pointer to the payload allocation.
    ///
    /// # Safety
    ///
    /// The following safety invariants are guaranteed to be upheld as long as
    /// this struct exists:
    ///
    /// 1. If `layout.size() > 0`, the pointer was returned by the global
    ///    allocator for `layout`.
    /// 2. If `layout.size() == 0`, the pointer is dangling but aligned to
    ///    `layout.align()`.
    /// 3. The pointee is a value that `destructor` can drop, and it has not
    ///    been dropped yet.
    payload: NonNull<u8>,
    /// Size and alignment of the payload.
    layout: Layout,
    /// Runtime type tag of the payload.
    descriptor: TypeDescriptor,
    /// Drops the payload in place.
    destructor: Destructor,
    /// Shared and exclusive borrow bookkeeping.
    borrow: BorrowFlag,
}

impl SharedState {
    /// Creates a new unborrowed [`SharedState`] that owns `payload`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `payload` satisfies the invariants documented on the `payload` field
    ///    for the given `layout` and `destructor`.
    /// 2. Ownership of the payload and its allocation is transferred to the
    ///    returned state: nothing else drops or frees them.
    #[inline]
    pub(super) unsafe fn new(
        payload: NonNull<u8>,
        layout: Layout,
        descriptor: TypeDescriptor,
        destructor: Destructor,
    ) -> Self {
        Self {
            // SAFETY: Guaranteed by the caller.
            payload,
            layout,
            descriptor,
            destructor,
            borrow: BorrowFlag::new(),
        }
    }

    /// Returns the payload pointer.
    #[inline]
    pub(super) fn payload(&self) -> NonNull<u8> {
        self.payload
    }

    /// Returns the layout of the payload.
    #[inline]
    pub(super) fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns the type tag of the payload.
    #[inline]
    pub(super) fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Returns the borrow flag.
    #[inline]
    pub(super) fn borrow(&self) -> &BorrowFlag {
        &self.borrow
    }

    /// Returns the current borrow state.
    #[inline]
    pub(super) fn borrow_state(&self) -> BorrowState {
        self.borrow.state()
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            type_name = self.descriptor.type_name(),
            type_id = self.descriptor.type_id(),
            "destroying payload"
        );

        debug_assert!(
            self.borrow.state().is_unborrowed(),
            "payload destroyed while a view is alive"
        );

        (self.destructor)(self.payload.as_ptr().cast::<c_void>());

        if self.layout.size() != 0 {
            // SAFETY:
            // 1. The payload was allocated by the global allocator with `self.layout`
            //    (invariant 1 on the `payload` field).
            // 2. The destructor has just dropped the value and nothing else refers to
            //    the allocation, since the last strong reference is going away.
            unsafe {
                alloc::alloc::dealloc(self.payload.as_ptr(), self.layout);
            }
        }
    }
}

/// Allocates uninitialized memory for a payload with the given layout.
///
/// Zero-sized layouts get a dangling pointer aligned to `layout.align()`.
/// Allocation failure aborts through [`alloc::alloc::handle_alloc_error`].
pub(super) fn allocate(layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        let dangling: *mut u8 = core::ptr::without_provenance_mut(layout.align());
        return match NonNull::new(dangling) {
            Some(ptr) => ptr,
            None => alloc::alloc::handle_alloc_error(layout),
        };
    }

    // SAFETY: The layout has a non-zero size.
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    NonNull::new(ptr).unwrap_or_else(|| alloc::alloc::handle_alloc_error(layout))
}
