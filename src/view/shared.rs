use core::ops::Deref;

use crate::{
    AnyHandle,
    markers::{Local, SendSync},
};

/// FIXME: Once rust-lang/rust#132922 gets resolved, we can make the `raw` field
/// an unsafe field and remove this module.
mod limit_field_access {
    use core::marker::PhantomData;

    use anyhandle_internals::RawShared;

    use crate::markers::SendSync;

    /// A read-only, typed view of the payload of an
    /// [`AnyHandle`](crate::AnyHandle).
    ///
    /// Obtained from [`AnyHandle::try_borrow_shared`] or
    /// [`AnyHandle::borrow_shared`]. Any number of shared views may exist at
    /// the same time; while one does, no
    /// [`ExclusiveView`](crate::ExclusiveView) can be created.
    ///
    /// The view keeps the payload alive on its own: dropping every handle
    /// while the view exists does not destroy the payload. The borrow ends
    /// when the view is dropped or [released](Self::release).
    ///
    /// [`AnyHandle::try_borrow_shared`]: crate::AnyHandle::try_borrow_shared
    /// [`AnyHandle::borrow_shared`]: crate::AnyHandle::borrow_shared
    pub struct SharedView<P: 'static, ThreadSafety: 'static = SendSync> {
        /// # Safety
        ///
        /// The following safety invariants are guaranteed to be upheld as long
        /// as this struct exists:
        ///
        /// 1. The payload is of type `P`.
        /// 2. `T` must either be `SendSync` or `Local`.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        raw: RawShared,
        _payload: PhantomData<P>,
        _thread_safety: PhantomData<ThreadSafety>,
    }

    impl<P, T> SharedView<P, T> {
        /// Creates a new [`SharedView`] from a [`RawShared`] token.
        ///
        /// # Safety
        ///
        /// The caller must ensure:
        ///
        /// 1. The payload is of type `P`.
        /// 2. `T` must either be `SendSync` or `Local`.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        #[must_use]
        pub(crate) unsafe fn from_raw(raw: RawShared) -> Self {
            // SAFETY: We must uphold the safety invariants of the raw field:
            // 1. Guaranteed by the caller
            // 2. Guaranteed by the caller
            // 3. Guaranteed by the caller
            Self {
                raw,
                _payload: PhantomData,
                _thread_safety: PhantomData,
            }
        }

        /// Returns a reference to the inner [`RawShared`] token.
        #[must_use]
        pub(crate) fn as_raw(&self) -> &RawShared {
            &self.raw
        }

        /// Consumes the view and returns the inner [`RawShared`] token.
        #[must_use]
        pub(crate) fn into_raw(self) -> RawShared {
            // SAFETY: We are destroying `self`, so we no longer
            // need to uphold any safety invariants.
            self.raw
        }
    }
}

pub use limit_field_access::SharedView;

impl<P, T> SharedView<P, T> {
    /// Ends the borrow.
    ///
    /// This is the same as dropping the view. If the view held the last
    /// strong reference, the payload is destroyed before this returns.
    #[inline]
    pub fn release(self) {
        core::mem::drop(self.into_raw());
    }

    /// Returns a new handle to the payload, incrementing the handle count.
    #[must_use]
    pub fn to_handle(&self) -> AnyHandle<T> {
        let raw = self.as_raw().handle().clone_handle();

        // SAFETY:
        // 1. Guaranteed by invariant 2 of this type.
        // 2. The handle was just created.
        // 3. Guaranteed by invariant 3 of this type.
        unsafe { AnyHandle::from_raw_unchecked(raw) }
    }

    /// Converts this view into one that is not `Send` or `Sync`.
    #[must_use]
    pub fn into_local(self) -> SharedView<P, Local> {
        let raw = self.into_raw();

        // SAFETY:
        // 1. This is guaranteed by the invariants of this type.
        // 2. `T=Local`.
        // 3. `T=Local`, so this is trivially true.
        unsafe { SharedView::from_raw(raw) }
    }
}

impl<P, T> Deref for SharedView<P, T> {
    type Target = P;

    fn deref(&self) -> &P {
        // SAFETY:
        // 1. The payload is of type `P` (invariant 1).
        unsafe { self.as_raw().downcast_unchecked::<P>() }
    }
}

impl<P, T> Clone for SharedView<P, T> {
    /// Acquires another shared borrow of the same payload.
    fn clone(&self) -> Self {
        let raw = match self.as_raw().try_clone() {
            Ok(raw) => raw,
            // Every shared borrow also holds a strong reference, and the strong
            // count aborts the process long before the shared count can overflow.
            Err(_) => unreachable!("shared borrow count overflowed"),
        };

        // SAFETY:
        // 1. The payload is shared with `self`.
        // 2. The marker is carried over from `self`.
        // 3. The payload is shared with `self`.
        unsafe { SharedView::from_raw(raw) }
    }
}

impl<P: core::fmt::Debug, T> core::fmt::Debug for SharedView<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&**self, f)
    }
}

impl<P: core::fmt::Display, T> core::fmt::Display for SharedView<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&**self, f)
    }
}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and the borrow bookkeeping is atomic. Therefore the view can be sent to and
// shared with other threads.
unsafe impl<P> Send for SharedView<P, SendSync> {}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and the borrow bookkeeping is atomic. Therefore the view can be sent to and
// shared with other threads.
unsafe impl<P> Sync for SharedView<P, SendSync> {}

impl<P, T> Unpin for SharedView<P, T> {}

impl<P> From<SharedView<P, SendSync>> for SharedView<P, Local> {
    fn from(view: SharedView<P, SendSync>) -> Self {
        view.into_local()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test]
    fn test_shared_view_send_sync() {
        static_assertions::assert_impl_all!(SharedView<String, SendSync>: Send, Sync, Clone);
        static_assertions::assert_not_impl_any!(SharedView<String, Local>: Send, Sync);
        static_assertions::assert_not_impl_any!(SharedView<String, SendSync>: Copy);
    }

    #[test]
    fn test_clone_and_release() {
        let handle = AnyHandle::new(String::from("text"));
        let view = handle.try_borrow_shared::<String>().unwrap();
        let copy = view.clone();

        assert_eq!(handle.borrow_state().shared_count(), 2);
        assert_eq!(handle.handle_count(), 3);
        assert_eq!(&*copy, "text");

        view.release();
        copy.release();
        assert!(handle.borrow_state().is_unborrowed());
        assert_eq!(handle.handle_count(), 1);
    }

    #[test]
    fn test_to_handle() {
        let handle = AnyHandle::new(1u32);
        let view = handle.try_borrow_shared::<u32>().unwrap();
        let other = view.to_handle();
        assert!(other.ptr_eq(&handle));
        assert!(other.try_borrow_shared::<u32>().is_some());
        assert!(other.try_borrow_exclusive::<u32>().is_none());
    }
}
