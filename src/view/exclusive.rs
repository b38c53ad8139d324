use core::ops::{Deref, DerefMut};

use crate::{
    AnyHandle, SharedView,
    markers::{Local, SendSync},
};

/// FIXME: Once rust-lang/rust#132922 gets resolved, we can make the `raw` field
/// an unsafe field and remove this module.
mod limit_field_access {
    use core::marker::PhantomData;

    use anyhandle_internals::RawExclusive;

    use crate::markers::SendSync;

    /// A read-write, typed view of the payload of an
    /// [`AnyHandle`](crate::AnyHandle).
    ///
    /// Obtained from [`AnyHandle::try_borrow_exclusive`] or
    /// [`AnyHandle::borrow_exclusive`]. While it exists, no other view of the
    /// payload can be created through any clone of the handle.
    ///
    /// Like [`SharedView`](crate::SharedView), the view keeps the payload
    /// alive on its own. The borrow ends when the view is dropped,
    /// [released](Self::release) or [downgraded](Self::downgrade).
    ///
    /// [`AnyHandle::try_borrow_exclusive`]: crate::AnyHandle::try_borrow_exclusive
    /// [`AnyHandle::borrow_exclusive`]: crate::AnyHandle::borrow_exclusive
    pub struct ExclusiveView<P: 'static, ThreadSafety: 'static = SendSync> {
        /// # Safety
        ///
        /// The following safety invariants are guaranteed to be upheld as long
        /// as this struct exists:
        ///
        /// 1. The payload is of type `P`.
        /// 2. `T` must either be `SendSync` or `Local`.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        raw: RawExclusive,
        _payload: PhantomData<P>,
        _thread_safety: PhantomData<ThreadSafety>,
    }

    impl<P, T> ExclusiveView<P, T> {
        /// Creates a new [`ExclusiveView`] from a [`RawExclusive`] token.
        ///
        /// # Safety
        ///
        /// The caller must ensure:
        ///
        /// 1. The payload is of type `P`.
        /// 2. `T` must either be `SendSync` or `Local`.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        #[must_use]
        pub(crate) unsafe fn from_raw(raw: RawExclusive) -> Self {
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

        /// Returns a reference to the inner [`RawExclusive`] token.
        #[must_use]
        pub(crate) fn as_raw(&self) -> &RawExclusive {
            &self.raw
        }

        /// Returns a mutable reference to the inner [`RawExclusive`] token.
        #[must_use]
        pub(crate) fn as_raw_mut(&mut self) -> &mut RawExclusive {
            // SAFETY: The token cannot be replaced or have its type changed through
            // this reference, so all invariants stay upheld.
            &mut self.raw
        }

        /// Consumes the view and returns the inner [`RawExclusive`] token.
        #[must_use]
        pub(crate) fn into_raw(self) -> RawExclusive {
            // SAFETY: We are destroying `self`, so we no longer
            // need to uphold any safety invariants.
            self.raw
        }
    }
}

pub use limit_field_access::ExclusiveView;

impl<P, T> ExclusiveView<P, T> {
    /// Ends the borrow.
    ///
    /// This is the same as dropping the view. If the view held the last
    /// strong reference, the payload is destroyed before this returns.
    #[inline]
    pub fn release(self) {
        core::mem::drop(self.into_raw());
    }

    /// Turns this view into a [`SharedView`] without ever leaving the payload
    /// unborrowed, so no other exclusive view can be created in between.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhandle::AnyHandle;
    ///
    /// let handle = AnyHandle::new(vec![1]);
    /// let mut exclusive = handle.try_borrow_exclusive::<Vec<i32>>().unwrap();
    /// exclusive.push(2);
    ///
    /// let shared = exclusive.downgrade();
    /// assert_eq!(*shared, [1, 2]);
    /// assert!(handle.try_borrow_exclusive::<Vec<i32>>().is_none());
    /// assert!(handle.try_borrow_shared::<Vec<i32>>().is_some());
    /// ```
    #[must_use]
    pub fn downgrade(self) -> SharedView<P, T> {
        let raw = self.into_raw().downgrade();

        // SAFETY:
        // 1. The payload is the one of `self`, which is of type `P`.
        // 2. The marker is carried over from `self`.
        // 3. The marker is carried over from `self`.
        unsafe { SharedView::from_raw(raw) }
    }

    /// Returns a new handle to the payload, incrementing the handle count.
    ///
    /// The new handle cannot be downcast while this view exists.
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
    pub fn into_local(self) -> ExclusiveView<P, Local> {
        let raw = self.into_raw();

        // SAFETY:
        // 1. This is guaranteed by the invariants of this type.
        // 2. `T=Local`.
        // 3. `T=Local`, so this is trivially true.
        unsafe { ExclusiveView::from_raw(raw) }
    }
}

impl<P, T> Deref for ExclusiveView<P, T> {
    type Target = P;

    fn deref(&self) -> &P {
        // SAFETY:
        // 1. The payload is of type `P` (invariant 1).
        unsafe { self.as_raw().downcast_unchecked::<P>() }
    }
}

impl<P, T> DerefMut for ExclusiveView<P, T> {
    fn deref_mut(&mut self) -> &mut P {
        // SAFETY:
        // 1. The payload is of type `P` (invariant 1).
        unsafe { self.as_raw_mut().downcast_mut_unchecked::<P>() }
    }
}

impl<P: core::fmt::Debug, T> core::fmt::Debug for ExclusiveView<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&**self, f)
    }
}

impl<P: core::fmt::Display, T> core::fmt::Display for ExclusiveView<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&**self, f)
    }
}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and the borrow bookkeeping is atomic. Therefore the view can be sent to and
// shared with other threads.
unsafe impl<P> Send for ExclusiveView<P, SendSync> {}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and the borrow bookkeeping is atomic. Therefore the view can be sent to and
// shared with other threads.
unsafe impl<P> Sync for ExclusiveView<P, SendSync> {}

impl<P, T> Unpin for ExclusiveView<P, T> {}

impl<P> From<ExclusiveView<P, SendSync>> for ExclusiveView<P, Local> {
    fn from(view: ExclusiveView<P, SendSync>) -> Self {
        view.into_local()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test]
    fn test_exclusive_view_send_sync() {
        static_assertions::assert_impl_all!(ExclusiveView<String, SendSync>: Send, Sync);
        static_assertions::assert_not_impl_any!(ExclusiveView<String, Local>: Send, Sync);
        static_assertions::assert_not_impl_any!(ExclusiveView<String, SendSync>: Clone, Copy);
    }

    #[test]
    fn test_mutation_is_visible_after_release() {
        let handle = AnyHandle::new(String::from("a"));

        let mut view = handle.try_borrow_exclusive::<String>().unwrap();
        view.push('b');
        assert!(handle.try_borrow_shared::<String>().is_none());
        view.release();

        assert_eq!(&*handle.try_borrow_shared::<String>().unwrap(), "ab");
    }

    #[test]
    fn test_to_handle_is_blocked_while_borrowed() {
        let handle = AnyHandle::new(0u8);
        let view = handle.try_borrow_exclusive::<u8>().unwrap();
        let other = view.to_handle();
        assert_eq!(other.borrow_state().exclusive_count(), 1);
        assert!(other.try_borrow_shared::<u8>().is_none());
        drop(view);
        assert!(other.try_borrow_shared::<u8>().is_some());
    }
}
