use core::{alloc::Layout, ffi::c_void};

use anyhandle_internals::{BorrowState, Destructor, RawHandle, TypeDescriptor};

use crate::{
    ExclusiveView, SharedView,
    error::{BorrowKind, DowncastError},
    handle::StateSnapshot,
    markers::{self, Local, SendSync},
    registry,
};

/// FIXME: Once rust-lang/rust#132922 gets resolved, we can make the `raw` field
/// an unsafe field and remove this module.
mod limit_field_access {
    use core::marker::PhantomData;

    use anyhandle_internals::{RawHandle, RawHandleRef};

    use crate::markers::SendSync;

    /// A type-erased, reference-counted handle to a payload.
    ///
    /// [`AnyHandle`] boxes a value of any `'static` type, forgets its static
    /// type and remembers it at runtime as a
    /// [`TypeDescriptor`](crate::TypeDescriptor) instead. Clones are cheap and
    /// interchangeable: they all refer to the same payload, and the payload is
    /// destroyed exactly once, when the last clone and the last view are gone.
    ///
    /// To access the payload, downcast the handle into a read-only
    /// [`SharedView`](crate::SharedView) or a read-write
    /// [`ExclusiveView`](crate::ExclusiveView). The "many readers or one
    /// writer" rule is checked at runtime: a downcast that would break it fails
    /// immediately instead of blocking.
    ///
    /// # Thread Safety
    ///
    /// - [`SendSync`] (default): the payload is `Send + Sync`, and so are the
    ///   handle and its views.
    /// - [`Local`](crate::markers::Local): any `'static` payload; the handle
    ///   cannot leave its thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhandle::AnyHandle;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Counter {
    ///     value: u32,
    /// }
    ///
    /// let handle = AnyHandle::new(Counter { value: 0 });
    /// let for_callback = handle.clone();
    ///
    /// {
    ///     let mut counter = for_callback.try_borrow_exclusive::<Counter>().unwrap();
    ///     counter.value += 1;
    /// }
    ///
    /// assert!(handle.try_borrow_shared::<String>().is_none());
    /// assert_eq!(handle.try_borrow_shared::<Counter>().unwrap().value, 1);
    /// ```
    #[repr(transparent)]
    pub struct AnyHandle<ThreadSafety: 'static = SendSync> {
        /// # Safety
        ///
        /// The following safety invariants are guaranteed to be upheld as long
        /// as this struct exists:
        ///
        /// 1. `T` must either be `SendSync` or `Local`.
        /// 2. The raw handle is not dead.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        raw: RawHandle,
        _thread_safety: PhantomData<ThreadSafety>,
    }

    impl<T> AnyHandle<T> {
        /// Creates a new [`AnyHandle`] from a [`RawHandle`]
        ///
        /// # Safety
        ///
        /// The caller must ensure:
        ///
        /// 1. `T` must either be `SendSync` or `Local`.
        /// 2. The raw handle is not dead.
        /// 3. If `T = SendSync`: The payload is `Send + Sync`.
        #[must_use]
        pub(crate) unsafe fn from_raw_unchecked(raw: RawHandle) -> Self {
            // SAFETY: We must uphold the safety invariants of the raw field:
            // 1. Guaranteed by the caller
            // 2. Guaranteed by the caller
            // 3. Guaranteed by the caller
            Self {
                raw,
                _thread_safety: PhantomData,
            }
        }

        /// Consumes the [`AnyHandle`] and returns the inner [`RawHandle`].
        #[must_use]
        pub(crate) fn into_raw_handle(self) -> RawHandle {
            // SAFETY: We are destroying `self`, so we no longer
            // need to uphold any safety invariants.
            self.raw
        }

        /// Creates a lifetime-bound [`RawHandleRef`] from the inner
        /// [`RawHandle`].
        #[must_use]
        pub(crate) fn as_raw_ref(&self) -> RawHandleRef<'_> {
            match self.raw.get() {
                Some(raw) => raw,
                None => {
                    if cfg!(debug_assertions) {
                        unreachable!("AnyHandle wraps a dead RawHandle")
                    } else {
                        // SAFETY: Invariant 2 guarantees that the raw handle is not dead, so
                        // this branch cannot be reached.
                        unsafe { core::hint::unreachable_unchecked() }
                    }
                }
            }
        }
    }
}

pub use limit_field_access::AnyHandle;

impl AnyHandle<SendSync> {
    /// Creates a new thread-safe handle that owns `value`.
    ///
    /// The type of `value` is registered in the [`registry`] on first use.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhandle::AnyHandle;
    ///
    /// let handle = AnyHandle::new(42u32);
    /// assert!(handle.is::<u32>());
    /// assert_eq!(handle.handle_count(), 1);
    /// ```
    #[must_use]
    pub fn new<P>(value: P) -> Self
    where
        P: markers::ObjectMarkerFor<SendSync>,
    {
        Self::from_value(value)
    }
}

impl AnyHandle<Local> {
    /// Creates a new handle that owns `value`, which need not be thread-safe.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::rc::Rc;
    ///
    /// use anyhandle::{AnyHandle, markers::Local};
    ///
    /// let handle: AnyHandle<Local> = AnyHandle::new_local(Rc::new("shared"));
    /// assert!(handle.is::<Rc<&str>>());
    /// ```
    #[must_use]
    pub fn new_local<P>(value: P) -> Self
    where
        P: markers::ObjectMarkerFor<Local>,
    {
        Self::from_value(value)
    }
}

impl<T> AnyHandle<T> {
    /// Creates a new handle that owns `value`, inferring the thread-safety
    /// marker from the call site.
    #[must_use]
    pub fn from_value<P>(value: P) -> Self
    where
        P: markers::ObjectMarkerFor<T>,
        T: markers::ThreadSafetyMarker,
    {
        let raw = RawHandle::new(value, registry::descriptor_of::<P>());

        // SAFETY:
        // 1. `T: ThreadSafetyMarker` is only implemented for `SendSync` and `Local`.
        // 2. The handle was just created.
        // 3. If `T = SendSync`, `P: ObjectMarkerFor<SendSync>` implies `P: Send + Sync`.
        unsafe { Self::from_raw_unchecked(raw) }
    }

    /// Creates a new handle by copying a payload described only by its
    /// layout.
    ///
    /// The `layout.size()` bytes at `payload` are copied into a new
    /// allocation; the copy becomes the payload and the original must be
    /// treated as moved-from. `destructor` runs exactly once on the copy when
    /// the last reference is released. This is how payloads that have no Rust
    /// type (for example ones built across the C boundary) enter a handle.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. If `layout.size() > 0`, `payload` is valid for reads of
    ///    `layout.size()` bytes.
    /// 2. The bytes form a value that `destructor` can drop in place, and the
    ///    value stays valid when moved to another address.
    /// 3. The caller does not drop the original value afterwards.
    /// 4. The `descriptor` uniquely identifies the type of the value. If it
    ///    records a Rust type ([`TypeDescriptor::rust_type`]), the value is of
    ///    that type.
    /// 5. If `T = SendSync`: The value is `Send + Sync`.
    #[must_use]
    pub unsafe fn adopt(
        payload: *const c_void,
        layout: Layout,
        descriptor: TypeDescriptor,
        destructor: Destructor,
    ) -> Self
    where
        T: markers::ThreadSafetyMarker,
    {
        // SAFETY: Requirements 1-4 are guaranteed by the caller.
        let raw = unsafe { RawHandle::adopt(payload, layout, descriptor, destructor) };

        // SAFETY:
        // 1. `T: ThreadSafetyMarker` is only implemented for `SendSync` and `Local`.
        // 2. The handle was just created.
        // 3. Guaranteed by the caller.
        unsafe { Self::from_raw_unchecked(raw) }
    }

    /// Wraps a [`RawHandle`], typically one that crossed the C boundary.
    ///
    /// Returns `None` if the raw handle is dead.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. If `T = SendSync`: The payload is `Send + Sync`.
    /// 2. If the descriptor of the payload records a Rust type
    ///    ([`TypeDescriptor::rust_type`]), the payload is of that type.
    #[must_use]
    pub unsafe fn from_raw(raw: RawHandle) -> Option<Self>
    where
        T: markers::ThreadSafetyMarker,
    {
        if raw.is_dead() {
            return None;
        }

        // SAFETY:
        // 1. `T: ThreadSafetyMarker` is only implemented for `SendSync` and `Local`.
        // 2. Checked above.
        // 3. Guaranteed by the caller.
        Some(unsafe { Self::from_raw_unchecked(raw) })
    }

    /// Converts the handle into a [`RawHandle`] that can cross the C
    /// boundary. The handle count is unchanged.
    #[must_use]
    pub fn into_raw(self) -> RawHandle {
        self.into_raw_handle()
    }

    /// Returns the runtime type tag of the payload.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &TypeDescriptor {
        self.as_raw_ref().descriptor()
    }

    /// Returns the type id of the payload.
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> u64 {
        self.as_raw_ref().type_id()
    }

    /// Returns the type name of the payload.
    ///
    /// This works regardless of the borrow state.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.as_raw_ref().type_name()
    }

    /// Returns `true` if the payload is tagged with `type_id`.
    #[inline]
    #[must_use]
    pub fn is_type(&self, type_id: u64) -> bool {
        self.as_raw_ref().is_type(type_id)
    }

    /// Returns `true` if the payload is a `P`.
    ///
    /// Compares the [`TypeId`](core::any::TypeId) recorded when the handle was
    /// created, so it never blocks. Payloads created from foreign bytes are
    /// never a Rust type, even if they reuse a Rust type's id.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhandle::AnyHandle;
    ///
    /// let handle = AnyHandle::new(String::from("hi"));
    /// assert!(handle.is::<String>());
    /// assert!(!handle.is::<&str>());
    /// ```
    #[inline]
    #[must_use]
    pub fn is<P: 'static>(&self) -> bool {
        self.descriptor().is_rust_type::<P>()
    }

    /// Returns the number of live strong references to the payload: handle
    /// clones plus live views.
    #[inline]
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.as_raw_ref().handle_count()
    }

    /// Returns `true` if this handle is the only reference to the payload and
    /// no view exists.
    #[inline]
    #[must_use]
    pub fn has_no_copies(&self) -> bool {
        let raw = self.as_raw_ref();
        raw.handle_count() == 1 && raw.borrow_state().is_unborrowed()
    }

    /// Returns the current borrow state of the payload.
    #[inline]
    #[must_use]
    pub fn borrow_state(&self) -> BorrowState {
        self.as_raw_ref().borrow_state()
    }

    /// Returns a snapshot of the bookkeeping of the payload, for diagnostics.
    ///
    /// The counters are read one after the other, so under concurrent use the
    /// snapshot may not correspond to a single point in time.
    #[must_use]
    pub fn debug_snapshot(&self) -> StateSnapshot {
        let raw = self.as_raw_ref();
        let borrow_state = raw.borrow_state();
        StateSnapshot {
            descriptor: raw.descriptor().clone(),
            layout: raw.layout(),
            handle_count: raw.handle_count(),
            shared_count: borrow_state.shared_count(),
            exclusive_count: borrow_state.exclusive_count(),
        }
    }

    /// Returns the raw payload pointer.
    ///
    /// Reading or writing through it is only sound while holding a matching
    /// view, and only as the stored type.
    #[inline]
    #[must_use]
    pub fn data_ptr(&self) -> *const c_void {
        self.as_raw_ref().data_ptr()
    }

    /// Returns `true` if both handles refer to the same payload.
    #[inline]
    #[must_use]
    pub fn ptr_eq<U>(&self, other: &AnyHandle<U>) -> bool {
        self.as_raw_ref().ptr_eq(other.as_raw_ref())
    }

    /// Downcasts into a read-only view of the payload.
    ///
    /// Fails with [`DowncastError::TypeMismatch`] if the payload is not a `P`,
    /// and with [`DowncastError::BorrowConflict`] if an exclusive view exists.
    /// The borrow check and the acquisition are one atomic step.
    pub fn borrow_shared<P: 'static>(&self) -> Result<SharedView<P, T>, DowncastError> {
        self.check_type::<P>(BorrowKind::Shared)?;
        let raw = self.as_raw_ref();

        let token = raw.try_borrow_shared().map_err(|state| {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                type_name = raw.type_name(),
                ?state,
                "shared downcast refused"
            );
            DowncastError::BorrowConflict {
                requested: BorrowKind::Shared,
                state,
            }
        })?;

        // SAFETY:
        // 1. The type of the payload is `P`, checked above.
        // 2. The thread-safety marker is carried over from `self`.
        Ok(unsafe { SharedView::from_raw(token) })
    }

    /// Downcasts into a read-write view of the payload.
    ///
    /// Fails with [`DowncastError::TypeMismatch`] if the payload is not a `P`,
    /// and with [`DowncastError::BorrowConflict`] if any view exists. The
    /// borrow check and the acquisition are one atomic step.
    pub fn borrow_exclusive<P: 'static>(&self) -> Result<ExclusiveView<P, T>, DowncastError> {
        self.check_type::<P>(BorrowKind::Exclusive)?;
        let raw = self.as_raw_ref();

        let token = raw.try_borrow_exclusive().map_err(|state| {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                type_name = raw.type_name(),
                ?state,
                "exclusive downcast refused"
            );
            DowncastError::BorrowConflict {
                requested: BorrowKind::Exclusive,
                state,
            }
        })?;

        // SAFETY:
        // 1. The type of the payload is `P`, checked above.
        // 2. The thread-safety marker is carried over from `self`.
        Ok(unsafe { ExclusiveView::from_raw(token) })
    }

    /// Downcasts into a read-only view of the payload, or returns `None` if
    /// the payload is not a `P` or is exclusively borrowed.
    #[inline]
    #[must_use]
    pub fn try_borrow_shared<P: 'static>(&self) -> Option<SharedView<P, T>> {
        if !self.is::<P>() {
            return None;
        }
        let token = self.as_raw_ref().try_borrow_shared().ok()?;

        // SAFETY:
        // 1. The type of the payload is `P`, checked above.
        // 2. The thread-safety marker is carried over from `self`.
        Some(unsafe { SharedView::from_raw(token) })
    }

    /// Downcasts into a read-write view of the payload, or returns `None` if
    /// the payload is not a `P` or any view exists.
    #[inline]
    #[must_use]
    pub fn try_borrow_exclusive<P: 'static>(&self) -> Option<ExclusiveView<P, T>> {
        if !self.is::<P>() {
            return None;
        }
        let token = self.as_raw_ref().try_borrow_exclusive().ok()?;

        // SAFETY:
        // 1. The type of the payload is `P`, checked above.
        // 2. The thread-safety marker is carried over from `self`.
        Some(unsafe { ExclusiveView::from_raw(token) })
    }

    /// Checks that the payload is a `P`.
    fn check_type<P: 'static>(&self, requested: BorrowKind) -> Result<(), DowncastError> {
        if self.is::<P>() {
            return Ok(());
        }

        let expected = core::any::type_name::<P>();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            expected,
            found = self.type_name(),
            %requested,
            "downcast type mismatch"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = requested;

        Err(DowncastError::TypeMismatch {
            expected,
            found: self.descriptor().clone(),
        })
    }

    /// Converts this handle into one that is not `Send` or `Sync`.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhandle::{AnyHandle, markers::Local};
    ///
    /// let handle = AnyHandle::new(1u8);
    /// let local: AnyHandle<Local> = handle.into_local();
    /// assert!(local.is::<u8>());
    /// ```
    #[must_use]
    pub fn into_local(self) -> AnyHandle<Local> {
        let raw = self.into_raw_handle();

        // SAFETY:
        // 1. `T=Local`.
        // 2. This is guaranteed by the invariants of this type.
        // 3. `T=Local`, so this is trivially true.
        unsafe { AnyHandle::<Local>::from_raw_unchecked(raw) }
    }
}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and all bookkeeping is atomic. Therefore it is safe to implement
// `Send`+`Sync` for the handle itself.
unsafe impl Send for AnyHandle<SendSync> {}

// SAFETY: The `SendSync` marker indicates that the payload is `Send`+`Sync`,
// and all bookkeeping is atomic. Therefore it is safe to implement
// `Send`+`Sync` for the handle itself.
unsafe impl Sync for AnyHandle<SendSync> {}

impl<T> Clone for AnyHandle<T> {
    fn clone(&self) -> Self {
        let raw = self.as_raw_ref().clone_handle();

        // SAFETY:
        // 1. The marker is carried over from `self`.
        // 2. The handle was just created.
        // 3. The payload is shared with `self`.
        unsafe { Self::from_raw_unchecked(raw) }
    }
}

impl<T> core::fmt::Debug for AnyHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AnyHandle")
            .field("type_name", &self.type_name())
            .field("type_id", &format_args!("{:#x}", self.type_id()))
            .field("handle_count", &self.handle_count())
            .field("borrow_state", &self.borrow_state())
            .finish()
    }
}

impl<T> Unpin for AnyHandle<T> {}

impl From<AnyHandle<SendSync>> for AnyHandle<Local> {
    fn from(handle: AnyHandle<SendSync>) -> Self {
        handle.into_local()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{format, string::String, vec};

    use super::*;

    #[allow(dead_code)]
    struct NonSend(*const ());
    static_assertions::assert_not_impl_any!(NonSend: Send, Sync);

    #[test]
    fn test_handle_send_sync() {
        static_assertions::assert_impl_all!(AnyHandle<SendSync>: Send, Sync, Clone, Unpin);
        static_assertions::assert_not_impl_any!(AnyHandle<Local>: Send, Sync);
        static_assertions::assert_impl_all!(AnyHandle<Local>: Clone, Unpin);
        static_assertions::assert_not_impl_any!(AnyHandle<SendSync>: Copy);
    }

    #[test]
    fn test_handle_layout() {
        static_assertions::assert_eq_size!(AnyHandle<SendSync>, RawHandle);
        static_assertions::assert_eq_size!(AnyHandle<Local>, RawHandle);
    }

    #[test]
    fn test_introspection() {
        let handle = AnyHandle::new(vec![1u8, 2, 3]);
        assert!(handle.is::<alloc::vec::Vec<u8>>());
        assert!(!handle.is::<String>());
        assert_eq!(handle.type_name(), core::any::type_name::<alloc::vec::Vec<u8>>());
        assert!(handle.has_no_copies());

        let clone = handle.clone();
        assert!(handle.ptr_eq(&clone));
        assert!(!handle.has_no_copies());
        assert_eq!(clone.handle_count(), 2);

        let snapshot = handle.debug_snapshot();
        assert_eq!(snapshot.handle_count, 2);
        assert_eq!(snapshot.shared_count, 0);
        assert_eq!(snapshot.exclusive_count, 0);
        assert_eq!(snapshot.layout, Layout::new::<alloc::vec::Vec<u8>>());
    }

    #[test]
    fn test_local_payload() {
        let handle = AnyHandle::new_local(NonSend(core::ptr::null()));
        assert!(handle.is::<NonSend>());
        assert!(handle.try_borrow_exclusive::<NonSend>().is_some());
    }

    #[test]
    fn test_downcast_errors() {
        let handle = AnyHandle::new(5i64);

        let error = handle.borrow_shared::<i32>().unwrap_err();
        assert_eq!(
            error,
            DowncastError::TypeMismatch {
                expected: "i32",
                found: registry::descriptor_of::<i64>(),
            }
        );

        let view = handle.borrow_shared::<i64>().unwrap();
        let error = handle.borrow_exclusive::<i64>().unwrap_err();
        assert!(error.is_borrow_conflict());
        drop(view);

        assert!(handle.borrow_exclusive::<i64>().is_ok());
    }

    #[test]
    fn test_debug_output() {
        let handle = AnyHandle::new(1u16);
        let output = format!("{handle:?}");
        assert!(output.contains("u16"));
        assert!(output.contains("handle_count: 1"));
    }

    #[test]
    fn test_raw_round_trip_keeps_count() {
        let handle = AnyHandle::new(3u8);
        let clone = handle.clone();
        let raw = handle.into_raw();
        assert_eq!(clone.handle_count(), 2);

        // SAFETY: The payload is a `u8`, which is `Send + Sync`.
        let handle: AnyHandle = unsafe { AnyHandle::from_raw(raw) }.unwrap();
        assert_eq!(*handle.try_borrow_shared::<u8>().unwrap(), 3);
        assert_eq!(clone.handle_count(), 2);

        // SAFETY: A dead handle carries no payload.
        assert!(unsafe { AnyHandle::<SendSync>::from_raw(RawHandle::dead()) }.is_none());
    }
}
