//! Untyped handle and borrow-token types.
//!
//! This module encapsulates the `state` field of [`RawHandle`],
//! [`RawHandleRef`], [`RawShared`] and [`RawExclusive`], ensuring it is only
//! visible within this module. This visibility restriction guarantees the
//! safety invariant: **the pointer always comes from
//! `triomphe::Arc<SharedState>`**.
//!
//! # Safety Invariant
//!
//! Since the `state` field can only be set via [`RawHandle::from_arc`] (which
//! creates it from `Arc::into_raw`) or by cloning an existing strong
//! reference, and cannot be modified afterwards, the pointer provenance
//! remains valid for as long as the owning value holds its strong reference.
//!
//! # Borrow tokens
//!
//! [`RawShared`] and [`RawExclusive`] each own one strong reference in
//! addition to one unit of the borrow flag. Releasing a token first releases
//! the borrow flag and then the strong reference, so the payload is never
//! destroyed while a token is alive, even if every [`RawHandle`] is gone.

use core::{alloc::Layout, ffi::c_void, marker::PhantomData, mem::ManuallyDrop, ptr::NonNull};

use crate::{
    descriptor::{Destructor, TypeDescriptor, drop_in_place_destructor},
    state::{
        borrow::BorrowState,
        data::{SharedState, allocate},
    },
};

/// An untyped, reference-counted handle to a payload.
///
/// This is the value that crosses the C boundary: a fixed-size `#[repr(C)]`
/// struct `{ payload, state, is_dead }`. Cloning is done through
/// [`RawHandleRef::clone_handle`]; releasing through [`RawHandle::release`] or
/// by dropping.
///
/// A handle that has released its reference is *dead*. All operations on a
/// dead handle are no-ops; [`RawHandle::get`] returns `None` for it.
#[repr(C)]
pub struct RawHandle {
    /// Pointer to the payload, equal to the payload pointer of the state.
    payload: NonNull<u8>,
    /// Pointer to the shared state.
    ///
    /// # Safety
    ///
    /// The following safety invariants are guaranteed to be upheld as long as
    /// this struct exists and `is_dead` is `false`:
    ///
    /// 1. The pointer was created from a `triomphe::Arc<SharedState>` using
    ///    `triomphe::Arc::into_raw`.
    /// 2. This handle owns one strong reference of that `Arc`.
    /// 3. The pointer points to the same `SharedState` for the entire
    ///    lifetime of this object.
    state: NonNull<SharedState>,
    /// Set once the strong reference has been released.
    is_dead: bool,
}

impl RawHandle {
    /// Creates a new [`RawHandle`] from a [`triomphe::Arc<SharedState>`].
    #[inline]
    fn from_arc(state: triomphe::Arc<SharedState>) -> Self {
        let payload = state.payload();
        let ptr: *mut SharedState = triomphe::Arc::into_raw(state).cast_mut();

        // SAFETY:
        // 1. Triomphe guarantees that `Arc::into_raw` returns a non-null pointer.
        let state: NonNull<SharedState> = unsafe { NonNull::new_unchecked(ptr) };

        Self {
            payload,
            // SAFETY:
            // 1. We just created the pointer using `triomphe::Arc::into_raw`.
            // 2. `into_raw` transferred the strong reference to us.
            // 3. We are creating the object here and we are not changing the pointer.
            state,
            is_dead: false,
        }
    }

    /// Creates a new [`RawHandle`] that owns `value`.
    ///
    /// The payload is moved into a fresh allocation with the layout of `T`,
    /// and the destructor drops it as a `T`. The handle count starts at `1`.
    ///
    /// If `descriptor` records a Rust type, it must be `T`.
    #[must_use]
    pub fn new<T: 'static>(value: T, descriptor: TypeDescriptor) -> Self {
        debug_assert!(
            descriptor
                .rust_type()
                .is_none_or(|rust_type| rust_type == core::any::TypeId::of::<T>()),
            "descriptor of another Rust type"
        );
        let layout = Layout::new::<T>();
        let payload = allocate(layout);

        // SAFETY: `payload` is valid for writes of `layout.size()` bytes and aligned
        // for `T`, since it was allocated (or made dangling) for `Layout::new::<T>()`.
        unsafe {
            payload.cast::<T>().write(value);
        }

        // SAFETY:
        // 1. The payload was allocated for `layout`, holds an initialized `T` and
        //    `drop_in_place_destructor::<T>` drops exactly a `T`.
        // 2. Ownership of the allocation and the value moves into the state.
        let state = unsafe {
            SharedState::new(
                payload,
                layout,
                descriptor,
                drop_in_place_destructor::<T>,
            )
        };
        Self::created(state)
    }

    /// Creates a new [`RawHandle`] by copying a foreign payload.
    ///
    /// The `layout.size()` bytes at `payload` are copied into a fresh
    /// allocation with `layout`. From then on the copy is the value: the
    /// original bytes must be treated as moved-from. `destructor` is called
    /// exactly once on the copy when the last reference is released.
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
    ///    records a Rust type, the value is of that type.
    #[must_use]
    pub unsafe fn adopt(
        payload: *const c_void,
        layout: Layout,
        descriptor: TypeDescriptor,
        destructor: Destructor,
    ) -> Self {
        let allocation = allocate(layout);
        if layout.size() != 0 {
            // SAFETY:
            // 1. The source is valid for `layout.size()` bytes (guaranteed by the caller).
            // 2. The destination was just allocated with that size.
            // 3. A fresh allocation cannot overlap the caller's memory.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    payload.cast::<u8>(),
                    allocation.as_ptr(),
                    layout.size(),
                );
            }
        }

        // SAFETY:
        // 1. The allocation matches `layout` and holds the value; the caller guarantees
        //    that `destructor` can drop it.
        // 2. The caller gives up ownership of the value (guaranteed by the caller).
        let state = unsafe { SharedState::new(allocation, layout, descriptor, destructor) };
        Self::created(state)
    }

    /// Moves a freshly built state into an `Arc` and wraps it.
    #[inline]
    fn created(state: SharedState) -> Self {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            type_name = state.descriptor().type_name(),
            type_id = state.descriptor().type_id(),
            size = state.layout().size(),
            "created handle"
        );

        Self::from_arc(triomphe::Arc::new(state))
    }

    /// Creates a handle that is already dead.
    ///
    /// Used to report a construction failure across the C boundary, where
    /// there is no `Option`. Every operation on it is a no-op.
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            payload: NonNull::dangling(),
            state: NonNull::dangling(),
            is_dead: true,
        }
    }

    /// Returns `true` if this handle has released its reference.
    #[inline]
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    /// Returns a reference to the live handle, or `None` if it is dead.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<RawHandleRef<'_>> {
        if self.is_dead {
            return None;
        }

        Some(RawHandleRef {
            // SAFETY:
            // 1. Guaranteed by the invariants on `RawHandle`, since it is not dead.
            // 2. The strong reference of `self` outlives the returned lifetime.
            payload: self.payload,
            state: self.state,
            _marker: PhantomData,
        })
    }

    /// Releases this handle's strong reference and marks it dead.
    ///
    /// If this was the last strong reference, the destructor runs and the
    /// payload and state are freed before this method returns. Releasing a
    /// dead handle does nothing.
    pub fn release(&mut self) {
        if self.is_dead {
            return;
        }
        self.is_dead = true;

        let ptr: *const SharedState = self.state.as_ptr();
        // SAFETY:
        // 1. The pointer came from `Arc::into_raw` (invariant 1 on `state`).
        // 2. This handle owns one strong reference (invariant 2), which we give back
        //    here; `is_dead` is already set so it is never used again.
        let arc = unsafe { triomphe::Arc::from_raw(ptr) };
        core::mem::drop(arc);
    }
}

impl Drop for RawHandle {
    #[inline]
    fn drop(&mut self) {
        self.release();
    }
}

impl core::fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get() {
            Some(handle) => core::fmt::Debug::fmt(&handle, f),
            None => f.write_str("RawHandle(<dead>)"),
        }
    }
}

/// A lifetime-bound reference to a live [`RawHandle`].
///
/// # Safety invariants
///
/// For the entire lifetime `'a`, some strong reference to the state is held
/// by whoever lent out this reference, so the state and the payload stay
/// allocated.
#[derive(Clone, Copy)]
pub struct RawHandleRef<'a> {
    /// Pointer to the payload.
    payload: NonNull<u8>,
    /// Pointer to the shared state
    ///
    /// # Safety
    ///
    /// The following safety invariants are guaranteed to be upheld as long as
    /// this struct exists:
    ///
    /// 1. The pointer was created from a `triomphe::Arc<SharedState>` using
    ///    `triomphe::Arc::into_raw`.
    /// 2. A strong reference to it is held for the entire lifetime `'a`.
    state: NonNull<SharedState>,
    /// Marker to tell the compiler that we should
    /// behave the same as a `&'a SharedState`
    _marker: PhantomData<&'a SharedState>,
}

impl<'a> RawHandleRef<'a> {
    /// Returns a reference to the shared state.
    #[inline]
    fn state(self) -> &'a SharedState {
        // SAFETY: The pointer is non-null, aligned and points to an initialized
        // `SharedState` that stays alive for `'a` (invariants 1 and 2). Only shared
        // references to the state are ever created.
        unsafe { self.state.as_ref() }
    }

    /// Returns the type tag of the payload.
    #[inline]
    #[must_use]
    pub fn descriptor(self) -> &'a TypeDescriptor {
        self.state().descriptor()
    }

    /// Returns the type id of the payload.
    #[inline]
    #[must_use]
    pub fn type_id(self) -> u64 {
        self.descriptor().type_id()
    }

    /// Returns the type name of the payload.
    #[inline]
    #[must_use]
    pub fn type_name(self) -> &'a str {
        self.descriptor().type_name()
    }

    /// Returns `true` if the payload is tagged with `type_id`.
    #[inline]
    #[must_use]
    pub fn is_type(self, type_id: u64) -> bool {
        self.type_id() == type_id
    }

    /// Returns the size and alignment of the payload.
    #[inline]
    #[must_use]
    pub fn layout(self) -> Layout {
        self.state().layout()
    }

    /// Returns the raw payload pointer.
    ///
    /// Dereferencing it is only sound while holding a matching borrow token.
    #[inline]
    #[must_use]
    pub fn data_ptr(self) -> *const c_void {
        self.payload.as_ptr().cast_const().cast::<c_void>()
    }

    /// Returns the current borrow state.
    #[inline]
    #[must_use]
    pub fn borrow_state(self) -> BorrowState {
        self.state().borrow_state()
    }

    /// Returns the strong count of the state: live handles plus live borrow
    /// tokens.
    #[inline]
    #[must_use]
    pub fn handle_count(self) -> usize {
        // SAFETY: The pointer came from `Arc::into_raw` and a strong reference is held
        // for `'a` (invariants 1 and 2), which is what `ArcBorrow::from_ptr` requires.
        let arc = unsafe { triomphe::ArcBorrow::from_ptr(self.state.as_ptr().cast_const()) };
        triomphe::ArcBorrow::strong_count(&arc)
    }

    /// Returns `true` if both references point to the same state.
    #[inline]
    #[must_use]
    pub fn ptr_eq(self, other: RawHandleRef<'_>) -> bool {
        self.state == other.state
    }

    /// Creates a new [`RawHandle`] to the same state, incrementing the
    /// handle count.
    #[inline]
    #[must_use]
    pub fn clone_handle(self) -> RawHandle {
        // SAFETY: The pointer came from `Arc::into_raw` and a strong reference is held
        // for `'a` (invariants 1 and 2), which is what `ArcBorrow::from_ptr` requires.
        let arc = unsafe { triomphe::ArcBorrow::from_ptr(self.state.as_ptr().cast_const()) };
        RawHandle::from_arc(arc.clone_arc())
    }

    /// Acquires a shared borrow of the payload.
    ///
    /// Fails with the current state if an exclusive borrow exists. The check
    /// and the acquisition are one atomic step.
    #[inline]
    pub fn try_borrow_shared(self) -> Result<RawShared, BorrowState> {
        self.state().borrow().try_acquire_shared()?;
        Ok(RawShared {
            // SAFETY: We just acquired one shared borrow, which the token now owns.
            keep_alive: self.clone_handle(),
        })
    }

    /// Acquires the exclusive borrow of the payload.
    ///
    /// Fails with the current state if any borrow exists. The check and the
    /// acquisition are one atomic step.
    #[inline]
    pub fn try_borrow_exclusive(self) -> Result<RawExclusive, BorrowState> {
        self.state().borrow().try_acquire_exclusive()?;
        Ok(RawExclusive {
            // SAFETY: We just acquired the exclusive borrow, which the token now owns.
            keep_alive: self.clone_handle(),
        })
    }
}

impl core::fmt::Debug for RawHandleRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawHandle")
            .field("type_name", &self.type_name())
            .field("type_id", &self.type_id())
            .field("handle_count", &self.handle_count())
            .field("borrow_state", &self.borrow_state())
            .finish()
    }
}

/// An untyped shared borrow of a payload.
///
/// While it exists no exclusive borrow can be acquired. Dropping it releases
/// the borrow and then its strong reference.
pub struct RawShared {
    /// Strong reference that keeps the payload alive.
    ///
    /// # Safety
    ///
    /// 1. The handle is never released before the token is dropped.
    /// 2. The token owns one unit of the shared borrow count of the state.
    keep_alive: RawHandle,
}

impl RawShared {
    /// Returns a reference to the handle this token keeps alive.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> RawHandleRef<'_> {
        RawHandleRef {
            // SAFETY:
            // 1. Guaranteed by the invariants on `RawHandle`.
            // 2. `keep_alive` is never released while `self` exists (invariant 1).
            payload: self.keep_alive.payload,
            state: self.keep_alive.state,
            _marker: PhantomData,
        }
    }

    /// Acquires another shared borrow of the same payload.
    ///
    /// This only fails if the shared count would overflow.
    #[inline]
    pub fn try_clone(&self) -> Result<RawShared, BorrowState> {
        self.handle().try_borrow_shared()
    }

    /// Accesses the payload as a `T`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The type `T` matches the actual type of the payload.
    #[inline]
    #[must_use]
    pub unsafe fn downcast_unchecked<T: 'static>(&self) -> &T {
        let ptr: NonNull<T> = self.keep_alive.payload.cast::<T>();
        // SAFETY:
        // - The pointer is non-null and aligned for `T`, since the payload was
        //   allocated with the layout of the stored type, which is `T` (guaranteed by
        //   the caller).
        // - The payload is initialized and stays alive while `keep_alive` holds its
        //   strong reference.
        // - No mutable reference exists: we own a shared borrow, which excludes the
        //   exclusive one.
        unsafe { ptr.as_ref() }
    }
}

impl Drop for RawShared {
    #[inline]
    fn drop(&mut self) {
        self.handle().state().borrow().release_shared();
        // `keep_alive` drops after this, releasing the strong reference.
    }
}

impl core::fmt::Debug for RawShared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RawShared").field(&self.handle()).finish()
    }
}

/// An untyped exclusive borrow of a payload.
///
/// While it exists no other borrow can be acquired. Dropping it releases the
/// borrow and then its strong reference.
pub struct RawExclusive {
    /// Strong reference that keeps the payload alive.
    ///
    /// # Safety
    ///
    /// 1. The handle is never released before the token is dropped.
    /// 2. The token owns the exclusive borrow of the state.
    keep_alive: RawHandle,
}

impl RawExclusive {
    /// Returns a reference to the handle this token keeps alive.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> RawHandleRef<'_> {
        RawHandleRef {
            // SAFETY:
            // 1. Guaranteed by the invariants on `RawHandle`.
            // 2. `keep_alive` is never released while `self` exists (invariant 1).
            payload: self.keep_alive.payload,
            state: self.keep_alive.state,
            _marker: PhantomData,
        }
    }

    /// Accesses the payload as a `T`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The type `T` matches the actual type of the payload.
    #[inline]
    #[must_use]
    pub unsafe fn downcast_unchecked<T: 'static>(&self) -> &T {
        let ptr: NonNull<T> = self.keep_alive.payload.cast::<T>();
        // SAFETY:
        // - The pointer is non-null, aligned and initialized for `T` (guaranteed by
        //   the caller and the payload invariants).
        // - The returned reference borrows `self`, so no mutable reference handed out
        //   by `downcast_mut_unchecked` can coexist with it.
        unsafe { ptr.as_ref() }
    }

    /// Accesses the payload as a mutable `T`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The type `T` matches the actual type of the payload.
    #[inline]
    #[must_use]
    pub unsafe fn downcast_mut_unchecked<T: 'static>(&mut self) -> &mut T {
        let mut ptr: NonNull<T> = self.keep_alive.payload.cast::<T>();
        // SAFETY:
        // - The pointer is non-null, aligned and initialized for `T` (guaranteed by
        //   the caller and the payload invariants).
        // - We own the exclusive borrow (invariant 2), so no other token can access
        //   the payload, and the reference borrows `self` mutably.
        unsafe { ptr.as_mut() }
    }

    /// Turns the exclusive borrow into a shared one.
    ///
    /// The payload never becomes unborrowed in between, so no other exclusive
    /// borrow can slip in.
    #[inline]
    #[must_use]
    pub fn downgrade(self) -> RawShared {
        let this = ManuallyDrop::new(self);
        this.handle().state().borrow().downgrade();

        // SAFETY: `this` is never dropped, so moving `keep_alive` out of it leaves
        // exactly one owner of the strong reference.
        let keep_alive = unsafe { core::ptr::read(&this.keep_alive) };

        RawShared {
            // SAFETY: The exclusive borrow was converted into one shared borrow,
            // which the new token owns.
            keep_alive,
        }
    }
}

impl Drop for RawExclusive {
    #[inline]
    fn drop(&mut self) {
        self.handle().state().borrow().release_exclusive();
        // `keep_alive` drops after this, releasing the strong reference.
    }
}

impl core::fmt::Debug for RawExclusive {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RawExclusive").field(&self.handle()).finish()
    }
}
