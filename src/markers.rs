//! Marker types and traits for defining thread-safety semantics.
//!
//! These markers are used as the generic parameter of
//! [`AnyHandle<T>`](crate::AnyHandle), [`SharedView<P, T>`](crate::SharedView)
//! and [`ExclusiveView<P, T>`](crate::ExclusiveView) to encode compile-time
//! guarantees about which threads may touch a payload.
//!
//! # Design Philosophy
//!
//! The constraints encoded by these markers are enforced at construction time.
//! It is impossible to construct an `AnyHandle<SendSync>` whose payload is not
//! `Send + Sync`, so you can trust that such a handle can be cloned into a
//! background thread and downcast there.
//!
//! - [`SendSync`]: the payload is `Send + Sync`; the handle and its views are
//!   `Send + Sync` as well.
//! - [`Local`]: the payload may be anything `'static` (like `Rc` or raw
//!   pointers); the handle stays on the thread that created it.
//!
//! # Examples
//!
//! ```
//! use std::rc::Rc;
//!
//! use anyhandle::prelude::*;
//!
//! // String is Send + Sync, so the handle is too
//! let handle: AnyHandle<markers::SendSync> = AnyHandle::new(String::from("state"));
//! std::thread::spawn(move || {
//!     assert!(handle.is::<String>());
//! })
//! .join()
//! .unwrap();
//!
//! // Rc is neither, so the handle must be Local
//! let local: AnyHandle<markers::Local> = AnyHandle::new_local(Rc::new(5));
//! assert!(local.is::<Rc<i32>>());
//! ```

/// Marker type indicating that a handle and its payload are `Send + Sync`.
///
/// This is the default thread-safety marker. Handles with this marker can be
/// cloned and moved into other threads, timers or async tasks, and every clone
/// can be downcast concurrently.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use anyhandle::prelude::*;
///
/// let handle: AnyHandle = AnyHandle::new(vec![1, 2, 3]);
/// let clone = handle.clone();
///
/// thread::spawn(move || {
///     let view = clone.try_borrow_shared::<Vec<i32>>().unwrap();
///     assert_eq!(view.len(), 3);
/// })
/// .join()
/// .unwrap();
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct SendSync;

/// Marker type indicating that a handle is not `Send` or `Sync`.
///
/// Use `Local` when the payload contains `Rc<T>`, raw pointers or other types
/// that are `!Send` or `!Sync`.
///
/// # Converting to Local
///
/// A thread-safe handle can be converted into a local one using
/// [`into_local`](crate::AnyHandle::into_local). The opposite conversion does
/// not exist.
///
/// ```compile_fail
/// use std::rc::Rc;
///
/// use anyhandle::prelude::*;
///
/// let local: AnyHandle<markers::Local> = AnyHandle::new_local(Rc::new(5));
/// std::thread::spawn(move || drop(local)); // ❌ Won't compile
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Local;

mod sealed_thread_safety_marker {
    use super::*;

    pub trait Sealed: 'static {}

    impl Sealed for SendSync {}
    impl Sealed for Local {}
}

/// Marker trait implemented by [`SendSync`] and [`Local`].
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait ThreadSafetyMarker: sealed_thread_safety_marker::Sealed {}

impl ThreadSafetyMarker for SendSync {}
impl ThreadSafetyMarker for Local {}

/// Marker trait combining payload and thread-safety requirements.
///
/// # Implementations
///
/// - For `T = Local`: implemented for all `Sized + 'static` types, regardless
///   of their `Send`/`Sync` status.
/// - For `T = SendSync`: implemented only for `Sized + 'static` types that are
///   also `Send + Sync`.
///
/// # Enforcement at Construction
///
/// This trait is the bound of [`AnyHandle::from_value`]. You cannot create an
/// `AnyHandle<SendSync>` unless `P: ObjectMarkerFor<SendSync>`:
///
/// ```compile_fail
/// use std::rc::Rc;
///
/// use anyhandle::prelude::*;
///
/// let handle: AnyHandle<markers::SendSync> = AnyHandle::from_value(Rc::new(1));
/// ```
///
/// [`AnyHandle::from_value`]: crate::AnyHandle::from_value
pub trait ObjectMarkerFor<T: ThreadSafetyMarker>: Sized + 'static {}

impl<O: Sized + 'static> ObjectMarkerFor<Local> for O {}

impl<O: Sized + 'static> ObjectMarkerFor<SendSync> for O where O: Send + Sync {}
