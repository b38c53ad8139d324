#![cfg_attr(not(doc), no_std)]
#![deny(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Extra checks on nightly
#![cfg_attr(nightly_extra_checks, feature(rustdoc_missing_doc_code_examples))]
#![cfg_attr(nightly_extra_checks, forbid(rustdoc::missing_doc_code_examples))]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A type-erased, reference-counted box with runtime-checked borrows.
//!
//! ## Overview
//!
//! This crate provides [`AnyHandle`], an opaque container for application
//! state that has to travel through code that cannot know its type: callback
//! tables, timers, background threads, or a C ABI. The handle can be cloned,
//! stored, sent to another thread and dropped freely; the payload is destroyed
//! exactly once, when nothing refers to it anymore.
//!
//! Getting the payload back requires a *downcast*: the handle compares the
//! requested type against the type it was created with, and checks the
//! "many readers or one writer" rule at runtime. Both checks either succeed
//! immediately or fail immediately; nothing ever blocks.
//!
//! ## Quick Example
//!
//! ```
//! use anyhandle::prelude::*;
//!
//! struct Model {
//!     clicks: u32,
//! }
//!
//! fn on_click(data: &AnyHandle) {
//!     if let Some(mut model) = data.try_borrow_exclusive::<Model>() {
//!         model.clicks += 1;
//!     }
//! }
//!
//! let handle = AnyHandle::new(Model { clicks: 0 });
//! on_click(&handle.clone());
//! on_click(&handle.clone());
//! assert_eq!(handle.try_borrow_shared::<Model>().unwrap().clicks, 2);
//! ```
//!
//! ## Core Concepts
//!
//! - **[`AnyHandle`]**: the opaque box. Clones share one payload.
//! - **[`TypeDescriptor`]**: the runtime type tag of a payload, a `u64` id
//!   plus a name. Ids come from the [`registry`].
//! - **[`SharedView`] / [`ExclusiveView`]**: typed borrows obtained by
//!   downcasting. They end when dropped, and keep the payload alive on their
//!   own.
//! - **[`DowncastError`]**: tells a type mismatch apart from a borrow
//!   conflict. The `try_*` methods return `Option` instead.
//! - **[`reflect!`]**: generates the per-type `<type>_rtti` module.
//! - **[`ffi`]**: the same operations as `extern "C"` functions.
//!
//! For implementation details, see the [`anyhandle-internals`] crate.
//!
//! [`anyhandle-internals`]: anyhandle_internals
//!
//! ## Thread Safety
//!
//! [`AnyHandle<SendSync>`](markers::SendSync) (the default) requires a
//! `Send + Sync` payload and is itself `Send + Sync`. Every counter is atomic,
//! so clones of one handle can be downcast concurrently from different
//! threads. [`AnyHandle<Local>`](markers::Local) accepts any `'static` payload
//! and stays on its thread.
//!
//! ## Features
//!
//! - `std`: use `std::sync::RwLock` for the global registries instead of a
//!   spin lock.
//! - `tracing`: emit [`tracing`](https://docs.rs/tracing) events when handles
//!   are created or destroyed and when a downcast is refused.
//! - `json`: per-type JSON codecs, see the `json` module.

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

#[macro_use]
mod macros;

pub mod error;
pub mod ffi;
mod handle;
#[cfg(feature = "json")]
pub mod json;
pub mod markers;
pub mod prelude;
pub mod registry;
mod view;

pub use anyhandle_internals::{BorrowState, Destructor, RawHandle, TypeDescriptor};

pub use self::{
    error::{BorrowKind, DowncastError},
    handle::{AnyHandle, StateSnapshot},
    view::{ExclusiveView, SharedView, View},
};

// Not public API. Referenced by macro-generated code.
#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    pub use paste::paste;
}
