#![no_std]
#![forbid(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::missing_docs_in_private_items,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
#![allow(rustdoc::private_intra_doc_links)]
//! Internal implementation crate for [`anyhandle`].
//!
//! # Overview
//!
//! This crate contains the low-level, untyped data structures and unsafe
//! operations that power the [`anyhandle`] crate: a reference-counted box
//! whose payload type is only known at runtime, together with the atomic
//! bookkeeping that emulates Rust's borrow rules for it.
//!
//! **This crate is an implementation detail.** No semantic versioning
//! guarantees are provided. Users should depend on the [`anyhandle`] crate,
//! not this one.
//!
//! # Architecture
//!
//! - [`TypeDescriptor`]: the runtime type tag (`u64` id plus name) stored
//!   next to every payload.
//! - [`SharedState`]: the single heap record shared by all clones of a handle.
//!   It owns the payload allocation, its layout, the descriptor, the
//!   destructor and the borrow flag. It lives inside a [`triomphe::Arc`],
//!   whose strong count is the handle count.
//! - [`RawHandle`]: the `#[repr(C)]` handle `{ payload, state, is_dead }` that
//!   crosses the C boundary by value.
//! - [`RawHandleRef`]: a lifetime-bound borrowed view of a live handle.
//! - [`RawShared`] / [`RawExclusive`]: untyped RAII borrow tokens. Each keeps
//!   its own strong reference, so the payload outlives the handle it was
//!   borrowed from.
//!
//! # Safety Strategy
//!
//! The payload type is erased, so the crate cannot check downcasts itself.
//! Instead it guarantees:
//!
//! - **Exactly-once destruction**: the destructor runs from the [`Drop`]
//!   implementation of [`SharedState`], which [`triomphe::Arc`] invokes once,
//!   when the strong count reaches zero.
//! - **Borrow exclusion**: every acquisition of a borrow is a single
//!   compare-and-swap on one atomic word, so "many readers or one writer" is
//!   linearizable even across threads.
//! - **Module-based encapsulation**: the fields of the pointer types are only
//!   visible inside the module that defines them, making the invariants
//!   locally verifiable.
//!
//! Type checking is left to the caller: the `*_unchecked` accessors require
//! the caller to have compared the stored [`TypeDescriptor`] first.
//!
//! [`anyhandle`]: https://docs.rs/anyhandle/latest/anyhandle/
//! [`SharedState`]: state::data::SharedState

extern crate alloc;

mod descriptor;
mod state;

pub use descriptor::{Destructor, TypeDescriptor};
pub use state::{BorrowState, RawExclusive, RawHandle, RawHandleRef, RawShared};
