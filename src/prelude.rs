//! Commonly used items for convenient importing.
//!
//! # Usage
//!
//! ```rust
//! use anyhandle::prelude::*;
//!
//! let handle: AnyHandle = AnyHandle::new(5u32);
//! let view: SharedView<u32> = handle.try_borrow_shared().unwrap();
//! assert_eq!(*view, 5);
//! ```
//!
//! # What's Included
//!
//! - **[`AnyHandle`]**: The type-erased handle
//! - **[`SharedView`]** and **[`ExclusiveView`]**: Typed views of a payload
//! - **[`DowncastError`]**: Why a downcast failed
//! - **[`reflect!`]**: Per-type runtime type information
//! - **[`markers`]**: Thread-safety markers

pub use crate::{AnyHandle, DowncastError, ExclusiveView, SharedView, View, markers, reflect};
