//! Module containing the shared state behind every handle

mod borrow;
mod data;
mod raw;

pub use self::{
    borrow::BorrowState,
    raw::{RawExclusive, RawHandle, RawHandleRef, RawShared},
};
