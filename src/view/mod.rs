//! Typed, scoped borrows of a payload.
//!
//! A view is the only way to reach the payload of an
//! [`AnyHandle`](crate::AnyHandle). Both kinds of view release their borrow
//! automatically when dropped, and both hold their own strong reference, so
//! the payload is never destroyed while a view of it exists.

mod exclusive;
mod shared;

pub use self::{exclusive::ExclusiveView, shared::SharedView};

mod sealed_view {
    use super::*;

    pub trait Sealed {}

    impl<P, T> Sealed for SharedView<P, T> {}
    impl<P, T> Sealed for ExclusiveView<P, T> {}
}

/// Trait implemented by [`SharedView`] and [`ExclusiveView`].
///
/// It lets code that does not care about the kind of a view end it early.
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait View: sealed_view::Sealed {
    /// The type of the payload.
    type Payload;

    /// Ends the borrow, the same as dropping the view.
    fn release(self);
}

impl<P, T> View for SharedView<P, T> {
    type Payload = P;

    fn release(self) {
        SharedView::release(self);
    }
}

impl<P, T> View for ExclusiveView<P, T> {
    type Payload = P;

    fn release(self) {
        ExclusiveView::release(self);
    }
}
