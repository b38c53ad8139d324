//! Errors returned by failed downcasts.
//!
//! A downcast can fail for two unrelated reasons, and callers usually want to
//! react differently to them: a [`TypeMismatch`](DowncastError::TypeMismatch)
//! is a programming error or a sign that a callback received the wrong
//! handle, while a [`BorrowConflict`](DowncastError::BorrowConflict) is a
//! transient condition that goes away once the other view is released.
//!
//! The `try_borrow_*` methods on [`AnyHandle`](crate::AnyHandle) collapse both
//! into `None`; the `borrow_*` methods return a [`DowncastError`].

use anyhandle_internals::{BorrowState, TypeDescriptor};

/// The kind of view that was requested.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum BorrowKind {
    /// A read-only [`SharedView`](crate::SharedView).
    Shared,
    /// A read-write [`ExclusiveView`](crate::ExclusiveView).
    Exclusive,
}

impl core::fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BorrowKind::Shared => write!(f, "shared"),
            BorrowKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Error returned when a handle cannot be downcast into a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DowncastError {
    /// The payload is not of the requested type.
    TypeMismatch {
        /// Name of the requested type.
        expected: &'static str,
        /// Descriptor of the stored payload.
        found: TypeDescriptor,
    },
    /// The payload has the requested type, but the view would break the "many
    /// readers or one writer" rule.
    BorrowConflict {
        /// The kind of view that was requested.
        requested: BorrowKind,
        /// The borrow state that prevented it.
        state: BorrowState,
    },
}

impl DowncastError {
    /// Returns `true` for a [`TypeMismatch`](Self::TypeMismatch).
    #[must_use]
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }

    /// Returns `true` for a [`BorrowConflict`](Self::BorrowConflict).
    #[must_use]
    pub fn is_borrow_conflict(&self) -> bool {
        matches!(self, Self::BorrowConflict { .. })
    }
}

impl core::fmt::Display for DowncastError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DowncastError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            DowncastError::BorrowConflict {
                requested,
                state: BorrowState::Exclusive,
            } => write!(
                f,
                "cannot acquire {requested} borrow: the payload is exclusively borrowed"
            ),
            DowncastError::BorrowConflict {
                requested,
                state: BorrowState::Shared(count),
            } => write!(
                f,
                "cannot acquire {requested} borrow: the payload has {count} shared view(s)"
            ),
            DowncastError::BorrowConflict {
                requested,
                state: BorrowState::Unborrowed,
            } => write!(f, "cannot acquire {requested} borrow"),
        }
    }
}

impl core::error::Error for DowncastError {}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use core::num::NonZeroUsize;

    use super::*;

    #[test]
    fn test_display() {
        let mismatch = DowncastError::TypeMismatch {
            expected: "A",
            found: TypeDescriptor::new_static(2, "B"),
        };
        assert_eq!(mismatch.to_string(), "type mismatch: expected A, found B (#0x2)");
        assert!(mismatch.is_type_mismatch());

        let conflict = DowncastError::BorrowConflict {
            requested: BorrowKind::Exclusive,
            state: BorrowState::Shared(NonZeroUsize::MIN),
        };
        assert_eq!(
            conflict.to_string(),
            "cannot acquire exclusive borrow: the payload has 1 shared view(s)"
        );
        assert!(conflict.is_borrow_conflict());
    }
}
