//! The atomic borrow flag of a [`SharedState`].
//!
//! The shared count and the exclusive count live in a single atomic word, so
//! that checking the rule "many readers or one writer" and recording the new
//! borrow is always one compare-and-swap. Two separate counters would need a
//! check followed by an increment, which races when clones of a handle are
//! used from different threads.
//!
//! Encoding of the word:
//!
//! | word            | state                      |
//! |-----------------|----------------------------|
//! | `0`             | unborrowed                 |
//! | `1..=MAX_SHARED`| that many shared borrows   |
//! | `EXCLUSIVE`     | one exclusive borrow       |
//!
//! [`SharedState`]: super::data::SharedState

use core::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Flag value marking an exclusive borrow.
const EXCLUSIVE: usize = usize::MAX;

/// Largest number of simultaneous shared borrows.
const MAX_SHARED: usize = EXCLUSIVE - 1;

/// Snapshot of the borrow state of a payload.
///
/// This is what a failed borrow attempt reports back: the state that made the
/// attempt fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BorrowState {
    /// No views exist.
    Unborrowed,
    /// The given number of shared views exist.
    Shared(NonZeroUsize),
    /// One exclusive view exists.
    Exclusive,
}

impl BorrowState {
    /// Decodes a flag word.
    #[inline]
    fn from_word(word: usize) -> Self {
        if word == EXCLUSIVE {
            Self::Exclusive
        } else {
            match NonZeroUsize::new(word) {
                Some(count) => Self::Shared(count),
                None => Self::Unborrowed,
            }
        }
    }

    /// Returns the number of live shared views.
    #[inline]
    #[must_use]
    pub fn shared_count(self) -> usize {
        match self {
            Self::Shared(count) => count.get(),
            Self::Unborrowed | Self::Exclusive => 0,
        }
    }

    /// Returns the number of live exclusive views, which is always `0` or `1`.
    #[inline]
    #[must_use]
    pub fn exclusive_count(self) -> usize {
        match self {
            Self::Exclusive => 1,
            Self::Unborrowed | Self::Shared(_) => 0,
        }
    }

    /// Returns `true` if no views exist.
    #[inline]
    #[must_use]
    pub fn is_unborrowed(self) -> bool {
        matches!(self, Self::Unborrowed)
    }
}

/// The atomic borrow flag.
///
/// Acquisitions use [`Ordering::Acquire`] and releases use
/// [`Ordering::Release`], so writes made through an exclusive view happen
/// before any later view observes the payload.
pub(super) struct BorrowFlag(AtomicUsize);

impl BorrowFlag {
    /// Creates an unborrowed flag.
    #[inline]
    pub(super) const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Returns the current state.
    #[inline]
    pub(super) fn state(&self) -> BorrowState {
        BorrowState::from_word(self.0.load(Ordering::Acquire))
    }

    /// Records one more shared borrow, unless an exclusive borrow exists.
    #[inline]
    pub(super) fn try_acquire_shared(&self) -> Result<(), BorrowState> {
        self.0
            .fetch_update(Ordering::Acquire, Ordering::Acquire, |word| {
                (word < MAX_SHARED).then_some(word + 1)
            })
            .map(|_| ())
            .map_err(BorrowState::from_word)
    }

    /// Records the exclusive borrow, unless any borrow exists.
    #[inline]
    pub(super) fn try_acquire_exclusive(&self) -> Result<(), BorrowState> {
        self.0
            .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Acquire)
            .map(|_| ())
            .map_err(BorrowState::from_word)
    }

    /// Releases one shared borrow.
    ///
    /// Must only be called by the owner of a shared borrow.
    #[inline]
    pub(super) fn release_shared(&self) {
        let previous = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(previous != 0 && previous != EXCLUSIVE);
    }

    /// Releases the exclusive borrow.
    ///
    /// Must only be called by the owner of the exclusive borrow.
    #[inline]
    pub(super) fn release_exclusive(&self) {
        let previous = self.0.swap(0, Ordering::Release);
        debug_assert_eq!(previous, EXCLUSIVE);
    }

    /// Turns the exclusive borrow into a single shared borrow without an
    /// unborrowed state in between.
    ///
    /// Must only be called by the owner of the exclusive borrow.
    #[inline]
    pub(super) fn downgrade(&self) {
        let previous = self.0.swap(1, Ordering::Release);
        debug_assert_eq!(previous, EXCLUSIVE);
    }
}
