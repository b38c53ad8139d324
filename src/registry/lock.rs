#[cfg(feature = "std")]
use std::sync as impl_;

#[cfg(not(feature = "std"))]
use spin as impl_;

/// A lazily filled global table behind a reader-writer lock.
///
/// Uses `std::sync::RwLock` with the `std` feature and a spinning lock
/// otherwise. A poisoned std lock is recovered: every writer leaves the table
/// consistent before it can panic.
#[repr(transparent)]
pub(crate) struct RegistryLock<T: 'static + Send + Sync>(impl_::RwLock<Option<T>>);

/// Read access to a [`RegistryLock`].
#[repr(transparent)]
pub(crate) struct RegistryReadGuard<T: 'static + Send + Sync>(
    impl_::RwLockReadGuard<'static, Option<T>>,
);

/// Write access to a [`RegistryLock`].
#[repr(transparent)]
pub(crate) struct RegistryWriteGuard<T: 'static + Send + Sync>(
    impl_::RwLockWriteGuard<'static, Option<T>>,
);

impl<T: 'static + Send + Sync> RegistryLock<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self(impl_::RwLock::new(None))
    }

    #[inline]
    pub(crate) fn read(&'static self) -> RegistryReadGuard<T> {
        #[cfg(not(feature = "std"))]
        let guard = self.0.read();

        #[cfg(feature = "std")]
        let guard = self.0.read().unwrap_or_else(impl_::PoisonError::into_inner);

        RegistryReadGuard(guard)
    }

    #[inline]
    pub(crate) fn write(&'static self) -> RegistryWriteGuard<T> {
        #[cfg(not(feature = "std"))]
        let guard = self.0.write();

        #[cfg(feature = "std")]
        let guard = self.0.write().unwrap_or_else(impl_::PoisonError::into_inner);

        RegistryWriteGuard(guard)
    }
}

impl<T: 'static + Send + Sync> RegistryReadGuard<T> {
    #[inline]
    pub(crate) fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T: 'static + Send + Sync + Default> RegistryWriteGuard<T> {
    #[inline]
    pub(crate) fn get(&mut self) -> &mut T {
        self.0.get_or_insert_with(T::default)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    static LOCK: RegistryLock<Vec<u32>> = RegistryLock::new();

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let result = std::thread::spawn(|| {
            let mut guard = LOCK.write();
            guard.get().push(1);
            panic!("writer panicked while holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(LOCK.0.is_poisoned());

        assert_eq!(LOCK.read().get().map(Vec::len), Some(1));
        LOCK.write().get().push(2);
        assert_eq!(LOCK.read().get().map(Vec::as_slice), Some(&[1, 2][..]));
    }
}
