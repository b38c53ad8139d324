//! Runtime type identity for payloads stored behind a [`RawHandle`].
//!
//! [`RawHandle`]: crate::RawHandle

use alloc::borrow::Cow;
use core::{any::TypeId, ffi::c_void};

/// Destructor invoked on the payload when the last strong reference to it is
/// released.
///
/// The function receives a pointer to the payload and must drop the value in
/// place. It must not free the payload allocation itself: the allocation is
/// owned by the handle and is released after the destructor returns.
///
/// Because the signature is `extern "C"`, a panic inside the destructor aborts
/// the process instead of unwinding across the boundary.
pub type Destructor = extern "C" fn(*mut c_void);

/// The runtime type tag attached to every payload.
///
/// Two payloads of the same registered type always carry the same
/// [`type_id`](Self::type_id); two different registered types never do. The
/// name is only used for diagnostics and introspection.
///
/// Descriptors of Rust types also remember the [`core::any::TypeId`] of the
/// type, so a typed downcast can be checked without consulting any shared
/// table. Descriptors of foreign types have none.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    /// Process-wide unique identifier of the payload type.
    type_id: u64,
    /// Human-readable name of the payload type.
    type_name: Cow<'static, str>,
    /// The Rust type behind the descriptor, if there is one.
    rust_type: Option<TypeId>,
}

impl TypeDescriptor {
    /// Creates a descriptor from an id and a `'static` name.
    #[inline]
    #[must_use]
    pub const fn new_static(type_id: u64, type_name: &'static str) -> Self {
        Self {
            type_id,
            type_name: Cow::Borrowed(type_name),
            rust_type: None,
        }
    }

    /// Creates a descriptor from an id and a borrowed or owned name.
    #[inline]
    #[must_use]
    pub fn new(type_id: u64, type_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            type_id,
            type_name: type_name.into(),
            rust_type: None,
        }
    }

    /// Creates the descriptor of the Rust type `T`, named after
    /// [`core::any::type_name`].
    ///
    /// A payload tagged with this descriptor must be a `T`: typed downcasts
    /// trust the recorded [`TypeId`].
    #[inline]
    #[must_use]
    pub fn of_rust_type<T: 'static>(type_id: u64) -> Self {
        Self {
            type_id,
            type_name: Cow::Borrowed(core::any::type_name::<T>()),
            rust_type: Some(TypeId::of::<T>()),
        }
    }

    /// Returns the type id.
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> u64 {
        self.type_id
    }

    /// Returns the type name.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the Rust type behind the descriptor, or `None` for a foreign
    /// type.
    #[inline]
    #[must_use]
    pub fn rust_type(&self) -> Option<TypeId> {
        self.rust_type
    }

    /// Returns `true` if the descriptor was created for the Rust type `T`.
    #[inline]
    #[must_use]
    pub fn is_rust_type<T: 'static>(&self) -> bool {
        self.rust_type == Some(TypeId::of::<T>())
    }
}

impl core::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} (#{:#x})", self.type_name, self.type_id)
    }
}

/// Drops a `T` in place.
///
/// This is the [`Destructor`] installed for payloads created from a Rust value
/// through [`RawHandle::new`](crate::RawHandle::new).
pub(crate) extern "C" fn drop_in_place_destructor<T>(ptr: *mut c_void) {
    let ptr: *mut T = ptr.cast::<T>();
    // SAFETY: `RawHandle::new::<T>` pairs this destructor with a payload
    // allocation holding an initialized `T`, and `SharedState` calls the
    // destructor exactly once, before freeing that allocation.
    unsafe {
        core::ptr::drop_in_place(ptr);
    }
}

#[cfg(test)]
mod tests {
    use alloc::{format, string::String};

    use super::*;

    #[test]
    fn test_descriptor_equality_uses_id_and_name() {
        let a = TypeDescriptor::new_static(7, "a");
        let b = TypeDescriptor::new(7, String::from("a"));
        let c = TypeDescriptor::new_static(8, "a");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_descriptor_display() {
        let descriptor = TypeDescriptor::new_static(0x10, "app::Model");
        assert_eq!(format!("{descriptor}"), "app::Model (#0x10)");
    }

    #[test]
    fn test_rust_type_is_recorded() {
        let descriptor = TypeDescriptor::of_rust_type::<u32>(3);
        assert!(descriptor.is_rust_type::<u32>());
        assert!(!descriptor.is_rust_type::<i32>());
        assert_eq!(descriptor.type_name(), "u32");

        let foreign = TypeDescriptor::new_static(3, "u32");
        assert_eq!(foreign.rust_type(), None);
        assert!(!foreign.is_rust_type::<u32>());
        assert_ne!(descriptor, foreign);
    }
}
