//! Process-wide registry of payload types.
//!
//! Every payload stored in an [`AnyHandle`](crate::AnyHandle) carries a
//! [`TypeDescriptor`]: a `u64` id plus a name. This module hands out those
//! descriptors.
//!
//! - Rust types are registered lazily, the first time a descriptor for them is
//!   requested, keyed by [`core::any::TypeId`]. Asking again returns the same
//!   descriptor.
//! - Foreign types (for example types defined on the other side of the C
//!   boundary) are registered with [`register_foreign`], which always assigns a
//!   fresh id.
//!
//! Ids handed out here have [`REGISTRY_ID_TAG`] set. Callers that build their
//! own [`TypeDescriptor`]s (for example from the address of a static) should
//! keep that bit clear so the two id spaces never collide. On every platform
//! this crate supports, user-space addresses never have the top bit set.
//!
//! Registration never fails.
//!
//! # Examples
//!
//! ```
//! use anyhandle::registry;
//!
//! struct Model;
//!
//! let first = registry::descriptor_of::<Model>();
//! let second = registry::descriptor_of::<Model>();
//! assert_eq!(first, second);
//! assert_ne!(first.type_id(), registry::type_id_of::<u32>());
//! assert!(first.type_name().ends_with("Model"));
//!
//! let foreign = registry::register_foreign("CppWidget");
//! assert_eq!(registry::lookup(foreign.type_id()), Some(foreign));
//! ```

mod lock;

use alloc::{borrow::Cow, vec::Vec};
use core::{
    any::TypeId,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhandle_internals::TypeDescriptor;
use hashbrown::HashMap;
use indexmap::IndexMap;

pub(crate) use self::lock::RegistryLock;

/// Bit set on every id assigned by this registry.
pub const REGISTRY_ID_TAG: u64 = 1 << 63;

/// Registered descriptors, by Rust type and by id.
#[derive(Default)]
struct Registry {
    /// Descriptors of Rust types, keyed by their `TypeId`.
    by_rust_type: HashMap<TypeId, TypeDescriptor, rustc_hash::FxBuildHasher>,
    /// Every descriptor handed out, in registration order.
    by_id: IndexMap<u64, TypeDescriptor, rustc_hash::FxBuildHasher>,
}

static REGISTRY: RegistryLock<Registry> = RegistryLock::new();

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out the next registry id.
fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed) | REGISTRY_ID_TAG
}

/// Returns the descriptor of the Rust type `P`, registering it on first use.
///
/// The name is [`core::any::type_name`] of `P`. The descriptor records the
/// [`TypeId`] of `P`, which is what typed downcasts compare against, so the
/// registry is only consulted when a handle is created.
#[must_use]
pub fn descriptor_of<P: 'static>() -> TypeDescriptor {
    let rust_type = TypeId::of::<P>();
    if let Some(descriptor) = REGISTRY
        .read()
        .get()
        .and_then(|registry| registry.by_rust_type.get(&rust_type))
    {
        return descriptor.clone();
    }

    let descriptor = {
        let mut guard = REGISTRY.write();
        let registry = guard.get();
        // Another thread may have registered `P` between the two lock acquisitions.
        if let Some(descriptor) = registry.by_rust_type.get(&rust_type) {
            return descriptor.clone();
        }

        let descriptor = TypeDescriptor::of_rust_type::<P>(next_id());
        registry.by_rust_type.insert(rust_type, descriptor.clone());
        registry.by_id.insert(descriptor.type_id(), descriptor.clone());
        descriptor
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        type_name = descriptor.type_name(),
        type_id = descriptor.type_id(),
        "registered type"
    );

    descriptor
}

/// Returns the type id of the Rust type `P`, registering it on first use.
#[inline]
#[must_use]
pub fn type_id_of<P: 'static>() -> u64 {
    descriptor_of::<P>().type_id()
}

/// Registers a type that has no Rust counterpart and returns its descriptor.
///
/// Each call assigns a new id, even for a name that was registered before:
/// names are only used for diagnostics.
pub fn register_foreign(type_name: impl Into<Cow<'static, str>>) -> TypeDescriptor {
    let descriptor = TypeDescriptor::new(next_id(), type_name);
    REGISTRY
        .write()
        .get()
        .by_id
        .insert(descriptor.type_id(), descriptor.clone());

    #[cfg(feature = "tracing")]
    tracing::debug!(
        type_name = descriptor.type_name(),
        type_id = descriptor.type_id(),
        "registered foreign type"
    );

    descriptor
}

/// Returns the descriptor registered under `type_id`, if any.
///
/// Descriptors that callers built themselves are not known to the registry.
#[must_use]
pub fn lookup(type_id: u64) -> Option<TypeDescriptor> {
    REGISTRY.read().get()?.by_id.get(&type_id).cloned()
}

/// Returns every registered descriptor, in registration order.
#[must_use]
pub fn registered() -> Vec<TypeDescriptor> {
    REGISTRY
        .read()
        .get()
        .map(|registry| registry.by_id.values().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct First;
    struct Second;

    #[test]
    fn test_rust_types_get_stable_distinct_ids() {
        let first = descriptor_of::<First>();
        let second = descriptor_of::<Second>();

        assert_eq!(first, descriptor_of::<First>());
        assert_ne!(first.type_id(), second.type_id());
        assert_ne!(first.type_id() & REGISTRY_ID_TAG, 0);
        assert_eq!(first.type_name(), core::any::type_name::<First>());
        assert!(first.is_rust_type::<First>());
        assert_eq!(register_foreign("First").rust_type(), None);
    }

    #[test]
    fn test_foreign_types_always_get_fresh_ids() {
        let a = register_foreign("Widget");
        let b = register_foreign("Widget");
        assert_ne!(a.type_id(), b.type_id());
        assert_eq!(lookup(a.type_id()).as_ref(), Some(&a));
        assert_eq!(lookup(b.type_id()).as_ref(), Some(&b));
    }

    #[test]
    fn test_registered_keeps_order() {
        let a = register_foreign("registered_keeps_order::A");
        let b = register_foreign("registered_keeps_order::B");
        let all = registered();

        let position_a = all.iter().position(|d| *d == a).unwrap();
        let position_b = all.iter().position(|d| *d == b).unwrap();
        assert!(position_a < position_b);
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(lookup(0), None);
    }

    #[test]
    fn test_downcast_does_not_wait_for_registry() {
        use std::{sync::mpsc, thread, time::Duration};

        use crate::AnyHandle;

        let handle = AnyHandle::new(7u32);
        let clone = handle.clone();

        let guard = REGISTRY.write();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::spawn(move || {
            let value = clone.try_borrow_shared::<u32>().map(|value| *value);
            let mismatch = clone.borrow_exclusive::<i64>().map(|_| ());
            let is_u32 = clone.is::<u32>();
            let _ = sender.send((value, mismatch, is_u32));
        });

        let outcome = receiver.recv_timeout(Duration::from_secs(5));
        drop(guard);
        worker.join().unwrap();

        let (value, mismatch, is_u32) = outcome.unwrap();
        assert_eq!(value, Some(7));
        assert!(mismatch.unwrap_err().is_type_mismatch());
        assert!(is_u32);
    }
}
