//! Integration tests for the anyhandle-internals crate.
//!
//! ## Handle Tests
//! - `test_handle_creation_and_basic_operations`: creation, type queries and
//!   payload access
//! - `test_clone_and_release_counts`: handle count bookkeeping
//! - `test_destructor_runs_exactly_once`: drop tracking across clones
//! - `test_zero_sized_payload`: dangling payloads still run their destructor
//! - `test_adopt_foreign_payload`: copying raw bytes with a custom destructor
//!
//! ## Borrow Tests
//! - `test_shared_borrows_coexist`: many readers
//! - `test_exclusive_borrow_is_exclusive`: one writer
//! - `test_token_outlives_handle`: tokens keep the payload alive
//! - `test_mutation_through_exclusive_token`: writes are visible afterwards

use core::{
    alloc::Layout,
    ffi::c_void,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::sync::Arc;

use anyhandle_internals::{BorrowState, RawHandle, TypeDescriptor};

/// Payload that counts how many times it was dropped.
struct DropTracker {
    value: u32,
    drops: Arc<AtomicUsize>,
}

impl Drop for DropTracker {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracker(value: u32) -> (DropTracker, Arc<AtomicUsize>) {
    let drops = Arc::new(AtomicUsize::new(0));
    (
        DropTracker {
            value,
            drops: drops.clone(),
        },
        drops,
    )
}

const TRACKER: TypeDescriptor = TypeDescriptor::new_static(1, "DropTracker");

#[test]
fn test_handle_creation_and_basic_operations() {
    let handle = RawHandle::new(String::from("payload"), TypeDescriptor::new_static(42, "String"));
    let handle_ref = handle.get().unwrap();

    assert!(!handle.is_dead());
    assert_eq!(handle_ref.type_id(), 42);
    assert_eq!(handle_ref.type_name(), "String");
    assert!(handle_ref.is_type(42));
    assert!(!handle_ref.is_type(43));
    assert_eq!(handle_ref.layout(), Layout::new::<String>());
    assert_eq!(handle_ref.handle_count(), 1);
    assert_eq!(handle_ref.borrow_state(), BorrowState::Unborrowed);

    let shared = handle_ref.try_borrow_shared().unwrap();
    // SAFETY: The payload is a `String`.
    let value = unsafe { shared.downcast_unchecked::<String>() };
    assert_eq!(value, "payload");
}

#[test]
fn test_clone_and_release_counts() {
    let mut first = RawHandle::new(1u64, TypeDescriptor::new_static(2, "u64"));
    let mut second = first.get().unwrap().clone_handle();
    let third = second.get().unwrap().clone_handle();

    assert_eq!(third.get().unwrap().handle_count(), 3);
    assert!(first.get().unwrap().ptr_eq(third.get().unwrap()));

    first.release();
    assert!(first.is_dead());
    assert_eq!(third.get().unwrap().handle_count(), 2);

    // Releasing twice is a no-op.
    first.release();
    assert_eq!(third.get().unwrap().handle_count(), 2);

    second.release();
    assert_eq!(third.get().unwrap().handle_count(), 1);
}

#[test]
fn test_destructor_runs_exactly_once() {
    let (payload, drops) = tracker(42);
    let handle = RawHandle::new(payload, TRACKER);
    let clones: Vec<RawHandle> = (0..8).map(|_| handle.get().unwrap().clone_handle()).collect();

    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    for (index, clone) in clones.into_iter().enumerate() {
        assert_eq!(clone.get().unwrap().handle_count(), 8 - index);
        drop(clone);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_sized_payload() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Unit;

    impl Drop for Unit {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handle = RawHandle::new(Unit, TypeDescriptor::new_static(3, "Unit"));
    let handle_ref = handle.get().unwrap();
    assert_eq!(handle_ref.layout().size(), 0);
    assert!(!handle_ref.data_ptr().is_null());

    let exclusive = handle_ref.try_borrow_exclusive().unwrap();
    drop(exclusive);
    drop(handle);
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_adopt_foreign_payload() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    #[repr(C)]
    struct Point {
        x: i32,
        y: i32,
    }

    extern "C" fn destroy_point(ptr: *mut c_void) {
        // SAFETY: The destructor is only installed for `Point` payloads.
        let point = unsafe { &*ptr.cast::<Point>() };
        DESTROYED.fetch_add((point.x + point.y) as usize, Ordering::SeqCst);
    }

    let original = Point { x: 3, y: 4 };
    // SAFETY: `Point` is plain data, the pointer is valid for its size and the
    // destructor matches the payload.
    let handle = unsafe {
        RawHandle::adopt(
            (&raw const original).cast::<c_void>(),
            Layout::new::<Point>(),
            TypeDescriptor::new(0x1000, String::from("Point")),
            destroy_point,
        )
    };

    let handle_ref = handle.get().unwrap();
    assert_ne!(handle_ref.data_ptr(), (&raw const original).cast::<c_void>());
    assert_eq!(handle_ref.type_name(), "Point");

    let shared = handle_ref.try_borrow_shared().unwrap();
    // SAFETY: The payload is a `Point`.
    let point = unsafe { shared.downcast_unchecked::<Point>() };
    assert_eq!((point.x, point.y), (3, 4));

    drop(shared);
    drop(handle);
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 7);
}

#[test]
fn test_shared_borrows_coexist() {
    let handle = RawHandle::new(7i32, TypeDescriptor::new_static(4, "i32"));
    let handle_ref = handle.get().unwrap();

    let first = handle_ref.try_borrow_shared().unwrap();
    let second = handle_ref.try_borrow_shared().unwrap();
    let third = first.try_clone().unwrap();

    assert_eq!(handle_ref.borrow_state().shared_count(), 3);
    assert_eq!(handle_ref.handle_count(), 4);
    assert!(matches!(
        handle_ref.try_borrow_exclusive(),
        Err(BorrowState::Shared(count)) if count.get() == 3
    ));

    drop((first, second, third));
    assert!(handle_ref.borrow_state().is_unborrowed());
    assert_eq!(handle_ref.handle_count(), 1);
}

#[test]
fn test_exclusive_borrow_is_exclusive() {
    let handle = RawHandle::new(7i32, TypeDescriptor::new_static(4, "i32"));
    let clone = handle.get().unwrap().clone_handle();

    let exclusive = handle.get().unwrap().try_borrow_exclusive().unwrap();
    let other = clone.get().unwrap();
    assert_eq!(other.borrow_state(), BorrowState::Exclusive);
    assert_eq!(other.borrow_state().exclusive_count(), 1);
    assert!(matches!(other.try_borrow_shared(), Err(BorrowState::Exclusive)));
    assert!(matches!(other.try_borrow_exclusive(), Err(BorrowState::Exclusive)));

    drop(exclusive);
    assert!(other.try_borrow_exclusive().is_ok());
}

#[test]
fn test_token_outlives_handle() {
    let (payload, drops) = tracker(9);
    let handle = RawHandle::new(payload, TRACKER);
    let shared = handle.get().unwrap().try_borrow_shared().unwrap();

    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(shared.handle().handle_count(), 1);

    // SAFETY: The payload is a `DropTracker`.
    assert_eq!(unsafe { shared.downcast_unchecked::<DropTracker>() }.value, 9);

    drop(shared);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_mutation_through_exclusive_token() {
    let handle = RawHandle::new(vec![1, 2, 3], TypeDescriptor::new_static(5, "Vec<i32>"));

    {
        let mut exclusive = handle.get().unwrap().try_borrow_exclusive().unwrap();
        // SAFETY: The payload is a `Vec<i32>`.
        unsafe { exclusive.downcast_mut_unchecked::<Vec<i32>>() }.push(4);
    }

    let shared = handle.get().unwrap().try_borrow_shared().unwrap();
    // SAFETY: The payload is a `Vec<i32>`.
    assert_eq!(unsafe { shared.downcast_unchecked::<Vec<i32>>() }, &[1, 2, 3, 4]);
}
