//! The C-callable boundary.
//!
//! Every function here is `extern "C"` and unmangled, so foreign code can
//! create, clone, query and delete handles and borrow their payloads. A handle
//! crosses the boundary by value as a [`RawHandle`], a fixed-size
//! `#[repr(C)]` struct:
//!
//! ```c
//! typedef struct {
//!     void *payload;
//!     void *state;
//!     bool is_dead;
//! } AnyHandle;
//! ```
//!
//! Foreign code must treat the fields as opaque; it may read `is_dead`.
//!
//! # Lifecycle
//!
//! - [`anyhandle_new_c`] copies a payload into a new handle.
//! - [`anyhandle_clone`] returns another handle to the same payload.
//! - [`anyhandle_delete`] releases a handle and marks it dead. Deleting a dead
//!   handle is a no-op, so a double delete is harmless.
//!
//! # Borrowing
//!
//! The payload is accessed through an [`AnyHandleBorrow`] with the four
//! operations [`anyhandle_borrow_create`],
//! [`anyhandle_borrow_downcast_shared`],
//! [`anyhandle_borrow_downcast_exclusive`] and [`anyhandle_borrow_release`].
//! A borrow keeps the payload alive until it is released, even if every handle
//! is deleted first.
//!
//! # JSON
//!
//! With the `json` feature, foreign types can register JSON codecs with
//! `anyhandle_json_register`, and any handle whose type has a codec can be
//! converted with `anyhandle_to_json` and `anyhandle_from_json`.
//!
//! # Destructors
//!
//! A [`Destructor`] receives a pointer to the payload and must drop it in
//! place without freeing the memory. Since it is an `extern "C"` function, a
//! Rust panic inside it aborts the process.

use alloc::{borrow::Cow, boxed::Box, string::String};
use core::{alloc::Layout, ffi::c_void, ptr};

use anyhandle_internals::{Destructor, RawExclusive, RawHandle, RawHandleRef, RawShared, TypeDescriptor};

use crate::registry;

#[cfg(feature = "json")]
mod json;

#[cfg(feature = "json")]
pub use self::json::{
    AnyHandleJson, anyhandle_can_serialize, anyhandle_from_json, anyhandle_json_free,
    anyhandle_json_register, anyhandle_json_sink_write, anyhandle_to_json,
};

/// Reads a name passed across the boundary as a pointer and a length.
///
/// Invalid UTF-8 is replaced, a null pointer gives an empty name.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. If `name_ptr` is not null, it is valid for reads of `name_len` bytes.
unsafe fn read_name(name_ptr: *const u8, name_len: usize) -> String {
    if name_ptr.is_null() {
        return String::new();
    }

    // SAFETY: The pointer is non-null and valid for `name_len` bytes
    // (guaranteed by the caller).
    let bytes = unsafe { core::slice::from_raw_parts(name_ptr, name_len) };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Turns a handle pointer into a reference to the live handle.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. If `handle` is not null, it points to a valid [`RawHandle`] that stays
///    valid and is not mutated for `'a`.
unsafe fn live<'a>(handle: *const RawHandle) -> Option<RawHandleRef<'a>> {
    // SAFETY: The pointer is either null or valid for `'a` (guaranteed by the
    // caller).
    let handle: &'a RawHandle = unsafe { handle.as_ref() }?;
    handle.get()
}

/// Creates a handle by copying a foreign payload.
///
/// The `size` bytes at `ptr` are copied into a new allocation aligned to
/// `align`. From then on the copy is the payload: the caller must not drop the
/// original. `destructor` runs exactly once on the copy, when the last handle
/// and the last borrow are gone.
///
/// Returns a dead handle if `size` and `align` do not form a valid layout, or
/// if `ptr` is null and `size` is not zero. A rejected non-null payload is
/// still consumed: `destructor` runs on it in place before this returns, so
/// the caller must not drop it either way.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. If `size > 0`, `ptr` is valid for reads of `size` bytes.
/// 2. `destructor` can drop the value in place, and the value stays valid when
///    moved to another address.
/// 3. `type_id` uniquely identifies the type of the value. Ids handed out by
///    [`anyhandle_register_type`] or the addresses of statics are suitable.
/// 4. If `name_ptr` is not null, it is valid for reads of `name_len` bytes.
///    The name is copied.
/// 5. The value is `Send + Sync` if the handle will be used from more than
///    one thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_new_c(
    ptr: *const c_void,
    size: usize,
    align: usize,
    type_id: u64,
    name_ptr: *const u8,
    name_len: usize,
    destructor: Destructor,
) -> RawHandle {
    let Ok(layout) = Layout::from_size_align(size, align) else {
        if !ptr.is_null() {
            destructor(ptr.cast_mut());
        }
        return RawHandle::dead();
    };
    if ptr.is_null() && size != 0 {
        return RawHandle::dead();
    }

    // SAFETY: The name pointer is valid (requirement 4).
    let name = unsafe { read_name(name_ptr, name_len) };
    let descriptor = TypeDescriptor::new(type_id, name);

    // SAFETY:
    // 1. Guaranteed by requirement 1, and checked for null above.
    // 2. Guaranteed by requirement 2.
    // 3. The caller hands over the value by calling this function.
    // 4. Guaranteed by requirement 3.
    unsafe { RawHandle::adopt(ptr, layout, descriptor, destructor) }
}

/// Returns another handle to the same payload, or a dead handle if `handle`
/// is null or dead.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_clone(handle: *const RawHandle) -> RawHandle {
    // SAFETY: Guaranteed by the caller.
    match unsafe { live(handle) } {
        Some(handle) => handle.clone_handle(),
        None => RawHandle::dead(),
    }
}

/// Releases a handle and marks it dead.
///
/// If this was the last reference to the payload, its destructor runs before
/// this returns. Does nothing if `handle` is null or already dead.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`] that is not
///    accessed concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_delete(handle: *mut RawHandle) {
    // SAFETY: The pointer is null or valid and unaliased (guaranteed by the
    // caller).
    if let Some(handle) = unsafe { handle.as_mut() } {
        handle.release();
    }
}

/// Returns `true` if the payload is tagged with `type_id`. Returns `false` for
/// a null or dead handle.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_is_type(handle: *const RawHandle, type_id: u64) -> bool {
    // SAFETY: Guaranteed by the caller.
    unsafe { live(handle) }.is_some_and(|handle| handle.is_type(type_id))
}

/// Returns the type id of the payload, or `0` for a null or dead handle.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_get_type_id(handle: *const RawHandle) -> u64 {
    // SAFETY: Guaranteed by the caller.
    unsafe { live(handle) }.map_or(0, RawHandleRef::type_id)
}

/// Returns the UTF-8 type name of the payload and writes its length to
/// `out_len`.
///
/// The returned pointer is valid as long as some reference to the payload is
/// alive. It is not NUL-terminated. For a null or dead handle, returns null and
/// writes `0`.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
/// 2. `out_len` is null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_get_type_name(
    handle: *const RawHandle,
    out_len: *mut usize,
) -> *const u8 {
    // SAFETY: Guaranteed by the caller.
    let (name_ptr, name_len) = match unsafe { live(handle) } {
        Some(handle) => {
            let name = handle.type_name();
            (name.as_ptr(), name.len())
        }
        None => (ptr::null(), 0),
    };

    if !out_len.is_null() {
        // SAFETY: The pointer is non-null and valid for writes (guaranteed by the
        // caller).
        unsafe { out_len.write(name_len) };
    }
    name_ptr
}

/// Returns the number of live references to the payload (handles plus
/// borrows), or `0` for a null or dead handle.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_get_ref_count(handle: *const RawHandle) -> usize {
    // SAFETY: Guaranteed by the caller.
    unsafe { live(handle) }.map_or(0, RawHandleRef::handle_count)
}

/// Returns the payload pointer, or null for a null or dead handle.
///
/// Reading through the pointer is only sound while holding a borrow created by
/// [`anyhandle_borrow_downcast_shared`] or
/// [`anyhandle_borrow_downcast_exclusive`].
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_get_data_ptr(handle: *const RawHandle) -> *const c_void {
    // SAFETY: Guaranteed by the caller.
    unsafe { live(handle) }.map_or(ptr::null(), RawHandleRef::data_ptr)
}

/// Registers a foreign type and returns its new, process-wide unique id.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. If `name_ptr` is not null, it is valid for reads of `name_len` bytes.
///    The name is copied.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_register_type(name_ptr: *const u8, name_len: usize) -> u64 {
    // SAFETY: Guaranteed by the caller.
    let name = unsafe { read_name(name_ptr, name_len) };
    registry::register_foreign(Cow::Owned(name)).type_id()
}

/// The untyped token behind an active [`AnyHandleBorrow`].
enum BorrowToken {
    /// A shared borrow.
    Shared(RawShared),
    /// An exclusive borrow.
    Exclusive(RawExclusive),
}

/// A borrow of a payload, as seen from the C side.
///
/// Created empty by [`anyhandle_borrow_create`], filled by one of the downcast
/// functions and emptied again by [`anyhandle_borrow_release`]. While it is
/// filled, `data` points to the payload; it is read-only unless
/// `is_exclusive` is set. A borrow owned by Rust code is also released when it
/// is dropped.
///
/// ```c
/// typedef struct {
///     void *data;
///     void *token;
///     bool is_exclusive;
/// } AnyHandleBorrow;
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct AnyHandleBorrow {
    /// The payload, or null while the borrow is empty.
    data: *mut c_void,
    /// A `Box<BorrowToken>` turned into a pointer, or null while the borrow is
    /// empty.
    token: *mut c_void,
    /// Whether the borrow allows writes.
    is_exclusive: bool,
}

impl AnyHandleBorrow {
    /// An empty borrow.
    const EMPTY: Self = Self {
        data: ptr::null_mut(),
        token: ptr::null_mut(),
        is_exclusive: false,
    };

    /// Returns the payload pointer, or null while the borrow is empty.
    #[must_use]
    pub fn data(&self) -> *mut c_void {
        self.data
    }

    /// Returns `true` while the borrow holds a token.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_null()
    }

    /// Returns `true` if the borrow allows writes.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    /// Fills the borrow with `token`.
    fn fill(&mut self, token: BorrowToken) {
        let (data, is_exclusive) = match &token {
            BorrowToken::Shared(shared) => (shared.handle().data_ptr(), false),
            BorrowToken::Exclusive(exclusive) => (exclusive.handle().data_ptr(), true),
        };
        self.data = data.cast_mut();
        self.is_exclusive = is_exclusive;
        self.token = Box::into_raw(Box::new(token)).cast::<c_void>();
    }

    /// Drops the token, if any, and empties the borrow.
    fn clear(&mut self) {
        let token = core::mem::replace(&mut self.token, ptr::null_mut());
        self.data = ptr::null_mut();
        self.is_exclusive = false;
        if token.is_null() {
            return;
        }

        // SAFETY: A non-null token was created by `Box::into_raw` in `fill`, and the
        // token field was reset above, so it is turned back into a box exactly once.
        let token = unsafe { Box::from_raw(token.cast::<BorrowToken>()) };
        core::mem::drop(token);
    }
}

impl Drop for AnyHandleBorrow {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for AnyHandleBorrow {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Returns an empty borrow.
#[unsafe(no_mangle)]
pub extern "C" fn anyhandle_borrow_create() -> AnyHandleBorrow {
    AnyHandleBorrow::EMPTY
}

/// Shared step of the two downcast functions.
///
/// # Safety
///
/// Same requirements as [`anyhandle_borrow_downcast_shared`].
unsafe fn downcast(
    handle: *const RawHandle,
    type_id: u64,
    borrow: *mut AnyHandleBorrow,
    acquire: impl FnOnce(RawHandleRef<'_>) -> Option<BorrowToken>,
) -> bool {
    // SAFETY: The pointer is null or valid and unaliased (guaranteed by the
    // caller).
    let Some(borrow) = (unsafe { borrow.as_mut() }) else {
        return false;
    };
    if borrow.is_active() {
        return false;
    }
    // SAFETY: Guaranteed by the caller.
    let Some(handle) = (unsafe { live(handle) }) else {
        return false;
    };
    if !handle.is_type(type_id) {
        return false;
    }

    match acquire(handle) {
        Some(token) => {
            borrow.fill(token);
            true
        }
        None => false,
    }
}

/// Fills `borrow` with a read-only borrow of the payload.
///
/// Returns `false`, leaving `borrow` unchanged, if any pointer is null, the
/// handle is dead, the payload is not tagged with `type_id`, the payload is
/// exclusively borrowed, or `borrow` is already filled.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
/// 2. `borrow` is null or points to a valid [`AnyHandleBorrow`] that is not
///    accessed concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_borrow_downcast_shared(
    handle: *const RawHandle,
    type_id: u64,
    borrow: *mut AnyHandleBorrow,
) -> bool {
    // SAFETY: Guaranteed by the caller.
    unsafe {
        downcast(handle, type_id, borrow, |handle| {
            handle.try_borrow_shared().ok().map(BorrowToken::Shared)
        })
    }
}

/// Fills `borrow` with a read-write borrow of the payload.
///
/// Returns `false`, leaving `borrow` unchanged, if any pointer is null, the
/// handle is dead, the payload is not tagged with `type_id`, any other borrow
/// exists, or `borrow` is already filled.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
/// 2. `borrow` is null or points to a valid [`AnyHandleBorrow`] that is not
///    accessed concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_borrow_downcast_exclusive(
    handle: *const RawHandle,
    type_id: u64,
    borrow: *mut AnyHandleBorrow,
) -> bool {
    // SAFETY: Guaranteed by the caller.
    unsafe {
        downcast(handle, type_id, borrow, |handle| {
            handle.try_borrow_exclusive().ok().map(BorrowToken::Exclusive)
        })
    }
}

/// Ends the borrow and empties `borrow`.
///
/// If the borrow held the last reference to the payload, the destructor runs
/// before this returns. Does nothing if `borrow` is null or empty.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `borrow` is null or points to a valid [`AnyHandleBorrow`] that is not
///    accessed concurrently.
/// 2. The `data` pointer of the borrow is not used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_borrow_release(borrow: *mut AnyHandleBorrow) {
    // SAFETY: Guaranteed by the caller.
    if let Some(borrow) = unsafe { borrow.as_mut() } {
        borrow.clear();
    }
}

#[cfg(test)]
mod tests {
    use core::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn test_borrow_layout() {
        assert_eq!(offset_of!(AnyHandleBorrow, data), 0);
        assert_eq!(offset_of!(AnyHandleBorrow, token), size_of::<*const u8>());
        assert_eq!(
            offset_of!(AnyHandleBorrow, is_exclusive),
            2 * size_of::<*const u8>()
        );
    }

    #[test]
    fn test_null_pointers_are_ignored() {
        // SAFETY: Null pointers are accepted by every function.
        unsafe {
            anyhandle_delete(ptr::null_mut());
        }
        // SAFETY: Null pointers are accepted by every function.
        assert!(unsafe { anyhandle_clone(ptr::null()) }.is_dead());
        // SAFETY: Null pointers are accepted by every function.
        assert_eq!(unsafe { anyhandle_get_ref_count(ptr::null()) }, 0);
        // SAFETY: Null pointers are accepted by every function.
        assert!(!unsafe { anyhandle_is_type(ptr::null(), 0) });
        // SAFETY: Null pointers are accepted by every function.
        unsafe {
            anyhandle_borrow_release(ptr::null_mut());
        }
    }

    #[test]
    fn test_invalid_layout_gives_dead_handle() {
        extern "C" fn noop(_: *mut c_void) {}

        let value = 0u32;
        // SAFETY: The layout is rejected and the destructor ignores the pointer.
        let handle = unsafe {
            anyhandle_new_c(
                (&raw const value).cast::<c_void>(),
                4,
                3,
                1,
                ptr::null(),
                0,
                noop,
            )
        };
        assert!(handle.is_dead());

        // SAFETY: The null payload is rejected before anything is read.
        let handle = unsafe { anyhandle_new_c(ptr::null(), 4, 4, 1, ptr::null(), 0, noop) };
        assert!(handle.is_dead());
    }
}
