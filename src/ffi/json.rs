//! JSON codecs across the C boundary.

use alloc::boxed::Box;
use core::{ffi::c_void, ptr};

use anyhandle_internals::RawHandle;

use super::live;
use crate::json::{self, ForeignDeserializeFn, ForeignSerializeFn, JsonSink};

/// JSON text owned by this library, handed out by [`anyhandle_to_json`].
///
/// The text is UTF-8 and not NUL-terminated. It must be freed with
/// [`anyhandle_json_free`].
///
/// ```c
/// typedef struct {
///     uint8_t *ptr;
///     size_t len;
/// } AnyHandleJson;
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct AnyHandleJson {
    /// The text, or null if there is none.
    ptr: *mut u8,
    /// Length of the text in bytes.
    len: usize,
}

impl AnyHandleJson {
    /// JSON that holds no text.
    const EMPTY: Self = Self {
        ptr: ptr::null_mut(),
        len: 0,
    };

    /// Takes ownership of `bytes`.
    fn from_bytes(bytes: Box<[u8]>) -> Self {
        let len = bytes.len();
        Self {
            ptr: Box::into_raw(bytes).cast::<u8>(),
            len,
        }
    }

    /// Returns the text, or `None` if there is none.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if self.ptr.is_null() {
            return None;
        }
        // SAFETY: A non-null pointer came from `Box::into_raw` of a `len`-byte slice
        // in `from_bytes`, and is only freed through `&mut self`.
        Some(unsafe { core::slice::from_raw_parts(self.ptr, self.len) })
    }

    /// Frees the text, if any.
    fn clear(&mut self) {
        let bytes = core::mem::replace(&mut self.ptr, ptr::null_mut());
        let len = core::mem::replace(&mut self.len, 0);
        if bytes.is_null() {
            return;
        }

        // SAFETY: A non-null pointer came from `Box::into_raw` of a `len`-byte slice,
        // and the pointer field was reset above, so the box is rebuilt exactly once.
        let bytes = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(bytes, len)) };
        core::mem::drop(bytes);
    }
}

impl Drop for AnyHandleJson {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for AnyHandleJson {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Registers the JSON codec of the type tagged with `type_id`.
///
/// Returns `false`, leaving the existing codec in place, if the type already
/// has one.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `serialize` only reads the payload it is given.
/// 2. `deserialize` writes a live handle of the type tagged with `type_id` to
///    `out` whenever it returns `true`.
/// 3. The payloads are `Send + Sync`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_json_register(
    type_id: u64,
    serialize: ForeignSerializeFn,
    deserialize: ForeignDeserializeFn,
) -> bool {
    // SAFETY: Guaranteed by the caller.
    unsafe { json::register_foreign(type_id, serialize, deserialize) }
}

/// Appends `len` bytes of JSON text to `sink`. Called from inside a
/// serializer. Returns `false` if a pointer is null.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `sink` is null or the sink pointer passed to the running serializer.
/// 2. If `bytes` is not null, it is valid for reads of `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_json_sink_write(
    sink: *mut c_void,
    bytes: *const u8,
    len: usize,
) -> bool {
    // SAFETY: The pointer is null or points to the live `JsonSink` of the running
    // serializer (guaranteed by the caller).
    let Some(sink) = (unsafe { sink.cast::<JsonSink>().as_mut() }) else {
        return false;
    };
    if bytes.is_null() {
        return len == 0;
    }

    // SAFETY: The pointer is non-null and valid for `len` bytes (guaranteed by
    // the caller).
    sink.write(unsafe { core::slice::from_raw_parts(bytes, len) });
    true
}

/// Returns `true` if a JSON codec is registered for the payload type. Returns
/// `false` for a null or dead handle.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_can_serialize(handle: *const RawHandle) -> bool {
    // SAFETY: Guaranteed by the caller.
    unsafe { live(handle) }.is_some_and(|handle| json::is_registered(handle.type_id()))
}

/// Serializes the payload to JSON text and stores it in `out`.
///
/// Returns `false`, leaving `out` empty, if a pointer is null, the handle is
/// dead, the type has no codec, the payload is exclusively borrowed, or the
/// codec fails. Text already held by `out` is freed first.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `handle` is null or points to a valid [`RawHandle`].
/// 2. `out` is null or points to a valid [`AnyHandleJson`] that is not
///    accessed concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_to_json(
    handle: *const RawHandle,
    out: *mut AnyHandleJson,
) -> bool {
    // SAFETY: The pointer is null or valid and unaliased (guaranteed by the
    // caller).
    let Some(out) = (unsafe { out.as_mut() }) else {
        return false;
    };
    out.clear();

    // SAFETY: Guaranteed by the caller.
    let Some(handle) = (unsafe { live(handle) }) else {
        return false;
    };
    let Ok(value) = json::to_json_value(handle) else {
        return false;
    };
    let Ok(text) = serde_json::to_vec(&value) else {
        return false;
    };

    *out = AnyHandleJson::from_bytes(text.into_boxed_slice());
    true
}

/// Frees the text held by `json` and leaves it empty. Does nothing if `json`
/// is null or empty.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `json` is null or points to a valid [`AnyHandleJson`] that is not
///    accessed concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_json_free(json: *mut AnyHandleJson) {
    // SAFETY: Guaranteed by the caller.
    if let Some(json) = unsafe { json.as_mut() } {
        json.clear();
    }
}

/// Builds a new handle of the type tagged with `type_id` from `json_len`
/// bytes of JSON text.
///
/// Returns a dead handle if the text is not valid JSON, the type has no codec,
/// or the codec fails.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. If `json_ptr` is not null, it is valid for reads of `json_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyhandle_from_json(
    type_id: u64,
    json_ptr: *const u8,
    json_len: usize,
) -> RawHandle {
    if json_ptr.is_null() {
        return RawHandle::dead();
    }

    // SAFETY: The pointer is non-null and valid for `json_len` bytes (guaranteed
    // by the caller).
    let text = unsafe { core::slice::from_raw_parts(json_ptr, json_len) };
    let Ok(value) = serde_json::from_slice(text) else {
        return RawHandle::dead();
    };

    match json::from_json(type_id, value) {
        Ok(handle) => handle.into_raw(),
        Err(_) => RawHandle::dead(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_layout() {
        assert_eq!(core::mem::offset_of!(AnyHandleJson, ptr), 0);
        assert_eq!(
            core::mem::offset_of!(AnyHandleJson, len),
            core::mem::size_of::<*const u8>()
        );
    }

    #[test]
    fn test_sink_write_rejects_null() {
        let mut sink = JsonSink::default();
        let sink_ptr = (&raw mut sink).cast::<c_void>();

        // SAFETY: Null pointers are accepted.
        assert!(!unsafe { anyhandle_json_sink_write(ptr::null_mut(), b"1".as_ptr(), 1) });
        // SAFETY: The sink is a live local; null bytes are accepted.
        assert!(unsafe { anyhandle_json_sink_write(sink_ptr, ptr::null(), 0) });
        // SAFETY: The sink is a live local; null bytes are accepted.
        assert!(!unsafe { anyhandle_json_sink_write(sink_ptr, ptr::null(), 1) });
        // SAFETY: The sink is a live local and the bytes are valid for 3 bytes.
        assert!(unsafe { anyhandle_json_sink_write(sink_ptr, b"[1]".as_ptr(), 3) });
        assert_eq!(sink.as_bytes(), b"[1]");
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut json = AnyHandleJson::from_bytes(Box::from(&b"null"[..]));
        assert_eq!(json.as_bytes(), Some(&b"null"[..]));
        // SAFETY: The value is a live local.
        unsafe { anyhandle_json_free(&mut json) };
        // SAFETY: The value is a live local.
        unsafe { anyhandle_json_free(&mut json) };
        assert_eq!(json.as_bytes(), None);
    }
}
