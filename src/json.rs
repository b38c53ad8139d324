//! Per-type JSON codecs.
//!
//! A handle does not know how to serialize its payload: the payload type is
//! erased. Types that want to be serialized register a codec once with
//! [`register`]; afterwards any handle holding that type can be turned into a
//! JSON value with [`AnyHandle::to_json`], and a handle can be rebuilt from a
//! JSON value and a type id with [`from_json`].
//!
//! Types defined on the other side of the C boundary register a pair of
//! `extern "C"` functions instead, with [`register_foreign`] or
//! [`anyhandle_json_register`](crate::ffi::anyhandle_json_register). Those
//! exchange JSON as UTF-8 text.
//!
//! # Examples
//!
//! ```
//! use anyhandle::{AnyHandle, json, registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Settings {
//!     volume: u8,
//! }
//!
//! json::register::<Settings>();
//!
//! let handle = AnyHandle::new(Settings { volume: 3 });
//! let value = handle.to_json().unwrap();
//! assert_eq!(value, serde_json::json!({ "volume": 3 }));
//!
//! let restored = json::from_json(registry::type_id_of::<Settings>(), value).unwrap();
//! assert_eq!(*restored.try_borrow_shared::<Settings>().unwrap(), Settings { volume: 3 });
//! ```

use alloc::{string::String, vec::Vec};
use core::ffi::c_void;

use anyhandle_internals::{RawHandle, RawHandleRef, RawShared};
use hashbrown::HashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    AnyHandle,
    error::{BorrowKind, DowncastError},
    markers::SendSync,
    registry::{self, RegistryLock},
};

/// Serializes the payload behind a shared borrow.
type SerializeFn = fn(&RawShared) -> Result<Value, JsonError>;

/// Builds a new handle from a JSON value.
type DeserializeFn = fn(Value) -> Result<AnyHandle<SendSync>, serde_json::Error>;

/// Serializer of a foreign type.
///
/// Receives a pointer to the payload, which is borrowed for reading for the
/// duration of the call, and appends the JSON text of the payload to `sink`
/// with [`anyhandle_json_sink_write`](crate::ffi::anyhandle_json_sink_write).
/// The sink is an opaque pointer to a [`JsonSink`]. Returns `false` on
/// failure.
pub type ForeignSerializeFn = extern "C" fn(payload: *const c_void, sink: *mut c_void) -> bool;

/// Deserializer of a foreign type.
///
/// Receives `json_len` bytes of UTF-8 JSON text at `json_ptr`, builds a new
/// handle holding the decoded value (typically with
/// [`anyhandle_new_c`](crate::ffi::anyhandle_new_c)) and writes it to `out`.
/// Returns `false` on failure.
pub type ForeignDeserializeFn =
    extern "C" fn(json_ptr: *const u8, json_len: usize, out: *mut RawHandle) -> bool;

/// The pair of functions registered for one type.
#[derive(Clone, Copy)]
enum JsonCodec {
    /// A Rust type implementing the serde traits.
    Native {
        serialize: SerializeFn,
        deserialize: DeserializeFn,
    },
    /// A type whose codec lives on the other side of the C boundary.
    Foreign {
        serialize: ForeignSerializeFn,
        deserialize: ForeignDeserializeFn,
    },
}

type CodecMap = HashMap<u64, JsonCodec, rustc_hash::FxBuildHasher>;

static CODECS: RegistryLock<CodecMap> = RegistryLock::new();

/// Returns the codec registered for `type_id`, without holding the lock.
fn codec(type_id: u64) -> Option<JsonCodec> {
    CODECS.read().get()?.get(&type_id).copied()
}

/// Registers `codec` unless `type_id` already has one. Returns `true` if it
/// was registered.
fn insert_codec(type_id: u64, codec: JsonCodec) -> bool {
    let mut guard = CODECS.write();
    let codecs = guard.get();
    if codecs.contains_key(&type_id) {
        return false;
    }
    codecs.insert(type_id, codec);
    true
}

/// Buffer that a [`ForeignSerializeFn`] writes JSON text into.
#[derive(Debug, Default)]
pub struct JsonSink {
    bytes: Vec<u8>,
}

impl JsonSink {
    /// Appends raw bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Error returned when converting between handles and JSON fails.
#[derive(Debug)]
pub enum JsonError {
    /// No codec is registered for the payload type.
    NotRegistered {
        /// The type id without a codec.
        type_id: u64,
        /// The type name, if known.
        type_name: Option<String>,
    },
    /// The payload could not be borrowed for reading.
    Downcast(DowncastError),
    /// The codec itself failed.
    Serde(serde_json::Error),
    /// A foreign codec reported failure, or built a handle of another type.
    Foreign {
        /// The type id of the codec.
        type_id: u64,
    },
}

impl core::fmt::Display for JsonError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JsonError::NotRegistered {
                type_id,
                type_name: Some(type_name),
            } => write!(f, "no JSON codec registered for {type_name} (#{type_id:#x})"),
            JsonError::NotRegistered {
                type_id,
                type_name: None,
            } => write!(f, "no JSON codec registered for type #{type_id:#x}"),
            JsonError::Downcast(error) => write!(f, "cannot read payload: {error}"),
            JsonError::Serde(error) => write!(f, "JSON conversion failed: {error}"),
            JsonError::Foreign { type_id } => {
                write!(f, "foreign JSON codec for type #{type_id:#x} failed")
            }
        }
    }
}

impl core::error::Error for JsonError {}

impl From<DowncastError> for JsonError {
    fn from(error: DowncastError) -> Self {
        JsonError::Downcast(error)
    }
}

impl From<serde_json::Error> for JsonError {
    fn from(error: serde_json::Error) -> Self {
        JsonError::Serde(error)
    }
}

/// Serializes a payload, refusing anything that is not a `P`.
fn serialize<P: Serialize + 'static>(shared: &RawShared) -> Result<Value, JsonError> {
    let descriptor = shared.handle().descriptor();
    if !descriptor.is_rust_type::<P>() {
        return Err(DowncastError::TypeMismatch {
            expected: core::any::type_name::<P>(),
            found: descriptor.clone(),
        }
        .into());
    }

    // SAFETY: The descriptor records `P` as the Rust type of the payload, checked
    // above.
    let payload = unsafe { shared.downcast_unchecked::<P>() };
    Ok(serde_json::to_value(payload)?)
}

/// Deserializes a `P` and boxes it in a new handle.
fn deserialize<P>(value: Value) -> Result<AnyHandle<SendSync>, serde_json::Error>
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_value::<P>(value).map(AnyHandle::new)
}

/// Registers the JSON codec of `P`.
///
/// Registering the same type again replaces nothing and is harmless.
pub fn register<P>()
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let type_id = registry::type_id_of::<P>();
    let _ = insert_codec(
        type_id,
        JsonCodec::Native {
            serialize: serialize::<P>,
            deserialize: deserialize::<P>,
        },
    );

    #[cfg(feature = "tracing")]
    tracing::debug!(
        type_name = core::any::type_name::<P>(),
        type_id,
        "registered JSON codec"
    );
}

/// Registers the JSON codec of a foreign type.
///
/// Returns `false`, leaving the existing codec in place, if `type_id` already
/// has one.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `serialize` only reads the payload it is given, which is a value of
///    the type tagged with `type_id`.
/// 2. `deserialize` writes a live handle to `out` whenever it returns `true`,
///    and that payload is `Send + Sync`.
pub unsafe fn register_foreign(
    type_id: u64,
    serialize: ForeignSerializeFn,
    deserialize: ForeignDeserializeFn,
) -> bool {
    let registered = insert_codec(
        type_id,
        JsonCodec::Foreign {
            serialize,
            deserialize,
        },
    );

    #[cfg(feature = "tracing")]
    tracing::debug!(type_id, registered, "registered foreign JSON codec");

    registered
}

/// Returns `true` if a codec is registered for `type_id`.
#[must_use]
pub fn is_registered(type_id: u64) -> bool {
    codec(type_id).is_some()
}

/// Builds a new handle holding the value of type `type_id` described by
/// `value`.
pub fn from_json(type_id: u64, value: Value) -> Result<AnyHandle<SendSync>, JsonError> {
    let codec = codec(type_id).ok_or_else(|| JsonError::NotRegistered {
        type_id,
        type_name: registry::lookup(type_id).map(|descriptor| String::from(descriptor.type_name())),
    })?;

    match codec {
        JsonCodec::Native { deserialize, .. } => Ok(deserialize(value)?),
        JsonCodec::Foreign { deserialize, .. } => {
            let text = serde_json::to_vec(&value)?;
            let mut raw = RawHandle::dead();
            if !deserialize(text.as_ptr(), text.len(), &mut raw) {
                return Err(JsonError::Foreign { type_id });
            }
            if !raw.get().is_some_and(|handle| handle.is_type(type_id)) {
                return Err(JsonError::Foreign { type_id });
            }

            // SAFETY:
            // 1. The payload is `Send + Sync` (guaranteed by `register_foreign`).
            // 2. A foreign deserializer builds handles of the foreign type, whose
            //    descriptor records no Rust type.
            unsafe { AnyHandle::from_raw(raw) }.ok_or(JsonError::Foreign { type_id })
        }
    }
}

/// Serializes the payload behind `handle` with the codec of its type.
pub(crate) fn to_json_value(handle: RawHandleRef<'_>) -> Result<Value, JsonError> {
    let type_id = handle.type_id();
    let codec = codec(type_id).ok_or_else(|| JsonError::NotRegistered {
        type_id,
        type_name: Some(String::from(handle.type_name())),
    })?;

    let shared = handle
        .try_borrow_shared()
        .map_err(|state| DowncastError::BorrowConflict {
            requested: BorrowKind::Shared,
            state,
        })?;

    match codec {
        JsonCodec::Native { serialize, .. } => serialize(&shared),
        JsonCodec::Foreign { serialize, .. } => {
            let mut sink = JsonSink::default();
            let sink_ptr = (&raw mut sink).cast::<c_void>();
            if !serialize(shared.handle().data_ptr(), sink_ptr) {
                return Err(JsonError::Foreign { type_id });
            }
            Ok(serde_json::from_slice(sink.as_bytes())?)
        }
    }
}

impl<T> AnyHandle<T> {
    /// Returns `true` if a JSON codec is registered for the payload type.
    #[must_use]
    pub fn can_serialize(&self) -> bool {
        is_registered(self.type_id())
    }

    /// Serializes the payload to a JSON value.
    ///
    /// Fails if no codec is registered for the payload type or if the payload
    /// is exclusively borrowed.
    pub fn to_json(&self) -> Result<Value, JsonError> {
        to_json_value(self.as_raw_ref())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use serde::Deserialize;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_round_trip_through_handle() {
        register::<Point>();
        let handle = AnyHandle::new(Point { x: 1, y: 2 });
        assert!(handle.can_serialize());

        let value = handle.to_json().unwrap();
        let restored = from_json(handle.type_id(), value).unwrap();
        assert!(!restored.ptr_eq(&handle));
        assert_eq!(*restored.try_borrow_shared::<Point>().unwrap(), Point { x: 1, y: 2 });
    }

    #[test]
    fn test_unregistered_type() {
        struct Opaque;

        let handle = AnyHandle::new(Opaque);
        assert!(!handle.can_serialize());
        assert!(matches!(
            handle.to_json(),
            Err(JsonError::NotRegistered { type_name: Some(_), .. })
        ));
        assert!(matches!(
            from_json(handle.type_id(), Value::Null),
            Err(JsonError::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_exclusively_borrowed_payload() {
        register::<Point>();
        let handle = AnyHandle::new(Point { x: 0, y: 0 });
        let _view = handle.try_borrow_exclusive::<Point>().unwrap();
        assert!(matches!(handle.to_json(), Err(JsonError::Downcast(_))));
    }

    #[test]
    fn test_native_codec_refuses_foreign_payload() {
        extern "C" fn noop(_: *mut c_void) {}

        register::<Point>();
        let bytes = [0u8; 8];
        let descriptor = anyhandle_internals::TypeDescriptor::new(registry::type_id_of::<Point>(), "Point");

        // SAFETY: The bytes are plain data valid for the layout, the destructor
        // does nothing, and the descriptor records no Rust type.
        let handle: AnyHandle = unsafe {
            AnyHandle::adopt(
                bytes.as_ptr().cast::<c_void>(),
                core::alloc::Layout::new::<u64>(),
                descriptor,
                noop,
            )
        };
        assert!(handle.can_serialize());
        assert!(handle.try_borrow_shared::<Point>().is_none());
        assert!(matches!(
            handle.to_json(),
            Err(JsonError::Downcast(DowncastError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_invalid_json() {
        register::<Point>();
        let value = Value::Array(vec![]);
        assert!(matches!(
            from_json(registry::type_id_of::<Point>(), value),
            Err(JsonError::Serde(_))
        ));
    }
}
