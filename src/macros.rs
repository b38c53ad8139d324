/// Generates the runtime type information module of a payload type.
///
/// `reflect!(Type)` expands to a module named `<type>_rtti` (the type name in
/// snake case) with the operations a callback site needs:
///
/// - `type_id()` / `type_name()`: the descriptor of `Type`, registered on
///   first use.
/// - `upcast(value)`: boxes a `Type` into a new handle.
/// - `create(&handle)`: a new handle to the same payload, for a callback site
///   that will downcast it later.
/// - `downcast_shared(&handle)` / `downcast_exclusive(&handle)`: typed views,
///   or `None` on a type mismatch or a borrow conflict.
/// - `release(view)`: ends a view early.
///
/// `reflect!(Type, json)` additionally generates `register_json()`, which
/// registers the JSON codec of `Type`. This requires the `json` feature.
///
/// Several types can be listed at once: `reflect!(A, B, C)`.
///
/// The generated module refers to the type as `super::Type`, so the macro
/// must be invoked in the module that defines the type, outside of function
/// bodies.
///
/// # Examples
///
/// ```
/// use anyhandle::{AnyHandle, reflect};
///
/// #[derive(Debug, PartialEq)]
/// pub struct DataModel {
///     counter: u32,
/// }
///
/// reflect!(DataModel);
///
/// # fn main() {
/// let handle: AnyHandle = data_model_rtti::upcast(DataModel { counter: 5 });
/// let for_callback = data_model_rtti::create(&handle);
///
/// let mut model = data_model_rtti::downcast_exclusive(&for_callback).unwrap();
/// model.counter += 1;
/// assert!(data_model_rtti::downcast_shared(&handle).is_none());
/// data_model_rtti::release(model);
///
/// assert_eq!(data_model_rtti::downcast_shared(&handle).unwrap().counter, 6);
/// assert_eq!(handle.type_id(), data_model_rtti::type_id());
/// # }
/// ```
#[macro_export]
macro_rules! reflect {
    (@module $ty:ident, { $($extra:item)* }) => {
        $crate::__private::paste! {
            #[doc = concat!("Runtime type information of [`", stringify!($ty), "`].")]
            #[allow(dead_code)]
            pub mod [<$ty:snake _rtti>] {
                use super::$ty;

                /// Returns the type id of the type.
                #[must_use]
                pub fn type_id() -> u64 {
                    $crate::registry::type_id_of::<$ty>()
                }

                /// Returns the type name of the type.
                #[must_use]
                pub fn type_name() -> &'static str {
                    ::core::any::type_name::<$ty>()
                }

                /// Boxes a value into a new handle.
                #[must_use]
                pub fn upcast<T>(value: $ty) -> $crate::AnyHandle<T>
                where
                    $ty: $crate::markers::ObjectMarkerFor<T>,
                    T: $crate::markers::ThreadSafetyMarker,
                {
                    $crate::AnyHandle::from_value(value)
                }

                /// Returns a new handle to the same payload.
                #[must_use]
                pub fn create<T>(handle: &$crate::AnyHandle<T>) -> $crate::AnyHandle<T> {
                    ::core::clone::Clone::clone(handle)
                }

                /// Returns a read-only view, or `None` on a type mismatch or an
                /// exclusive borrow.
                #[must_use]
                pub fn downcast_shared<T>(
                    handle: &$crate::AnyHandle<T>,
                ) -> ::core::option::Option<$crate::SharedView<$ty, T>> {
                    handle.try_borrow_shared::<$ty>()
                }

                /// Returns a read-write view, or `None` on a type mismatch or
                /// any other borrow.
                #[must_use]
                pub fn downcast_exclusive<T>(
                    handle: &$crate::AnyHandle<T>,
                ) -> ::core::option::Option<$crate::ExclusiveView<$ty, T>> {
                    handle.try_borrow_exclusive::<$ty>()
                }

                /// Ends a view of the type.
                pub fn release<V>(view: V)
                where
                    V: $crate::View<Payload = $ty>,
                {
                    $crate::View::release(view)
                }

                $($extra)*
            }
        }
    };
    ($ty:ident, json $(,)?) => {
        $crate::reflect!(@module $ty, {
            /// Registers the JSON codec of the type.
            pub fn register_json() {
                $crate::json::register::<$ty>()
            }
        });
    };
    ($($ty:ident),+ $(,)?) => {
        $(
            $crate::reflect!(@module $ty, {});
        )+
    };
}
