//! Tests for the modules generated by `reflect!`.

use std::rc::Rc;

use anyhandle::{AnyHandle, markers::Local, reflect, registry};

#[derive(Debug, PartialEq)]
pub struct DataModel {
    counter: u32,
}

#[derive(Debug)]
pub struct LayoutCache {
    entries: Rc<Vec<u32>>,
}

pub struct Unrelated;

reflect!(DataModel, LayoutCache);
reflect!(Unrelated);

#[test]
fn test_generated_identity() {
    assert_eq!(data_model_rtti::type_id(), registry::type_id_of::<DataModel>());
    assert_ne!(data_model_rtti::type_id(), unrelated_rtti::type_id());
    assert!(data_model_rtti::type_name().ends_with("DataModel"));
}

#[test]
fn test_generated_operations() {
    let handle: AnyHandle = data_model_rtti::upcast(DataModel { counter: 1 });
    let callback_handle = data_model_rtti::create(&handle);
    assert_eq!(handle.handle_count(), 2);

    let mut model = data_model_rtti::downcast_exclusive(&callback_handle).unwrap();
    model.counter += 1;
    assert!(data_model_rtti::downcast_shared(&handle).is_none());
    data_model_rtti::release(model);

    let model = data_model_rtti::downcast_shared(&handle).unwrap();
    assert_eq!(*model, DataModel { counter: 2 });
    assert!(unrelated_rtti::downcast_shared(&handle).is_none());
    data_model_rtti::release(model);

    assert!(handle.try_borrow_exclusive::<DataModel>().is_some());
}

#[test]
fn test_generated_operations_for_local_payloads() {
    let entries = Rc::new(vec![1, 2, 3]);
    let handle: AnyHandle<Local> = layout_cache_rtti::upcast(LayoutCache {
        entries: Rc::clone(&entries),
    });

    let cache = layout_cache_rtti::downcast_shared(&handle).unwrap();
    assert_eq!(cache.entries.len(), 3);
    assert_eq!(Rc::strong_count(&entries), 2);
    layout_cache_rtti::release(cache);

    drop(handle);
    assert_eq!(Rc::strong_count(&entries), 1);
}

#[cfg(feature = "json")]
mod json {
    use anyhandle::{AnyHandle, json, reflect};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    pub struct Settings {
        volume: u8,
    }

    reflect!(Settings, json);

    #[test]
    fn test_generated_json_registration() {
        settings_rtti::register_json();

        let handle: AnyHandle = settings_rtti::upcast(Settings { volume: 7 });
        assert!(handle.can_serialize());
        let value = handle.to_json().unwrap();
        assert_eq!(value, serde_json::json!({ "volume": 7 }));

        let restored = json::from_json(settings_rtti::type_id(), value).unwrap();
        assert_eq!(
            *settings_rtti::downcast_shared(&restored).unwrap(),
            Settings { volume: 7 }
        );
    }
}
