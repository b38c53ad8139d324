//! Application state shared with callbacks that cannot know its type.
//!
//! This example demonstrates:
//! 1. Boxing a model into an `AnyHandle` with `reflect!`
//! 2. Storing clones of the handle next to type-erased callbacks
//! 3. Downcasting inside a callback, and what happens on a conflict

use anyhandle::{AnyHandle, DowncastError, reflect};

#[derive(Debug)]
pub struct Counter {
    clicks: u32,
    label: String,
}

reflect!(Counter);

/// A callback table entry: the data is opaque to the table.
struct Callback {
    data: AnyHandle,
    on_event: fn(&AnyHandle) -> Result<(), DowncastError>,
}

fn on_click(data: &AnyHandle) -> Result<(), DowncastError> {
    let mut counter = data.borrow_exclusive::<Counter>()?;
    counter.clicks += 1;
    Ok(())
}

fn on_render(data: &AnyHandle) -> Result<(), DowncastError> {
    let counter = data.borrow_shared::<Counter>()?;
    println!("{}: {} click(s)", counter.label, counter.clicks);
    Ok(())
}

fn main() {
    let model: AnyHandle = counter_rtti::upcast(Counter {
        clicks: 0,
        label: String::from("Save button"),
    });

    let callbacks = [
        Callback {
            data: counter_rtti::create(&model),
            on_event: on_click,
        },
        Callback {
            data: counter_rtti::create(&model),
            on_event: on_render,
        },
    ];

    println!("=== Dispatching ===\n");
    for _ in 0..2 {
        for callback in &callbacks {
            if let Err(error) = (callback.on_event)(&callback.data) {
                println!("callback failed: {error}");
            }
        }
    }

    println!("\n=== Conflicting borrow ===\n");
    // Holding a view in the caller makes the click callback fail instead of
    // blocking.
    let reader = counter_rtti::downcast_shared(&model).expect("no writer is active");
    if let Err(error) = (callbacks[0].on_event)(&callbacks[0].data) {
        println!("callback failed: {error}");
    }
    counter_rtti::release(reader);

    println!("\n=== Wrong type ===\n");
    let unrelated = AnyHandle::new(42u64);
    if let Err(error) = on_render(&unrelated) {
        println!("callback failed: {error}");
    }

    drop(callbacks);
    println!("\nhandles left: {}", model.handle_count());
}
