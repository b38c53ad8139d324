//! Handing a handle to a background thread.
//!
//! The worker owns a clone and updates the payload through short exclusive
//! views; the main thread polls with shared views. Neither side ever waits:
//! a refused downcast is simply retried on the next round.

use std::{thread, time::Duration};

use anyhandle::prelude::*;

#[derive(Debug, Default)]
struct Progress {
    done: u32,
    total: u32,
}

fn main() {
    let progress = AnyHandle::new(Progress {
        done: 0,
        total: 5,
    });

    let worker = {
        let progress = progress.clone();
        thread::spawn(move || {
            let mut finished = false;
            while !finished {
                thread::sleep(Duration::from_millis(20));
                if let Some(mut progress) = progress.try_borrow_exclusive::<Progress>() {
                    progress.done += 1;
                    finished = progress.done == progress.total;
                }
            }
        })
    };

    loop {
        match progress.borrow_shared::<Progress>() {
            Ok(view) => {
                println!("progress: {}/{}", view.done, view.total);
                if view.done == view.total {
                    break;
                }
            }
            Err(error) => println!("busy: {error}"),
        }
        thread::sleep(Duration::from_millis(15));
    }

    if worker.join().is_err() {
        eprintln!("worker panicked");
    }
    println!("handles left: {}", progress.handle_count());
}
