use std::sync::Arc;

use futures_lite::future::block_on;
use tendril::{CallbackRegistry, MappedValue, WritableValue};
use tendril_extra::{next_dispatch, wait_for};

use _block_on::{assert_pending, assert_ready};

#[test]
fn current_value() {
    let value = Arc::new(WritableValue::new(5));
    let task = wait_for(Arc::clone(&value), |value| *value > 2);
    assert_eq!(block_on(task).unwrap(), 5);
    assert!(value.callbacks().is_empty());
}

#[test]
fn later_value() {
    let value = Arc::new(WritableValue::new(0));
    let mut task = wait_for(Arc::clone(&value), |value| *value > 2);
    assert!(value.callbacks().is_empty());

    assert_pending(&mut task);
    assert_eq!(value.callbacks().len(), 1);

    value.set(1);
    assert_pending(&mut task);

    value.set(3);
    value.set(4);
    assert_eq!(assert_ready(&mut task).unwrap(), 3);
    assert!(value.callbacks().is_empty());
}

#[test]
fn cancel_unsubscribes() {
    let value = Arc::new(WritableValue::new(0));
    let mut task = wait_for(Arc::clone(&value), |value| *value > 2);
    assert_pending(&mut task);

    task.cancel();
    assert!(assert_ready(&mut task).unwrap_err().is_canceled());
    assert!(value.callbacks().is_empty());

    value.set(3);
}

#[test]
fn across_threads() {
    let value = Arc::new(WritableValue::new(String::new()));
    let task = wait_for(Arc::clone(&value), |value: &String| value.ends_with('!'));

    let writer = std::thread::spawn({
        let value = Arc::clone(&value);
        move || {
            for text in ["h", "hi", "hi!"] {
                std::thread::sleep(std::time::Duration::from_millis(5));
                value.set(text.to_owned());
            }
        }
    });
    assert_eq!(block_on(task).unwrap(), "hi!");
    writer.join().unwrap();
}

#[test]
fn next_dispatch_skips_past_events() {
    let registry = CallbackRegistry::new();
    registry.dispatch(1);

    let mut task = next_dispatch(&registry);
    assert_eq!(registry.len(), 1);
    assert_pending(&mut task);

    registry.dispatch(2);
    registry.dispatch(3);
    assert_eq!(assert_ready(&mut task).unwrap(), 2);
    assert!(registry.is_empty());
}

#[test]
fn next_dispatch_before_first_poll() {
    let registry = CallbackRegistry::new();
    let task = next_dispatch(&registry);

    registry.dispatch("event");
    assert_eq!(assert_ready(task).unwrap(), "event");
    assert!(registry.is_empty());
}

#[test]
fn next_dispatch_cancel_unsubscribes() {
    let registry = CallbackRegistry::<()>::new();
    let mut task = next_dispatch(&registry);
    assert_pending(&mut task);

    task.cancel();
    assert!(assert_ready(&mut task).unwrap_err().is_canceled());
    assert!(registry.is_empty());
}

#[test]
fn next_dispatch_drop_unsubscribes() {
    let registry = CallbackRegistry::<()>::new();
    drop(next_dispatch(&registry));
    assert!(registry.is_empty());
}

#[test]
fn next_dispatch_of_mapped_value() {
    let source = Arc::new(WritableValue::new(0));
    let doubled = MappedValue::new(Arc::clone(&source), |n: &i32| n * 2);
    let mut task = next_dispatch(doubled.callbacks());
    assert_pending(&mut task);

    source.set(0);
    assert_pending(&mut task);

    source.set(21);
    assert_eq!(assert_ready(&mut task).unwrap(), 42);
}
