//! [`CallbackRegistry`] and [`WritableValue`] => [`CancelableTask`] adapters.

use std::sync::Arc;

use async_lock::OnceCell;
use scopeguard::guard;
use tendril::{callback, shadow_clone, CallbackRegistry, CancelableTask, WritableValue};

/// Resolves with the first value of `value`, current or future, that satisfies `predicate`.
///
/// The task only subscribes once polled, and unsubscribes when it completes or is dropped.
pub fn wait_for<T, P>(value: Arc<WritableValue<T>>, predicate: P) -> CancelableTask<'static, T>
where
    T: 'static + Send + Sync + Clone,
    P: 'static + Send + Sync + Fn(&T) -> bool,
{
    CancelableTask::new(move |_| async move {
        let found = Arc::new(OnceCell::<T>::new());
        let predicate = Arc::new(predicate);

        let observer = callback({
            shadow_clone!(found, predicate);
            move |next: &T| {
                if predicate(next) {
                    found.set_blocking(next.clone()).ok();
                }
            }
        });
        value.callbacks().add(Arc::clone(&observer));
        let _unsubscribe = guard(observer, |observer| {
            value.callbacks().remove(&observer);
        });

        let current = value.get();
        if predicate(&current) {
            return Ok(current);
        }
        Ok(found.wait().await.clone())
    })
}

/// Resolves with the next event dispatched through `callbacks`.
///
/// Unlike [`wait_for`], this subscribes right away, so a dispatch before the task is
/// first polled still counts. The subscription ends when the task completes, is
/// canceled or is dropped.
pub fn next_dispatch<T>(callbacks: &CallbackRegistry<T>) -> CancelableTask<'_, T>
where
    T: 'static + Send + Sync + Clone,
{
    CancelableTask::new(move |_| {
        let dispatched = Arc::new(OnceCell::<T>::new());
        let observer = callback({
            shadow_clone!(dispatched);
            move |event: &T| {
                dispatched.set_blocking(event.clone()).ok();
            }
        });
        callbacks.add(Arc::clone(&observer));
        let unsubscribe = guard(observer, move |observer| {
            callbacks.remove(&observer);
        });

        async move {
            let _unsubscribe = unsubscribe;
            Ok(dispatched.wait().await.clone())
        }
    })
}
