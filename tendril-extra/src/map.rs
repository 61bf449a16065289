//! Tasks derived from other tasks.
//!
//! Canceling a derived task abandons the base task without canceling it.
//! Keep a [`CancelHandle`](`tendril::CancelHandle`) of the base task to cancel it too.

use tendril::{CancelableTask, TaskError};

/// Applies `transform` to the base task's value.
pub fn map<'a, T: 'a, U: 'a>(
    base: CancelableTask<'a, T>,
    transform: impl 'a + Send + FnOnce(T) -> U,
) -> CancelableTask<'a, U> {
    map_or_recover(base, move |value| Ok(transform(value)), Err)
}

/// Applies a fallible `transform` to the base task's value.
pub fn try_map<'a, T: 'a, U: 'a>(
    base: CancelableTask<'a, T>,
    transform: impl 'a + Send + FnOnce(T) -> Result<U, TaskError>,
) -> CancelableTask<'a, U> {
    map_or_recover(base, transform, Err)
}

/// Like [`try_map`], but `on_reject` may turn failures of the base task into an outcome.
///
/// `on_reject` is not consulted when the base task was canceled.
pub fn map_or_recover<'a, T: 'a, U: 'a>(
    base: CancelableTask<'a, T>,
    transform: impl 'a + Send + FnOnce(T) -> Result<U, TaskError>,
    on_reject: impl 'a + Send + FnOnce(TaskError) -> Result<U, TaskError>,
) -> CancelableTask<'a, U> {
    CancelableTask::new(move |_| async move {
        match base.await {
            Ok(value) => transform(value),
            Err(error) if error.is_canceled() => Err(error),
            Err(error) => on_reject(error),
        }
    })
}
