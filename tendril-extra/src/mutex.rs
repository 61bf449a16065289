//! [`TaskMutex`], an asynchronous lock whose waiters are [`CancelableTask`]s.

use core::{
    fmt::{self, Debug, Formatter},
    future::IntoFuture,
    sync::atomic::{AtomicBool, Ordering},
};
use std::sync::Arc;

use async_lock::OnceCell;
use scopeguard::guard;
use tendril::{callback, shadow_clone, CallbackRegistry, CancelableTask, TaskError, TaskState};
use tracing::trace;

/// Serialises critical sections that span suspension points.
///
/// Waiters aren't queued: whenever the lock is released, all current waiters race for it.
pub struct TaskMutex {
    locked: AtomicBool,
    release_listeners: CallbackRegistry<()>,
}

impl Debug for TaskMutex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.release_listeners.len())
            .finish()
    }
}

impl Default for TaskMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMutex {
    /// Creates an unlocked instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            release_listeners: CallbackRegistry::new(),
        }
    }

    /// Whether a critical section currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Runs `body` once the lock is acquired, then releases the lock.
    ///
    /// `body` may return any [`IntoFuture`], including another [`CancelableTask`].
    ///
    /// Canceling the returned task resolves it with [`None`], whether it was still waiting
    /// (in which case `body` never runs) or already holding the lock (in which case the
    /// body's future is dropped). The lock is released exactly once per acquisition,
    /// also if `body` fails or panics.
    pub fn with_lock<'a, T, F, Fut>(self: &Arc<Self>, body: F) -> CancelableTask<'a, Option<T>>
    where
        T: 'a,
        F: 'a + Send + FnOnce() -> Fut,
        Fut: IntoFuture<Output = Result<T, TaskError>>,
        Fut::IntoFuture: 'a + Send,
    {
        let mutex = Arc::clone(self);
        CancelableTask::with_cancel_outcome(
            move |state: Arc<TaskState>| async move {
                mutex.acquire().await;
                let _release = guard(&*mutex, TaskMutex::release);
                state.ensure_live()?;
                body().into_future().await.map(Some)
            },
            || Ok(None),
        )
    }

    fn try_acquire(&self) -> bool {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acquired {
            trace!("acquired task mutex");
        }
        acquired
    }

    async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }

            let released = Arc::new(OnceCell::<()>::new());
            let listener = callback({
                shadow_clone!(released);
                move |()| {
                    released.set_blocking(()).ok();
                }
            });
            self.release_listeners.add(Arc::clone(&listener));
            let _unsubscribe = guard(listener, |listener| {
                self.release_listeners.remove(&listener);
            });

            // Released between the first attempt and subscribing?
            if self.try_acquire() {
                return;
            }
            released.wait().await;
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
        trace!(waiters = self.release_listeners.len(), "released task mutex");
        self.release_listeners.dispatch(());
    }
}
