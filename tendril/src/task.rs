//! The cancelable task protocol.
//!
//! A [`CancelableTask`] is a [`Future`] that can be canceled from the outside, through
//! [`CancelableTask::cancel`] or a detached [`CancelHandle`].
//!
//! Its body receives the shared [`TaskState`], which tracks two flags:
//!
//! - `finishing`: the task committed to an outcome, either by completing or by being canceled.
//! - `done`: the task's future actually yielded that outcome.
//!
//! Cancellation is cooperative. [`cancel`](`TaskState::cancel`) commits to the canceled
//! outcome, runs [`TaskState::cancelers`] exactly once and wakes the task, which then
//! settles as canceled and drops its body without polling it again. Bodies can also
//! observe cancellation themselves after each suspension point through
//! [`TaskState::ensure_live`].
//!
//! Once finishing, a task never changes its outcome. In particular, canceling a task that
//! already completed (or that committed early through [`TaskState::try_finish`]) does
//! nothing at all.

use core::{
	fmt::{self, Debug, Formatter},
	future::Future,
	pin::Pin,
	sync::atomic::{AtomicBool, AtomicU8, Ordering},
	task::{Context, Poll},
};
use std::sync::Arc;

use event_listener::{Event, EventListener};
use futures_lite::FutureExt;
use scopeguard::guard;
use tracing::debug;

use crate::{callbacks::CallbackRegistry, error::TaskError};

const LIVE: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELED: u8 = 2;

/// The state shared between a [`CancelableTask`], its body and any [`CancelHandle`]s.
pub struct TaskState {
	phase: AtomicU8,
	done: AtomicBool,
	cancelers: CallbackRegistry<()>,
	cancel_event: Event,
}

impl Debug for TaskState {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskState")
			.field("finishing", &self.is_finishing())
			.field("canceled", &self.is_canceled())
			.field("done", &self.is_done())
			.field("cancelers", &self.cancelers)
			.finish()
	}
}

impl TaskState {
	fn new() -> Self {
		Self {
			phase: AtomicU8::new(LIVE),
			done: AtomicBool::new(false),
			cancelers: CallbackRegistry::new(),
			cancel_event: Event::new(),
		}
	}

	/// Whether the task committed to an outcome (by completing or by being canceled).
	#[must_use]
	pub fn is_finishing(&self) -> bool {
		self.phase.load(Ordering::Acquire) != LIVE
	}

	/// Whether the task was canceled before it could commit to another outcome.
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.phase.load(Ordering::Acquire) == CANCELED
	}

	/// Whether the task's future yielded its outcome.
	#[must_use]
	pub fn is_done(&self) -> bool {
		self.done.load(Ordering::Acquire)
	}

	/// Callbacks run once when the task is canceled.
	///
	/// Bodies register cleanup that must happen promptly here, e.g. aborting a request.
	/// Callbacks added after cancellation are never run.
	#[must_use]
	pub fn cancelers(&self) -> &CallbackRegistry<()> {
		&self.cancelers
	}

	/// Commits to the body's outcome ahead of completion.
	///
	/// After this succeeds, cancellation is a no-op.
	///
	/// **Returns** whether this call committed the task, i.e. `false` iff it was already finishing.
	pub fn try_finish(&self) -> bool {
		self.phase
			.compare_exchange(LIVE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Short-circuits with [`TaskError::Canceled`] iff the task was canceled.
	///
	/// Bodies should call this after each suspension point.
	///
	/// # Errors
	///
	/// Iff the task was canceled.
	pub fn ensure_live(&self) -> Result<(), TaskError> {
		if self.is_canceled() {
			Err(TaskError::Canceled)
		} else {
			Ok(())
		}
	}

	/// Cancels the task iff it isn't finishing yet.
	///
	/// **Idempotent** aside from the return value.
	/// **Returns** whether this call canceled the task.
	///
	/// # Panics
	///
	/// Iff a canceler panics. The task is woken and settles as canceled regardless.
	pub fn cancel(&self) -> bool {
		if self
			.phase
			.compare_exchange(LIVE, CANCELED, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return false;
		}

		debug!(cancelers = self.cancelers.len(), "canceling task");
		let _wake = guard(&self.cancel_event, |event| {
			event.notify(usize::MAX);
		});
		self.cancelers.dispatch(());
		true
	}

	/// Resolves once the task is canceled.
	///
	/// Never resolves for tasks that finish otherwise.
	pub async fn canceled(&self) {
		loop {
			if self.is_canceled() {
				return;
			}
			let listener = self.cancel_event.listen();
			if self.is_canceled() {
				return;
			}
			listener.await;
		}
	}

	fn listen(&self) -> EventListener {
		self.cancel_event.listen()
	}

	/// Whether the body's outcome stands, i.e. the task wasn't canceled first.
	fn commit(&self) -> bool {
		match self
			.phase
			.compare_exchange(LIVE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
		{
			Ok(_) => true,
			Err(phase) => phase == COMMITTED,
		}
	}

	fn mark_done(&self) {
		self.done.store(true, Ordering::Release);
	}
}

/// A cloneable handle that can cancel a [`CancelableTask`] and poll its state.
///
/// Awaiting a task consumes it, so code that needs to cancel an awaited task keeps one of these.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<TaskState>);

impl CancelHandle {
	/// See [`TaskState::cancel`].
	pub fn cancel(&self) -> bool {
		self.0.cancel()
	}

	/// See [`TaskState::is_done`].
	#[must_use]
	pub fn done(&self) -> bool {
		self.0.is_done()
	}

	/// See [`TaskState::is_canceled`].
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.0.is_canceled()
	}
}

type Body<'a, T> = Pin<Box<dyn 'a + Send + Future<Output = Result<T, TaskError>>>>;
type OnCancel<'a, T> = Box<dyn 'a + Send + FnOnce() -> Result<T, TaskError>>;

/// An asynchronous operation with an idempotent [`cancel`](`CancelableTask::cancel`)
/// and a [`done`](`CancelableTask::done`) poll.
///
/// See the [module documentation](`self`).
#[must_use = "Tasks do nothing unless polled. Dropping a task abandons it without running its cancelers."]
pub struct CancelableTask<'a, T> {
	state: Arc<TaskState>,
	body: Option<Body<'a, T>>,
	on_cancel: Option<OnCancel<'a, T>>,
	listener: Option<EventListener>,
}

impl<'a, T> Debug for CancelableTask<'a, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("CancelableTask")
			.field("state", &self.state)
			.field("has_body", &self.body.is_some())
			.finish_non_exhaustive()
	}
}

impl<'a, T: 'a> CancelableTask<'a, T> {
	/// Creates a task from `body`, which is called right away with the new task's state.
	///
	/// The returned future only runs when the task is polled. If the task is canceled
	/// before that, it never runs at all.
	pub fn new<F, Fut>(body: F) -> Self
	where
		F: FnOnce(Arc<TaskState>) -> Fut,
		Fut: 'a + Send + Future<Output = Result<T, TaskError>>,
	{
		let state = Arc::new(TaskState::new());
		let body = body(Arc::clone(&state)).boxed();
		Self {
			state,
			body: Some(body),
			on_cancel: None,
			listener: None,
		}
	}

	/// Like [`CancelableTask::new`], but a canceled task settles with the outcome of
	/// `on_cancel` instead of [`TaskError::Canceled`].
	pub fn with_cancel_outcome<F, Fut>(
		body: F,
		on_cancel: impl 'a + Send + FnOnce() -> Result<T, TaskError>,
	) -> Self
	where
		F: FnOnce(Arc<TaskState>) -> Fut,
		Fut: 'a + Send + Future<Output = Result<T, TaskError>>,
	{
		Self {
			on_cancel: Some(Box::new(on_cancel)),
			..Self::new(body)
		}
	}

	/// A task that settles with `outcome` when polled (unless canceled first).
	pub fn ready(outcome: Result<T, TaskError>) -> Self
	where
		T: Send,
	{
		Self::new(move |_| async move { outcome })
	}

	/// Whether this task yielded its outcome.
	#[must_use]
	pub fn done(&self) -> bool {
		self.state.is_done()
	}

	/// Cancels this task, iff it isn't finishing yet. See [`TaskState::cancel`].
	pub fn cancel(&self) -> bool {
		self.state.cancel()
	}

	/// Creates a detached [`CancelHandle`] for this task.
	#[must_use]
	pub fn handle(&self) -> CancelHandle {
		CancelHandle(Arc::clone(&self.state))
	}

	/// This task's shared state.
	#[must_use]
	pub fn state(&self) -> &Arc<TaskState> {
		&self.state
	}

	fn settle_canceled(&mut self) -> Result<T, TaskError> {
		self.body = None;
		self.listener = None;
		self.state.mark_done();
		match self.on_cancel.take() {
			Some(on_cancel) => on_cancel(),
			None => Err(TaskError::Canceled),
		}
	}
}

impl<'a, T: 'a> Future for CancelableTask<'a, T> {
	type Output = Result<T, TaskError>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		// Register for cancellation before polling the body, so that a `cancel` from
		// inside the body (or another thread) can't be missed.
		loop {
			if this.state.is_canceled() {
				return Poll::Ready(this.settle_canceled());
			}
			match &mut this.listener {
				Some(listener) => {
					if Pin::new(listener).poll(cx).is_pending() {
						break;
					}
					this.listener = None;
				}
				None => this.listener = Some(this.state.listen()),
			}
		}

		let Some(body) = &mut this.body else {
			panic!("`CancelableTask` polled after completion.");
		};
		let Poll::Ready(outcome) = body.as_mut().poll(cx) else {
			return Poll::Pending;
		};

		if this.state.commit() {
			this.body = None;
			this.listener = None;
			this.state.mark_done();
			Poll::Ready(outcome)
		} else {
			Poll::Ready(this.settle_canceled())
		}
	}
}
