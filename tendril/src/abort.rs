//! Abort signalling for operations that don't know about [`TaskState`](`crate::task::TaskState`),
//! e.g. HTTP requests.

use core::{
	fmt::{self, Debug, Formatter},
	future::Future,
	pin::Pin,
	sync::atomic::{AtomicBool, Ordering},
	task::{Context, Poll},
};
use std::sync::Arc;

use event_listener::{Event, EventListener};
use pin_project::pin_project;
use thiserror::Error;

struct AbortInner {
	aborted: AtomicBool,
	event: Event,
}

/// Owns the right to abort. Hand out [`AbortSignal`]s to the aborted operation.
#[derive(Clone)]
pub struct AbortController {
	inner: Arc<AbortInner>,
}

/// Observes an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
	inner: Arc<AbortInner>,
}

/// Returned by [`Abortable`] when the signal fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("aborted")]
pub struct Aborted;

impl Default for AbortController {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for AbortController {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("AbortController")
			.field("aborted", &self.is_aborted())
			.finish()
	}
}

impl Debug for AbortSignal {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("AbortSignal")
			.field("aborted", &self.is_aborted())
			.finish()
	}
}

impl AbortController {
	/// Creates a controller that hasn't aborted yet.
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(AbortInner {
				aborted: AtomicBool::new(false),
				event: Event::new(),
			}),
		}
	}

	/// Creates a signal tied to this controller.
	#[must_use]
	pub fn signal(&self) -> AbortSignal {
		AbortSignal {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Fires the signal.
	///
	/// **Idempotent** aside from the return value.
	/// **Returns** whether this call aborted.
	pub fn abort(&self) -> bool {
		if self.inner.aborted.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.inner.event.notify(usize::MAX);
		true
	}

	/// Whether [`abort`](`AbortController::abort`) was called.
	#[must_use]
	pub fn is_aborted(&self) -> bool {
		self.inner.aborted.load(Ordering::Acquire)
	}
}

impl AbortSignal {
	/// Whether the controller aborted.
	#[must_use]
	pub fn is_aborted(&self) -> bool {
		self.inner.aborted.load(Ordering::Acquire)
	}

	/// Resolves once the controller aborts.
	pub async fn aborted(&self) {
		loop {
			if self.is_aborted() {
				return;
			}
			let listener = self.inner.event.listen();
			if self.is_aborted() {
				return;
			}
			listener.await;
		}
	}

	/// Runs `future` until it completes or this signal fires, whichever happens first.
	///
	/// `future` is not polled at all if the signal already fired.
	pub fn wrap<F: Future>(&self, future: F) -> Abortable<F> {
		Abortable {
			signal: self.clone(),
			listener: None,
			future,
		}
	}
}

/// See [`AbortSignal::wrap`].
#[pin_project]
#[must_use = "Futures do nothing unless polled."]
pub struct Abortable<F> {
	signal: AbortSignal,
	listener: Option<EventListener>,
	#[pin]
	future: F,
}

impl<F: Future> Future for Abortable<F> {
	type Output = Result<F::Output, Aborted>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();
		loop {
			if this.signal.is_aborted() {
				*this.listener = None;
				return Poll::Ready(Err(Aborted));
			}
			match this.listener {
				Some(listener) => {
					if Pin::new(listener).poll(cx).is_pending() {
						break;
					}
					*this.listener = None;
				}
				None => *this.listener = Some(this.signal.inner.event.listen()),
			}
		}
		this.future.poll(cx).map(Ok)
	}
}
