//! Error types shared by callbacks and tasks.

use std::{error::Error, sync::Arc};

use thiserror::Error;

/// Misuse of a [`CallbackRegistry`](`crate::callbacks::CallbackRegistry`).
///
/// These indicate logic bugs in the caller. The panicking methods on the registry
/// raise them directly; the `try_` variants report them instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
	/// [`dispatch`](`crate::callbacks::CallbackRegistry::dispatch`) was called while the
	/// same registry was already dispatching on this thread.
	#[error("tried to dispatch while already dispatching; call `supersede` from within the observer instead")]
	AlreadyDispatching,
	/// [`supersede`](`crate::callbacks::CallbackRegistry::supersede`) was called outside
	/// of an active dispatch.
	#[error("tried to supersede outside of an active dispatch")]
	NotDispatching,
	/// [`supersede`](`crate::callbacks::CallbackRegistry::supersede`) was called while
	/// already-notified observers were receiving a previous supersession.
	#[error("tried to supersede while replaying a previous supersession")]
	SupersedeDuringReplay,
}

/// How a [`CancelableTask`](`crate::task::CancelableTask`) can fail.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
	/// The task was canceled.
	///
	/// This is routine (e.g. teardown of whatever owned the task) and should never be
	/// surfaced as a user-facing error.
	#[error("canceled")]
	Canceled,
	/// Any other failure.
	#[error("{0}")]
	Failed(Arc<dyn Error + Send + Sync>),
}

impl TaskError {
	/// Wraps an arbitrary error as [`TaskError::Failed`].
	pub fn new(error: impl 'static + Error + Send + Sync) -> Self {
		Self::Failed(Arc::new(error))
	}

	/// Creates a [`TaskError::Failed`] from a plain message.
	pub fn msg(message: impl Into<String>) -> Self {
		Self::new(Message(message.into()))
	}

	/// Whether this is [`TaskError::Canceled`].
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled)
	}
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn messages() {
		let error = TaskError::msg("no route to host");
		assert!(!error.is_canceled());
		assert_eq!(error.to_string(), "no route to host");
		assert_eq!(TaskError::Canceled.to_string(), "canceled");
	}
}
