#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]
//!
//! # Threading Notes
//!
//! Everything here is [`Send`] and [`Sync`], but the protocols are designed for a single
//! logical thread of control with suspension only at `.await` points.
//! Cross-thread use is sound and serialised, but ordering across threads is only as good as
//! the caller's own synchronisation.

pub mod abort;
pub mod callbacks;
pub mod error;
pub mod task;
pub mod value;

pub use abort::{AbortController, AbortSignal};
pub use callbacks::{callback, Callback, CallbackRegistry};
pub use error::{RegistryError, TaskError};
pub use task::{CancelHandle, CancelableTask, TaskState};
pub use value::{MappedValue, WritableValue};

/// Shadows each identifier with a clone of itself, for use right before a `move` closure.
///
/// ```
/// use std::sync::Arc;
/// use tendril::shadow_clone;
///
/// let a = Arc::new(1);
/// let f = {
/// 	shadow_clone!(a);
/// 	move || *a + 1
/// };
/// assert_eq!(f(), *a + 1);
/// ```
#[macro_export]
macro_rules! shadow_clone {
	($($ident:ident),*$(,)?) => {
		$(let $ident = ::core::clone::Clone::clone(&$ident);)*
	};
}
