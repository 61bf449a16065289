//! [`WritableValue`], a value that notifies a [`CallbackRegistry`] whenever it's set,
//! and [`MappedValue`], which follows another value through a transform.

use core::fmt::{self, Debug, Formatter};
use std::{
	cell::RefCell,
	sync::{Arc, Weak},
};

use parking_lot::ReentrantMutex;

use crate::{
	callbacks::{callback, Callback, CallbackRegistry},
	error::RegistryError,
};

/// A value with change notifications.
///
/// Setting the value from within one of its own callbacks supersedes the ongoing
/// dispatch: callbacks that already saw the previous value see the new one too,
/// and callbacks that didn't only see the newest value.
///
/// Storing and notifying happen in one critical section, so the last notification
/// always carries the value [`get`](`WritableValue::get`) returns afterwards, also
/// when several threads set the value at once.
pub struct WritableValue<T> {
	critical_mutex: ReentrantMutex<RefCell<T>>,
	callbacks: CallbackRegistry<T>,
}

impl<T: Debug> Debug for WritableValue<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		f.debug_struct("WritableValue")
			.field("value", &*borrow)
			.field("callbacks", &self.callbacks)
			.finish()
	}
}

impl<T: Default> Default for WritableValue<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T> WritableValue<T> {
	/// Creates a new instance holding `initial_value`, without notifying anyone.
	pub fn new(initial_value: T) -> Self {
		Self {
			critical_mutex: ReentrantMutex::new(RefCell::new(initial_value)),
			callbacks: CallbackRegistry::new(),
		}
	}

	/// The callbacks notified with each new value.
	#[must_use]
	pub fn callbacks(&self) -> &CallbackRegistry<T> {
		&self.callbacks
	}

	/// Clones the current value.
	///
	/// Blocks while another thread is setting the value.
	#[must_use]
	pub fn get(&self) -> T
	where
		T: Clone,
	{
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		borrow.clone()
	}

	/// Stores `new_value` and notifies the callbacks with it.
	///
	/// # Panics
	///
	/// Iff called from a callback while this value's callbacks are replaying
	/// an earlier supersession.
	#[track_caller]
	pub fn set(&self, new_value: T)
	where
		T: Clone,
	{
		let lock = self.critical_mutex.lock();
		*(*lock).borrow_mut() = new_value.clone();
		match self
			.callbacks
			.try_supersede(new_value.clone(), new_value.clone())
		{
			Ok(()) => (),
			Err(RegistryError::NotDispatching) => self.callbacks.dispatch(new_value),
			Err(error) => panic!("{error}"),
		}
	}

	/// Like [`set`](`WritableValue::set`), but only iff `new_value` differs from the current value.
	///
	/// **Returns** whether the value changed.
	#[track_caller]
	pub fn set_if_changed(&self, new_value: T) -> bool
	where
		T: Clone + PartialEq,
	{
		let lock = self.critical_mutex.lock();
		if *(*lock).borrow() == new_value {
			return false;
		}
		self.set(new_value);
		true
	}
}

/// A read-only value derived from a source [`WritableValue`].
///
/// The mapping runs once per source notification. Callbacks are only notified when
/// the mapped value changes.
///
/// Dropping this unsubscribes from the source.
pub struct MappedValue<S, T> {
	source: Arc<WritableValue<S>>,
	observer: Callback<S>,
	mapped: Arc<WritableValue<T>>,
}

impl<S, T: Debug> Debug for MappedValue<S, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("MappedValue")
			.field("mapped", &self.mapped)
			.finish_non_exhaustive()
	}
}

impl<S, T> MappedValue<S, T>
where
	S: 'static + Clone,
	T: 'static + Send + Sync + Clone + PartialEq,
{
	/// Subscribes to `source`, storing `map` of its current value right away.
	pub fn new(
		source: Arc<WritableValue<S>>,
		map: impl 'static + Send + Sync + Fn(&S) -> T,
	) -> Self {
		let map = Arc::new(map);
		let mapped = Arc::new(WritableValue::new(map(&source.get())));
		let observer = callback({
			let mapped = Arc::downgrade(&mapped);
			let map = Arc::clone(&map);
			move |value: &S| {
				if let Some(mapped) = Weak::upgrade(&mapped) {
					mapped.set_if_changed(map(value));
				}
			}
		});
		source.callbacks().add(Arc::clone(&observer));

		// Catches a `set` on another thread between the first read and subscribing.
		mapped.set_if_changed(map(&source.get()));

		Self {
			source,
			observer,
			mapped,
		}
	}

	/// Clones the current mapped value.
	#[must_use]
	pub fn get(&self) -> T {
		self.mapped.get()
	}

	/// The callbacks notified with each changed mapped value.
	#[must_use]
	pub fn callbacks(&self) -> &CallbackRegistry<T> {
		self.mapped.callbacks()
	}
}

impl<S, T> Drop for MappedValue<S, T> {
	fn drop(&mut self) {
		self.source.callbacks().remove(&self.observer);
	}
}
