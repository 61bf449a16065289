//! [`CallbackRegistry`], an ordered multicast dispatcher with well-defined reentrancy.
//!
//! # Logic
//!
//! Observers are invoked in registration order, from a snapshot taken when
//! [`dispatch`](`CallbackRegistry::dispatch`) starts. Additions and removals during a
//! dispatch only affect later dispatches.
//!
//! An observer that wants to notify *again* while it is being notified **must not**
//! dispatch (that is an error), but can instead [`supersede`](`CallbackRegistry::supersede`)
//! the rest of the current dispatch:
//!
//! - observers that were already notified receive a second event right away,
//! - observers that weren't notified yet receive a replacement event instead of the original one,
//! - the superseding observer itself is not notified again.
//!
//! # Threading
//!
//! A dispatch holds the registry's reentrant lock until it completes, so calls into the
//! same registry from other threads block for that duration. Reentrancy rules apply to
//! nested calls on the dispatching thread.
//! An observer **must not** block on another thread that uses the same registry.

use core::fmt::{self, Debug, Formatter};
use std::{cell::RefCell, collections::HashMap, sync::Arc};

use parking_lot::ReentrantMutex;
use scopeguard::guard;
use slotmap::{new_key_type, SlotMap};
use tracing::trace;

use crate::error::RegistryError;

/// A shareable observer. Its identity is that of the [`Arc`] allocation.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Convenience constructor for [`Callback`].
pub fn callback<T>(f: impl 'static + Send + Sync + Fn(&T)) -> Callback<T> {
	Arc::new(f)
}

new_key_type! {
	struct NodeKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Identity(usize);

impl Identity {
	fn of<T>(callback: &Callback<T>) -> Self {
		Self(Arc::as_ptr(callback).cast::<()>() as usize)
	}
}

struct Node<T> {
	callback: Callback<T>,
	prev: Option<NodeKey>,
	next: Option<NodeKey>,
}

enum Phase<T> {
	Idle,
	Dispatching {
		/// `(for_notified, for_pending)`, consumed after the current observer returns.
		superseded: Option<(T, T)>,
	},
	Replaying,
}

impl<T> Phase<T> {
	fn name(&self) -> &'static str {
		match self {
			Phase::Idle => "idle",
			Phase::Dispatching { superseded: None } => "dispatching",
			Phase::Dispatching { superseded: Some(_) } => "dispatching (superseded)",
			Phase::Replaying => "replaying",
		}
	}
}

struct Registry_<T> {
	nodes: SlotMap<NodeKey, Node<T>>,
	head: Option<NodeKey>,
	tail: Option<NodeKey>,
	by_identity: HashMap<Identity, NodeKey>,
	phase: Phase<T>,
}

impl<T> Registry_<T> {
	fn new() -> Self {
		Self {
			nodes: SlotMap::with_key(),
			head: None,
			tail: None,
			by_identity: HashMap::new(),
			phase: Phase::Idle,
		}
	}

	fn push_back(&mut self, callback: Callback<T>) -> bool {
		let identity = Identity::of(&callback);
		if self.by_identity.contains_key(&identity) {
			return false;
		}

		let key = self.nodes.insert(Node {
			callback,
			prev: self.tail,
			next: None,
		});
		match self.tail {
			Some(tail) => self.nodes[tail].next = Some(key),
			None => self.head = Some(key),
		}
		self.tail = Some(key);
		self.by_identity.insert(identity, key);
		true
	}

	fn unlink(&mut self, identity: Identity) -> bool {
		let Some(key) = self.by_identity.remove(&identity) else {
			return false;
		};
		let node = self
			.nodes
			.remove(key)
			.expect("Identity map and node arena out of sync.");
		match node.prev {
			Some(prev) => self.nodes[prev].next = node.next,
			None => self.head = node.next,
		}
		match node.next {
			Some(next) => self.nodes[next].prev = node.prev,
			None => self.tail = node.prev,
		}
		true
	}

	fn snapshot(&self) -> Vec<Callback<T>> {
		let mut snapshot = Vec::with_capacity(self.nodes.len());
		let mut cursor = self.head;
		while let Some(key) = cursor {
			let node = &self.nodes[key];
			snapshot.push(Arc::clone(&node.callback));
			cursor = node.next;
		}
		snapshot
	}

	fn clear(&mut self) {
		self.nodes.clear();
		self.by_identity.clear();
		self.head = None;
		self.tail = None;
	}
}

/// An ordered set of distinct [`Callback`]s that can be notified together.
///
/// See the [module documentation](`self`) for the dispatch rules.
pub struct CallbackRegistry<T> {
	critical_mutex: ReentrantMutex<RefCell<Registry_<T>>>,
}

impl<T> Default for CallbackRegistry<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Debug for CallbackRegistry<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		f.debug_struct("CallbackRegistry")
			.field("len", &borrow.nodes.len())
			.field("phase", &borrow.phase.name())
			.finish()
	}
}

impl<T> CallbackRegistry<T> {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self {
			critical_mutex: ReentrantMutex::new(RefCell::new(Registry_::new())),
		}
	}

	/// Appends `callback`.
	///
	/// **Returns** `false` without changes iff `callback` is already registered.
	pub fn add(&self, callback: Callback<T>) -> bool {
		let lock = self.critical_mutex.lock();
		let mut borrow = (*lock).borrow_mut();
		borrow.push_back(callback)
	}

	/// Removes `callback`.
	///
	/// A dispatch that is already in progress still notifies it.
	///
	/// **Returns** `false` iff `callback` wasn't registered.
	pub fn remove(&self, callback: &Callback<T>) -> bool {
		let lock = self.critical_mutex.lock();
		let mut borrow = (*lock).borrow_mut();
		borrow.unlink(Identity::of(callback))
	}

	/// Whether `callback` is currently registered.
	#[must_use]
	pub fn contains(&self, callback: &Callback<T>) -> bool {
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		borrow.by_identity.contains_key(&Identity::of(callback))
	}

	/// The number of registered callbacks.
	#[must_use]
	pub fn len(&self) -> usize {
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		borrow.nodes.len()
	}

	/// Whether no callbacks are registered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether a dispatch is in progress.
	///
	/// Only meaningful on the dispatching thread, as other threads block until it ends.
	#[must_use]
	pub fn is_dispatching(&self) -> bool {
		let lock = self.critical_mutex.lock();
		let borrow = (*lock).borrow();
		!matches!(borrow.phase, Phase::Idle)
	}

	/// Drops all callbacks without notifying them.
	pub fn clear(&self) {
		let lock = self.critical_mutex.lock();
		let mut borrow = (*lock).borrow_mut();
		borrow.clear();
	}

	/// Notifies each registered callback with `event`, in registration order.
	///
	/// # Panics
	///
	/// Iff this registry is already dispatching on this thread.
	/// Panics from callbacks are propagated after resetting the registry to idle.
	#[track_caller]
	pub fn dispatch(&self, event: T) {
		if let Err(error) = self.try_dispatch(event) {
			panic!("{error}");
		}
	}

	/// Like [`dispatch`](`CallbackRegistry::dispatch`), but reports misuse as [`Err`].
	///
	/// # Errors
	///
	/// [`RegistryError::AlreadyDispatching`] iff this registry is already dispatching on this thread.
	pub fn try_dispatch(&self, event: T) -> Result<(), RegistryError> {
		let lock = self.critical_mutex.lock();
		let snapshot = {
			let mut borrow = (*lock).borrow_mut();
			if !matches!(borrow.phase, Phase::Idle) {
				return Err(RegistryError::AlreadyDispatching);
			}
			borrow.phase = Phase::Dispatching { superseded: None };
			borrow.snapshot()
		};
		let _idle = guard((), |()| (*lock).borrow_mut().phase = Phase::Idle);

		trace!(observers = snapshot.len(), "dispatching");
		let mut event = event;
		for (notified, callback) in snapshot.iter().enumerate() {
			callback(&event);

			let superseded = match &mut (*lock).borrow_mut().phase {
				Phase::Dispatching { superseded } => superseded.take(),
				Phase::Idle | Phase::Replaying => None,
			};
			if let Some((for_notified, for_pending)) = superseded {
				trace!(
					replayed = notified,
					pending = snapshot.len() - notified - 1,
					"superseded"
				);
				(*lock).borrow_mut().phase = Phase::Replaying;
				for earlier in &snapshot[..notified] {
					earlier(&for_notified);
				}
				(*lock).borrow_mut().phase = Phase::Dispatching { superseded: None };
				event = for_pending;
			}
		}
		Ok(())
	}

	/// Splits the remainder of the current dispatch.
	///
	/// Callbacks already notified by the current dispatch (except the calling one) are
	/// notified again with `for_notified` as soon as the calling callback returns.
	/// The remaining callbacks then receive `for_pending` instead of the original event.
	///
	/// Calling this repeatedly from the same callback replaces the earlier request.
	///
	/// # Panics
	///
	/// Iff not called from within a callback of an active dispatch of this registry,
	/// or if called while a previous supersession is being replayed.
	#[track_caller]
	pub fn supersede(&self, for_notified: T, for_pending: T) {
		if let Err(error) = self.try_supersede(for_notified, for_pending) {
			panic!("{error}");
		}
	}

	/// Like [`supersede`](`CallbackRegistry::supersede`), but reports misuse as [`Err`].
	///
	/// # Errors
	///
	/// [`RegistryError::NotDispatching`] outside of a dispatch,
	/// [`RegistryError::SupersedeDuringReplay`] while already-notified callbacks are being replayed.
	pub fn try_supersede(&self, for_notified: T, for_pending: T) -> Result<(), RegistryError> {
		let lock = self.critical_mutex.lock();
		let mut borrow = (*lock).borrow_mut();
		match &mut borrow.phase {
			Phase::Idle => Err(RegistryError::NotDispatching),
			Phase::Replaying => Err(RegistryError::SupersedeDuringReplay),
			Phase::Dispatching { superseded } => {
				*superseded = Some((for_notified, for_pending));
				Ok(())
			}
		}
	}
}
