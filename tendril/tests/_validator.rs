#![allow(dead_code)]

use std::{collections::VecDeque, fmt::Debug, sync::Mutex};

/// Records events in order, so that a test can check exactly what happened since its last check.
pub struct Validator<T>(Mutex<VecDeque<T>>);

impl<T> Validator<T> {
	pub const fn new() -> Self {
		Self(Mutex::new(VecDeque::new()))
	}

	pub fn push(&self, value: T) {
		self.0.lock().unwrap().push_back(value);
	}

	/// Drains everything recorded so far.
	pub fn take(&self) -> Vec<T> {
		self.0.lock().unwrap().drain(..).collect()
	}

	#[track_caller]
	pub fn expect(&self, expected: impl IntoIterator<Item = T>)
	where
		T: Debug + Eq,
	{
		let mut binding = self.0.lock().unwrap();
		let mut a = binding.drain(..);
		let mut b = expected.into_iter();
		loop {
			match (a.next(), b.next()) {
				(None, None) => break,
				(a, b) => assert_eq!(a, b),
			}
		}
	}
}
