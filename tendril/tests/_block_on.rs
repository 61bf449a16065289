#![allow(dead_code)]

use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

/// Polls `f` once, without consuming it.
pub fn poll_once<F: Future + Unpin>(f: &mut F) -> Poll<F::Output> {
	Pin::new(f).poll(&mut Context::from_waker(&waker()))
}

#[track_caller]
pub fn assert_ready<F: Future + Unpin>(f: &mut F) -> F::Output {
	match poll_once(f) {
		Poll::Ready(value) => value,
		Poll::Pending => panic!("Unexpectedly not ready!"),
	}
}

#[track_caller]
pub fn assert_pending<F: Future + Unpin>(f: &mut F) {
	match poll_once(f) {
		Poll::Ready(_) => panic!("Unexpectedly ready!"),
		Poll::Pending => (),
	}
}

fn waker() -> Waker {
	unsafe { Waker::from_raw(raw_waker()) }
}

fn raw_waker() -> RawWaker {
	RawWaker::new(&(), &RawWakerVTable::new(|_| raw_waker(), drop, drop, drop))
}
