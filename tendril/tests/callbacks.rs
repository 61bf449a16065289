use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{Arc, Weak},
};

use tendril::{callback, shadow_clone, Callback, CallbackRegistry, RegistryError};

mod _validator;
use _validator::Validator;

type Log = Arc<Validator<(&'static str, &'static str)>>;

fn recorder(v: &Log, name: &'static str) -> Callback<&'static str> {
	let v = Arc::clone(v);
	callback(move |event: &&'static str| v.push((name, *event)))
}

#[test]
fn add_is_unique() {
	let v = Arc::new(Validator::new());
	let registry = CallbackRegistry::new();

	let observer = callback({
		shadow_clone!(v);
		move |event: &i32| v.push(*event)
	});
	assert!(registry.add(Arc::clone(&observer)));
	assert!(!registry.add(Arc::clone(&observer)));
	assert_eq!(registry.len(), 1);

	registry.dispatch(1);
	v.expect([1]);

	registry.dispatch(2);
	v.expect([2]);
}

#[test]
fn registration_order() {
	let v: Log = Arc::new(Validator::new());
	let registry = CallbackRegistry::new();
	for name in ["a", "b", "c"] {
		registry.add(recorder(&v, name));
	}

	registry.dispatch("e");
	v.expect([("a", "e"), ("b", "e"), ("c", "e")]);
}

#[test]
fn remove() {
	let v: Log = Arc::new(Validator::new());
	let registry = CallbackRegistry::new();
	let a = recorder(&v, "a");
	let b = recorder(&v, "b");
	registry.add(Arc::clone(&a));
	registry.add(Arc::clone(&b));

	assert!(registry.remove(&a));
	assert!(!registry.remove(&a));
	assert!(!registry.contains(&a));
	assert!(registry.contains(&b));

	registry.dispatch("e");
	v.expect([("b", "e")]);

	// Re-adding appends.
	assert!(registry.add(Arc::clone(&a)));
	registry.dispatch("f");
	v.expect([("b", "f"), ("a", "f")]);
}

#[test]
fn removal_during_dispatch_keeps_snapshot() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());
	let c = recorder(&v, "c");

	let a = callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v, c);
		move |event: &&'static str| {
			v.push(("a", *event));
			Weak::upgrade(&registry).unwrap().remove(&c);
		}
	});
	registry.add(a);
	registry.add(recorder(&v, "b"));
	registry.add(Arc::clone(&c));

	registry.dispatch("first");
	v.expect([("a", "first"), ("b", "first"), ("c", "first")]);

	registry.dispatch("second");
	v.expect([("a", "second"), ("b", "second")]);
}

#[test]
fn addition_during_dispatch_waits_for_next_dispatch() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());
	let d = recorder(&v, "d");

	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v, d);
		move |event: &&'static str| {
			v.push(("a", *event));
			Weak::upgrade(&registry).unwrap().add(Arc::clone(&d));
		}
	}));
	registry.add(recorder(&v, "b"));

	registry.dispatch("first");
	v.expect([("a", "first"), ("b", "first")]);

	registry.dispatch("second");
	v.expect([("a", "second"), ("b", "second"), ("d", "second")]);
}

#[test]
fn nested_dispatch_is_an_error() {
	let v = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &i32| {
			v.push(Weak::upgrade(&registry).unwrap().try_dispatch(event + 1));
		}
	}));

	registry.dispatch(1);
	v.expect([Err(RegistryError::AlreadyDispatching)]);
	assert!(!registry.is_dispatching());
}

#[test]
#[should_panic(expected = "already dispatching")]
fn nested_dispatch_panics() {
	let registry = Arc::new(CallbackRegistry::new());
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		move |event: &i32| Weak::upgrade(&registry).unwrap().dispatch(event + 1)
	}));

	registry.dispatch(1);
}

#[test]
fn supersede_splits_dispatch() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(recorder(&v, "a"));
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &&'static str| {
			v.push(("b", *event));
			Weak::upgrade(&registry).unwrap().supersede("x", "y");
		}
	}));
	registry.add(recorder(&v, "c"));

	registry.dispatch("original");
	v.expect([
		("a", "original"),
		("b", "original"),
		("a", "x"),
		("c", "y"),
	]);
}

#[test]
fn supersede_from_first_observer_replays_nothing() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &&'static str| {
			v.push(("a", *event));
			Weak::upgrade(&registry).unwrap().supersede("x", "y");
		}
	}));
	registry.add(recorder(&v, "b"));

	registry.dispatch("original");
	v.expect([("a", "original"), ("b", "y")]);
}

#[test]
fn last_supersede_wins() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(recorder(&v, "a"));
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		move |_: &&'static str| {
			let registry = Weak::upgrade(&registry).unwrap();
			registry.supersede("x1", "y1");
			registry.supersede("x2", "y2");
		}
	}));
	registry.add(recorder(&v, "c"));

	registry.dispatch("original");
	v.expect([("a", "original"), ("a", "x2"), ("c", "y2")]);
}

#[test]
fn later_supersessions_replay_everyone_before() {
	let v: Log = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(recorder(&v, "a"));
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &&'static str| {
			v.push(("b", *event));
			if *event == "original" {
				Weak::upgrade(&registry).unwrap().supersede("x", "y");
			}
		}
	}));
	registry.add(recorder(&v, "c"));
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &&'static str| {
			v.push(("d", *event));
			Weak::upgrade(&registry).unwrap().supersede("p", "q");
		}
	}));

	registry.dispatch("original");
	v.expect([
		("a", "original"),
		("b", "original"),
		("a", "x"),
		("c", "y"),
		("d", "y"),
		("a", "p"),
		("b", "p"),
		("c", "p"),
	]);
}

#[test]
fn supersede_during_replay_is_an_error() {
	let v = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());

	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		shadow_clone!(v);
		move |event: &&'static str| {
			if *event == "x" {
				v.push(Weak::upgrade(&registry).unwrap().try_supersede("m", "n"));
			}
		}
	}));
	registry.add(callback({
		let registry = Arc::downgrade(&registry);
		move |_: &&'static str| Weak::upgrade(&registry).unwrap().supersede("x", "y")
	}));

	registry.dispatch("original");
	v.expect([Err(RegistryError::SupersedeDuringReplay)]);
}

#[test]
fn supersede_outside_dispatch() {
	let registry = CallbackRegistry::new();
	assert_eq!(
		registry.try_supersede(1, 2),
		Err(RegistryError::NotDispatching)
	);
}

#[test]
#[should_panic(expected = "outside of an active dispatch")]
fn supersede_outside_dispatch_panics() {
	CallbackRegistry::new().supersede(1, 2);
}

#[test]
fn panicking_observer_resets_registry() {
	let v = Arc::new(Validator::new());
	let registry = CallbackRegistry::new();
	registry.add(callback(|event: &i32| assert!(*event > 0, "non-positive")));
	registry.add(callback({
		shadow_clone!(v);
		move |event: &i32| v.push(*event)
	}));

	assert!(catch_unwind(AssertUnwindSafe(|| registry.dispatch(0))).is_err());
	assert!(!registry.is_dispatching());
	v.expect([]);

	registry.dispatch(1);
	v.expect([1]);
}

#[test]
fn clear_drops_without_notifying() {
	let v: Log = Arc::new(Validator::new());
	let registry = CallbackRegistry::new();
	registry.add(recorder(&v, "a"));
	registry.add(recorder(&v, "b"));

	registry.clear();
	assert!(registry.is_empty());
	v.expect([]);

	registry.dispatch("e");
	v.expect([]);
}

#[test]
fn other_threads_wait_for_dispatch() {
	let v = Arc::new(Validator::new());
	let registry = Arc::new(CallbackRegistry::new());
	registry.add(callback({
		shadow_clone!(v);
		move |event: &i32| {
			v.push(*event);
			std::thread::sleep(std::time::Duration::from_millis(5));
			v.push(*event);
		}
	}));

	let threads: Vec<_> = (0..4)
		.map(|i| {
			shadow_clone!(registry);
			std::thread::spawn(move || registry.dispatch(i))
		})
		.collect();
	for thread in threads {
		thread.join().unwrap();
	}

	// Each dispatch ran to completion before the next one started.
	let events = v.take();
	assert_eq!(events.len(), 8);
	for pair in events.chunks(2) {
		assert_eq!(pair[0], pair[1]);
	}
}
