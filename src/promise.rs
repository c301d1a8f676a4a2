//! Deferred completion on an explicit, cooperative task queue.
//!
//! Nothing here runs by itself: settling a [`Promise`] only *schedules* its continuations,
//! and [`Scheduler::run_until_idle`] drains them in FIFO order. This keeps update ordering deterministic
//! and independent of any host event loop.

use crate::error::Error;
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::{collections::VecDeque, rc::Rc};
use tracing::{trace, trace_span, warn};

type Task = Box<dyn FnOnce()>;

/// A shared FIFO task queue. Clones refer to the same queue.
#[derive(Clone, Default)]
pub struct Scheduler(Rc<RefCell<VecDeque<Task>>>);

impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler").field("pending", &self.pending()).finish()
	}
}

impl Scheduler {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn schedule(&self, task: impl 'static + FnOnce()) {
		self.0.borrow_mut().push_back(Box::new(task));
	}

	#[must_use]
	pub fn pending(&self) -> usize {
		self.0.borrow().len()
	}

	#[must_use]
	pub fn is_idle(&self) -> bool {
		self.0.borrow().is_empty()
	}

	/// Runs one task, if any. Tasks may schedule further tasks.
	pub fn run_once(&self) -> bool {
		let task = self.0.borrow_mut().pop_front();
		match task {
			Some(task) => {
				task();
				true
			}
			None => false,
		}
	}

	/// Runs tasks until the queue is empty and returns how many ran.
	pub fn run_until_idle(&self) -> usize {
		let span = trace_span!("Scheduler::run_until_idle");
		let _enter = span.enter();
		let mut count = 0;
		while self.run_once() {
			count += 1;
		}
		trace!("Ran {} task(s).", count);
		count
	}
}

type Continuation<T> = Box<dyn FnOnce(Result<T, Error>)>;

struct State<T> {
	outcome: Option<Result<T, Error>>,
	continuations: Vec<Continuation<T>>,
}

/// A single unit of deferred completion.
///
/// It settles at most once, either [resolved](`Promise::resolve`) or [failed](`Promise::fail`).
/// Each continuation registered with [`then`](`Promise::then`) runs exactly once, in registration order,
/// as a task on the promise's [`Scheduler`].
pub struct Promise<T> {
	scheduler: Scheduler,
	state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Promise<T> {
	fn clone(&self) -> Self {
		Self {
			scheduler: self.scheduler.clone(),
			state: self.state.clone(),
		}
	}
}

impl<T: Debug> Debug for Promise<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Promise").field("outcome", &self.state.borrow().outcome).finish()
	}
}

impl<T: 'static + Clone> Promise<T> {
	#[must_use]
	pub fn pending(scheduler: &Scheduler) -> Self {
		Self {
			scheduler: scheduler.clone(),
			state: Rc::new(RefCell::new(State {
				outcome: None,
				continuations: Vec::new(),
			})),
		}
	}

	#[must_use]
	pub fn resolved(scheduler: &Scheduler, value: T) -> Self {
		let promise = Self::pending(scheduler);
		promise.settle(Ok(value));
		promise
	}

	#[must_use]
	pub fn failed(scheduler: &Scheduler, error: Error) -> Self {
		let promise = Self::pending(scheduler);
		promise.settle(Err(error));
		promise
	}

	/// Returns `false` (and changes nothing) if the promise was already settled.
	pub fn resolve(&self, value: T) -> bool {
		self.settle(Ok(value))
	}

	/// Returns `false` (and changes nothing) if the promise was already settled.
	pub fn fail(&self, error: Error) -> bool {
		self.settle(Err(error))
	}

	/// Resolves or fails according to `outcome`.
	pub fn settle(&self, outcome: Result<T, Error>) -> bool {
		let continuations = {
			let mut state = self.state.borrow_mut();
			if state.outcome.is_some() {
				warn!("Tried to settle a promise twice. Ignoring the second outcome.");
				return false;
			}
			state.outcome = Some(outcome.clone());
			core::mem::take(&mut state.continuations)
		};
		trace!("Settled promise, scheduling {} continuation(s).", continuations.len());
		for continuation in continuations {
			let outcome = outcome.clone();
			self.scheduler.schedule(move || continuation(outcome));
		}
		true
	}

	/// Registers `continuation` to run once this promise is settled.
	///
	/// If it already is, the continuation is scheduled right away (but still doesn't run before the queue is drained).
	pub fn then(&self, continuation: impl 'static + FnOnce(Result<T, Error>)) {
		let outcome = self.state.borrow().outcome.clone();
		match outcome {
			Some(outcome) => self.scheduler.schedule(move || continuation(outcome)),
			None => self.state.borrow_mut().continuations.push(Box::new(continuation)),
		}
	}

	/// A new promise carrying `f` applied to this one's value. Failures pass through.
	#[must_use]
	pub fn map<U: 'static + Clone>(&self, f: impl 'static + FnOnce(T) -> U) -> Promise<U> {
		let mapped = Promise::pending(&self.scheduler);
		let target = mapped.clone();
		self.then(move |outcome| {
			target.settle(outcome.map(f));
		});
		mapped
	}

	#[must_use]
	pub fn is_pending(&self) -> bool {
		self.state.borrow().outcome.is_none()
	}

	/// The outcome, once settled.
	#[must_use]
	pub fn outcome(&self) -> Option<Result<T, Error>> {
		self.state.borrow().outcome.clone()
	}

	#[must_use]
	pub fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}
}

impl Promise<()> {
	/// Resolves once every one of `promises` has settled, whether resolved or failed.
	///
	/// An empty set resolves immediately.
	#[must_use]
	pub fn wait<T: 'static + Clone>(scheduler: &Scheduler, promises: impl IntoIterator<Item = Promise<T>>) -> Promise<()> {
		let all = Promise::pending(scheduler);
		let promises: Vec<_> = promises.into_iter().collect();
		let remaining = Rc::new(Cell::new(promises.len()));
		if promises.is_empty() {
			all.resolve(());
		}
		for promise in promises {
			let all = all.clone();
			let remaining = remaining.clone();
			promise.then(move |_| {
				remaining.set(remaining.get() - 1);
				if remaining.get() == 0 {
					all.resolve(());
				}
			});
		}
		all
	}
}
