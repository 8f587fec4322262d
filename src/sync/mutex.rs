//! A fiber-level mutex with FIFO wakeup ordering.
//!
//! Ownership transfers to the next waiter inside `unlock`, before the new
//! owner is even resumed — there is no window where a third fiber can steal
//! the lock between `unlock` and the waiter waking up, matching the
//! reference's `fbr_mutex` semantics.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{ErrorKind, Result};
use crate::runtime::{FiberHandle, Runtime};
use crate::sync::ParkQueue;

pub(crate) struct State {
	locked_by: Option<FiberHandle>,
	pending: VecDeque<FiberHandle>
}

struct ParkRef(std::rc::Weak<RefCell<State>>);

impl ParkQueue for ParkRef {
	fn remove(&self, handle: FiberHandle) {
		if let Some(state) = self.0.upgrade() {
			state.borrow_mut().pending.retain(|&h| h != handle);
		}
	}
}

/// A mutex a fiber can `lock`/`try_lock`/`unlock`. Carries no poisoning —
/// a panicking fiber aborts the process (see `crate::runtime`), so there is
/// no partially-run critical section to observe.
///
/// Cheaply `Clone`: every clone shares the same underlying queue, the way
/// handing the same `Rc<Mutex<T>>` to several fibers would.
#[derive(Clone)]
pub struct Mutex {
	runtime: Runtime,
	state: Rc<RefCell<State>>
}

impl Mutex {
	#[must_use]
	pub fn new(runtime: &Runtime) -> Self {
		Self {
			runtime: runtime.clone(),
			state: Rc::new(RefCell::new(State { locked_by: None, pending: VecDeque::new() }))
		}
	}

	/// Acquire the lock without waiting. Returns `false` if it's already
	/// held.
	pub fn try_lock(&self) -> bool {
		let current = self.runtime.current();
		let mut state = self.state.borrow_mut();

		if state.locked_by.is_none() {
			state.locked_by = Some(current);
			true
		} else {
			false
		}
	}

	/// Acquire the lock, parking the calling fiber if it's already held.
	pub fn lock(&self) {
		let current = self.runtime.current();

		loop {
			{
				let mut state = self.state.borrow_mut();

				if state.locked_by.is_none() {
					state.locked_by = Some(current);
					return;
				}

				state.pending.push_back(current);
			}

			self.runtime.set_parked_on(current, Box::new(ParkRef(Rc::downgrade(&self.state))));
			self.runtime.yield_now();
			self.runtime.clear_parked_on(current);

			if !self.runtime.called_by_root() {
				// Spurious wake (a misbehaving fiber `call`ed us directly):
				// we were never granted the lock, go back to sleep.
				continue;
			}

			let state = self.state.borrow();

			if state.locked_by == Some(current) {
				return;
			}
		}
	}

	/// Release the lock. Hands it directly to the next FIFO waiter, if any,
	/// and schedules that fiber's resumption through the root fiber.
	///
	/// # Errors
	/// Returns [`ErrorKind::MutexNotHeld`] if the caller does not hold the
	/// lock.
	pub fn unlock(&self) -> Result<()> {
		let current = self.runtime.current();
		let mut state = self.state.borrow_mut();

		if state.locked_by != Some(current) {
			return Err(ErrorKind::MutexNotHeld.into());
		}

		match state.pending.pop_front() {
			None => state.locked_by = None,
			Some(next) => {
				state.locked_by = Some(next);
				drop(state);
				self.runtime.schedule_mutex_resume(next);
			}
		}

		Ok(())
	}

	pub(crate) fn state(&self) -> &Rc<RefCell<State>> {
		&self.state
	}
}

/// Used by `CondVar::wait` to release the mutex atomically with registering
/// on the condvar's own wait queue, handing it straight to the next FIFO
/// waiter if the mutex is already contended.
///
/// # Errors
/// Returns [`ErrorKind::MutexNotHeld`] if the calling fiber does not hold
/// `state`'s mutex, instead of silently reassigning ownership out from under
/// whoever actually holds it.
pub(crate) fn force_unlock_for_wait(
	runtime: &Runtime, state: &Rc<RefCell<State>>
) -> Result<Option<FiberHandle>> {
	let mut state = state.borrow_mut();
	let current = runtime.current();

	if state.locked_by != Some(current) {
		return Err(ErrorKind::MutexNotHeld.into());
	}

	Ok(match state.pending.pop_front() {
		None => {
			state.locked_by = None;
			None
		}
		Some(next) => {
			state.locked_by = Some(next);
			Some(next)
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use crate::reactor::EpollReactor;

	fn test_runtime() -> Runtime {
		Runtime::new(EpollReactor::new().expect("epoll available"), Config::new())
			.expect("runtime construction should succeed")
	}

	#[test]
	fn uncontended_lock_succeeds_immediately() {
		let runtime = test_runtime();
		let mutex = Mutex::new(&runtime);

		assert!(mutex.try_lock());
		assert!(!mutex.try_lock());
		mutex.unlock().expect("root holds the lock");
	}

	#[test]
	fn unlock_without_holding_errors() {
		let runtime = test_runtime();
		let mutex = Mutex::new(&runtime);

		assert!(mutex.unlock().is_err());
	}
}
