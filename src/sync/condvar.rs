//! A fiber-level condition variable, used together with a [`Mutex`].
//!
//! `wait` releases the mutex (handing it to the next waiter if the mutex is
//! already contended, exactly as `Mutex::unlock` would), parks on the
//! condvar's own FIFO queue, and re-acquires the mutex via the normal
//! `Mutex::lock` path before returning — there is no atomic "return holding
//! the mutex" shortcut, matching how the reference re-enters `fbr_mutex_lock`
//! after a wakeup.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Result;
use crate::runtime::{FiberHandle, Runtime};
use crate::sync::mutex::{self, Mutex};
use crate::sync::ParkQueue;

struct State {
	waiting: VecDeque<FiberHandle>
}

struct ParkRef(std::rc::Weak<RefCell<State>>);

impl ParkQueue for ParkRef {
	fn remove(&self, handle: FiberHandle) {
		if let Some(state) = self.0.upgrade() {
			state.borrow_mut().waiting.retain(|&h| h != handle);
		}
	}
}

/// Cheaply `Clone`, sharing the same waiter queue (see [`Mutex`]).
#[derive(Clone)]
pub struct CondVar {
	runtime: Runtime,
	state: Rc<RefCell<State>>
}

impl CondVar {
	#[must_use]
	pub fn new(runtime: &Runtime) -> Self {
		Self { runtime: runtime.clone(), state: Rc::new(RefCell::new(State { waiting: VecDeque::new() })) }
	}

	/// Atomically release `mutex` and park the calling fiber until signaled,
	/// then re-acquire `mutex` before returning.
	///
	/// # Errors
	/// Returns [`crate::error::ErrorKind::MutexNotHeld`] if the calling fiber
	/// does not hold `mutex`; the fiber is not parked in that case.
	pub fn wait(&self, mutex: &Mutex) -> Result<()> {
		let current = self.runtime.current();

		self.state.borrow_mut().waiting.push_back(current);

		let next_owner = match mutex::force_unlock_for_wait(&self.runtime, mutex.state()) {
			Ok(next_owner) => next_owner,
			Err(err) => {
				self.state.borrow_mut().waiting.retain(|&h| h != current);
				return Err(err);
			}
		};

		if let Some(next_owner) = next_owner {
			self.runtime.schedule_mutex_resume(next_owner);
		}

		loop {
			self.runtime.set_parked_on(current, Box::new(ParkRef(Rc::downgrade(&self.state))));
			self.runtime.yield_now();
			self.runtime.clear_parked_on(current);

			if self.runtime.called_by_root() {
				break;
			}

			// Spurious wake (another fiber `call`ed us directly): we're
			// still on `waiting` since only `signal`/`broadcast` pop from
			// it, so just go back to sleep.
		}

		mutex.lock();

		Ok(())
	}

	/// Wake the single longest-waiting fiber, if any.
	pub fn signal(&self) {
		let next = self.state.borrow_mut().waiting.pop_front();

		if let Some(handle) = next {
			self.runtime.schedule_pending_resume(handle);
		}
	}

	/// Wake every currently waiting fiber, preserving FIFO order.
	pub fn broadcast(&self) {
		let waiters: Vec<FiberHandle> = self.state.borrow_mut().waiting.drain(..).collect();

		for handle in waiters {
			self.runtime.schedule_pending_resume(handle);
		}
	}
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
	fn signal_on_empty_queue_is_a_no_op() {
		let runtime = test_runtime();
		let cond = CondVar::new(&runtime);

		cond.signal();
		cond.broadcast();
	}

	#[test]
	fn wait_without_holding_mutex_errors() {
		let runtime = test_runtime();
		let mutex = Mutex::new(&runtime);
		let cond = CondVar::new(&runtime);

		let err = cond.wait(&mutex).expect_err("root never locked the mutex");

		assert_eq!(err.kind(), Some(crate::error::ErrorKind::MutexNotHeld));
	}
}
