//! Fiber-aware synchronization primitives.
//!
//! `Mutex`/`CondVar` park the calling fiber instead of blocking a thread: the
//! waiting fiber is pushed onto a FIFO queue and resumed later by the root
//! fiber, the same way a reactor-driven wakeup is delivered (see
//! `Runtime::schedule_mutex_resume`/`schedule_pending_resume`).

mod condvar;
mod mutex;

pub use condvar::CondVar;
pub use mutex::Mutex;

use crate::runtime::FiberHandle;

/// A back-reference a parked [`FiberHandle`] leaves on its `FiberRecord` so
/// that `Runtime::reclaim` can dequeue it from whatever it's waiting on
/// without the runtime needing to know about mutexes or condvars directly.
pub(crate) trait ParkQueue {
	fn remove(&self, handle: FiberHandle);
}
