//! The execution substrate for a single fiber: its register context and, for
//! every fiber but the root, its own mmap'd stack.

mod context;
mod pool;
mod stack;

pub use context::Entry;
pub use pool::Pool;
pub use stack::Stack;

use context::Context;

/// Default stack size used when a [`crate::config::Config`] doesn't override
/// it.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// A fiber's context-switchable state.
///
/// The root fiber (the OS thread's own stack, on which the reactor's event
/// loop runs) is represented with `stack: None`; it is never the `to` side
/// of [`Fiber::prepare`], only ever a `from`/`to` endpoint of [`Fiber::switch`].
pub struct Fiber {
	context: Context,
	stack: Option<Stack>
}

impl Fiber {
	/// The fiber representing the thread's own stack.
	#[must_use]
	pub fn root() -> Self {
		Self { context: Context::default(), stack: None }
	}

	/// Allocate a new fiber stack and set it up to begin running `entry(arg)`
	/// the first time it is switched into.
	///
	/// # Safety
	/// `entry` must never return, and must treat `arg` according to whatever
	/// contract the caller and `entry` have privately agreed on.
	pub unsafe fn new(stack: Stack, entry: Entry, arg: *mut ()) -> Self {
		let mut context = Context::default();
		let top = stack.top();

		/* Safety: `top` comes from a freshly mapped stack of `stack.len()`
		 * bytes, which is always larger than the fixed prologue reserved by
		 * `prepare` */
		unsafe { context.prepare(top, entry, arg) };

		Self { context, stack: Some(stack) }
	}

	/// Reuse an already-mapped stack for a new entry point, avoiding the
	/// mmap/munmap round trip.
	///
	/// # Safety
	/// `self` must not currently be running, and must not be reachable from
	/// any other fiber's resume chain.
	pub unsafe fn rebind(&mut self, entry: Entry, arg: *mut ()) {
		let top = self
			.stack
			.as_ref()
			.expect("root fiber cannot be rebound")
			.top();

		/* Safety: guaranteed by caller */
		unsafe { self.context.prepare(top, entry, arg) };
	}

	/// Take the stack out of this fiber, leaving it stackless (suitable only
	/// for dropping or for turning back into a root-like placeholder).
	pub fn take_stack(&mut self) -> Option<Stack> {
		self.stack.take()
	}

	/// Switch execution from the fiber at `from` to the fiber at `to`.
	///
	/// # Safety
	/// `from` must be the context of the fiber currently running on this
	/// thread. Both pointers must stay valid until the switch that resumes
	/// `from` again (the runtime must not move or drop either `Fiber` while
	/// it is the non-running side of a switch).
	pub unsafe fn switch(from: *mut Self, to: *mut Self) {
		/* Safety: guaranteed by caller */
		unsafe {
			context::switch(
				std::ptr::addr_of_mut!((*from).context),
				std::ptr::addr_of_mut!((*to).context)
			);
		}
	}
}

/* Safety: a `Fiber`'s stack is exclusively owned and carries no thread
 * affinity of its own */
unsafe impl Send for Fiber {}
