//! Call stack frames and the tagged-argument call protocol.

use std::collections::VecDeque;

use crate::config::DEFAULT_MAX_ARGS;
use crate::runtime::FiberHandle;

/// A single tagged call argument.
///
/// Mirrors the reference's `fbr_arg` union: either a signed integer or an
/// opaque pointer, tagged so `next_call_info` can hand callers back exactly
/// what was passed in.
#[derive(Clone, Copy, Debug)]
pub enum Arg {
	Int(i64),
	Ptr(*mut ())
}

/* Safety: an `Arg::Ptr` is never dereferenced by this crate; it is an opaque
 * token the caller and callee agree on the meaning of. The runtime itself
 * never touches more than one thread. */
unsafe impl Send for Arg {}

/// A fixed-capacity vector of [`Arg`]s, capacity [`DEFAULT_MAX_ARGS`].
///
/// No heap allocation, no growth: `MAX_ARG_NUM` is a hard compile-time cap
/// in the reference, not a target to grow toward.
#[derive(Clone, Copy)]
pub struct ArgList {
	args: [Arg; DEFAULT_MAX_ARGS],
	len: usize
}

impl ArgList {
	#[must_use]
	pub const fn new() -> Self {
		Self { args: [Arg::Int(0); DEFAULT_MAX_ARGS], len: 0 }
	}

	/// Builds an `ArgList` from a slice, or `None` if `args.len() >
	/// DEFAULT_MAX_ARGS`.
	#[must_use]
	pub fn from_slice(args: &[Arg]) -> Option<Self> {
		if args.len() > DEFAULT_MAX_ARGS {
			return None;
		}

		let mut list = Self::new();

		list.args[..args.len()].copy_from_slice(args);
		list.len = args.len();

		Some(list)
	}

	#[must_use]
	pub fn as_slice(&self) -> &[Arg] {
		&self.args[..self.len]
	}

	#[must_use]
	pub const fn len(&self) -> usize {
		self.len
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl Default for ArgList {
	fn default() -> Self {
		Self::new()
	}
}

/// A call-info record delivered from caller to callee, retrieved lazily by
/// the callee via `Runtime::next_call_info`.
#[derive(Clone, Copy)]
pub struct CallInfo {
	pub caller: FiberHandle,
	pub args: ArgList
}

/// The callee's FIFO mailbox of pending call-info records.
///
/// Ownership here is plain `VecDeque` rather than the reference's
/// arena-backed linked list: a FIFO queue already gets exactly-once cleanup
/// for free from `VecDeque`'s own `Drop`, so routing it through the general
/// per-fiber arena would only add indirection without changing observable
/// behavior (see DESIGN.md).
#[derive(Default)]
pub struct CallList {
	queue: VecDeque<CallInfo>,
	warn_threshold: usize,
	warned: bool
}

impl CallList {
	#[must_use]
	pub fn new(warn_threshold: usize) -> Self {
		Self { queue: VecDeque::new(), warn_threshold, warned: false }
	}

	pub fn push(&mut self, info: CallInfo) {
		self.queue.push_back(info);

		if !self.warned && self.queue.len() >= self.warn_threshold {
			self.warned = true;

			log::warn!(
				"call list has grown to {} entries; the callee may not be draining it",
				self.queue.len()
			);
		}
	}

	pub fn pop(&mut self) -> Option<CallInfo> {
		let info = self.queue.pop_front();

		if self.queue.len() < self.warn_threshold {
			self.warned = false;
		}

		info
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.queue.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}
}

/// A call-stack frame: which fiber is running, plus a human-readable trace
/// snapshot for `Runtime::dump_stack`.
pub struct Frame {
	pub fiber: FiberHandle,
	pub trace: Option<String>
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn arg_list_rejects_oversized_input() {
		let too_many = [Arg::Int(0); DEFAULT_MAX_ARGS + 1];

		assert!(ArgList::from_slice(&too_many).is_none());
	}

	#[test]
	fn arg_list_round_trips() {
		let args = [Arg::Int(1), Arg::Int(2)];
		let list = ArgList::from_slice(&args).expect("within capacity");

		assert_eq!(list.len(), 2);

		match list.as_slice()[0] {
			Arg::Int(v) => assert_eq!(v, 1),
			Arg::Ptr(_) => panic!("expected Int")
		}
	}

	#[test]
	fn call_list_warns_once_past_threshold() {
		let mut list = CallList::new(2);
		let handle = FiberHandle::dangling_for_test();

		for _ in 0..3 {
			list.push(CallInfo { caller: handle, args: ArgList::new() });
		}

		assert_eq!(list.len(), 3);
	}
}
