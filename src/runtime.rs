//! The fiber scheduler: a slotted fiber table, the call stack, and the glue
//! between `Fiber::switch` and a [`Reactor`].
//!
//! There is no process-wide static here — every fiber entry point is handed
//! an explicit [`Runtime`] clone instead, the way the teacher threads its
//! executor handle through spawned work rather than reaching for a global.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::arena::Arena;
use crate::call::{Arg, CallInfo, Frame};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::fiber::{Fiber, Pool, Stack};
use crate::reactor::{Event, Interest, InterestSet, Reactor, Token};
use crate::sync::ParkQueue;

const MUTEX_ASYNC_TOKEN: Token = u64::MAX - 1;
const PENDING_ASYNC_TOKEN: Token = u64::MAX;

/// A stable reference to a fiber, checked against a generation counter so a
/// freed-and-reused table slot can never be mistaken for the fiber that used
/// to live there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FiberHandle {
	index: u32,
	generation: u32
}

/// The handle naming the thread's own stack — the bottom of every call
/// stack, and the only fiber a reactor callback may resume from.
pub const ROOT: FiberHandle = FiberHandle { index: 0, generation: 0 };

impl FiberHandle {
	fn io_token(self) -> Token {
		u64::from(self.index) * 2
	}

	fn timer_token(self) -> Token {
		u64::from(self.index) * 2 + 1
	}

	#[cfg(test)]
	pub(crate) const fn dangling_for_test() -> Self {
		Self { index: 0, generation: 0 }
	}
}

enum Slot {
	Occupied(Box<FiberRecord>),
	Vacant { next_free: Option<u32>, next_generation: u32 }
}

struct FiberRecord {
	generation: u32,
	name: String,
	fiber: Fiber,
	parent: Option<FiberHandle>,
	children: Vec<FiberHandle>,
	reclaimed: bool,
	arena: Arena,
	call_list: crate::call::CallList,
	w_io_expected: bool,
	w_timer_expected: bool,
	active_io: Option<(RawFd, Token)>,
	active_timer: bool,
	parked_on: Option<Box<dyn ParkQueue>>,
	trace: Option<String>
}

impl FiberRecord {
	fn root(warn_threshold: usize) -> Self {
		Self {
			generation: 0,
			name: "root".to_owned(),
			fiber: Fiber::root(),
			parent: None,
			children: Vec::new(),
			reclaimed: false,
			arena: Arena::new(),
			call_list: crate::call::CallList::new(warn_threshold),
			w_io_expected: false,
			w_timer_expected: false,
			active_io: None,
			active_timer: false,
			parked_on: None,
			trace: None
		}
	}
}

struct TrampolineArgs {
	runtime: Runtime,
	handle: FiberHandle,
	entry: Box<dyn FnOnce(Runtime)>
}

/// # Safety
/// Only ever invoked by `Fiber::switch` the first time a freshly prepared
/// fiber is resumed, with `arg` pointing at a `TrampolineArgs` leaked by
/// `Inner::create`.
unsafe extern "C" fn trampoline(arg: *mut ()) -> ! {
	/* Safety: `arg` was produced by `Box::into_raw` in `Inner::create` and
	 * is consumed exactly once, here, on first resume */
	let args = unsafe { Box::from_raw(arg.cast::<TrampolineArgs>()) };
	let TrampolineArgs { runtime, handle, entry } = *args;

	let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry(runtime.clone())));

	if let Err(payload) = outcome {
		crate::error!("fiber {handle:?} entry function panicked; aborting process");
		drop(payload);
		std::process::abort();
	}

	runtime.finish_current(handle)
}

struct Inner {
	reactor: Box<dyn Reactor>,
	config: Config,
	backtraces: bool,
	table: Vec<Slot>,
	free_head: Option<u32>,
	pool: Pool,
	call_stack: Vec<Frame>,
	mutexes_to_resume: VecDeque<FiberHandle>,
	pending_fibers: VecDeque<FiberHandle>,
	zombies: Vec<FiberHandle>
}

impl Inner {
	fn current(&self) -> FiberHandle {
		self.call_stack.last().expect("root frame always present").fiber
	}

	fn record(&self, handle: FiberHandle) -> Option<&FiberRecord> {
		match self.table.get(handle.index as usize)? {
			Slot::Occupied(record) if record.generation == handle.generation => Some(record),
			_ => None
		}
	}

	fn record_mut(&mut self, handle: FiberHandle) -> Option<&mut FiberRecord> {
		match self.table.get_mut(handle.index as usize)? {
			Slot::Occupied(record) if record.generation == handle.generation => Some(record),
			_ => None
		}
	}

	fn handle_for_index(&self, index: u32) -> Option<FiberHandle> {
		match self.table.get(index as usize)? {
			Slot::Occupied(record) => Some(FiberHandle { index, generation: record.generation }),
			Slot::Vacant { .. } => None
		}
	}

	fn fiber_ptr(&mut self, handle: FiberHandle) -> *mut Fiber {
		let record = self.record_mut(handle).expect("fiber_ptr called on a dead handle");

		std::ptr::addr_of_mut!(record.fiber)
	}

	/// Insert a new fiber record, reusing a freed slot (with a bumped
	/// generation) if one is available. `build` receives the generation the
	/// new record must be stamped with.
	fn insert(&mut self, build: impl FnOnce(u32) -> FiberRecord) -> FiberHandle {
		if let Some(index) = self.free_head {
			let Slot::Vacant { next_free, next_generation } = &self.table[index as usize] else {
				unreachable!("free list points at an occupied slot");
			};
			let (next_free, next_generation) = (*next_free, *next_generation);

			self.free_head = next_free;

			let record = build(next_generation);

			self.table[index as usize] = Slot::Occupied(Box::new(record));

			FiberHandle { index, generation: next_generation }
		} else {
			let index = u32::try_from(self.table.len()).expect("fiber table overflow");
			let record = build(0);

			self.table.push(Slot::Occupied(Box::new(record)));

			FiberHandle { index, generation: 0 }
		}
	}

	fn take_slot(&mut self, handle: FiberHandle) -> Option<Box<FiberRecord>> {
		let slot = self.table.get_mut(handle.index as usize)?;

		match slot {
			Slot::Occupied(record) if record.generation == handle.generation => {
				let next_generation = record.generation.wrapping_add(1);
				let Slot::Occupied(record) = std::mem::replace(
					slot,
					Slot::Vacant { next_free: self.free_head, next_generation }
				) else {
					unreachable!("just matched Occupied above");
				};

				self.free_head = Some(handle.index);

				Some(record)
			}
			_ => None
		}
	}
}

/// A cloneable handle to a single-threaded fiber scheduler.
///
/// `Runtime` wraps `Rc<RefCell<_>>`, so it is `!Send`/`!Sync` by construction
/// — fibers scheduled by one `Runtime` never cross a thread boundary, the
/// same restriction the reference places on a single `fbr_context`.
#[derive(Clone)]
pub struct Runtime(Rc<RefCell<Inner>>);

impl Runtime {
	/// Build a runtime backed by the given [`Reactor`].
	///
	/// # Errors
	/// If the reactor fails to arm its two internal async wake channels
	/// (mutex handoff and condvar/explicit-wake delivery).
	pub fn new(reactor: impl Reactor + 'static, config: Config) -> Result<Self> {
		let warn_threshold = config.get_call_list_warn_threshold();
		let backtraces = config.get_backtraces();
		let pool = Pool::new(config.get_pool_retention_ratio(), config.get_pool_retention_min());

		let mut inner = Inner {
			reactor: Box::new(reactor),
			config,
			backtraces,
			table: vec![Slot::Occupied(Box::new(FiberRecord::root(warn_threshold)))],
			free_head: None,
			pool,
			call_stack: vec![Frame { fiber: ROOT, trace: None }],
			mutexes_to_resume: VecDeque::new(),
			pending_fibers: VecDeque::new(),
			zombies: Vec::new()
		};

		inner.reactor.arm_async(MUTEX_ASYNC_TOKEN)?;
		inner.reactor.arm_async(PENDING_ASYNC_TOKEN)?;

		Ok(Self(Rc::new(RefCell::new(inner))))
	}

	/// Convenience constructor using the bundled [`crate::reactor::EpollReactor`].
	///
	/// # Errors
	/// See [`Self::new`].
	pub fn with_epoll(config: Config) -> Result<Self> {
		Self::new(crate::reactor::EpollReactor::new()?, config)
	}

	/// Enable or disable stack-trace capture on fiber create/reclaim,
	/// overriding whatever [`Config::backtraces`] was built with.
	pub fn enable_backtraces(&self, enabled: bool) {
		self.0.borrow_mut().backtraces = enabled;
	}

	/// The fiber currently running on this thread.
	#[must_use]
	pub fn current(&self) -> FiberHandle {
		self.0.borrow().current()
	}

	/// Run one iteration of the reactor, dispatching every watcher that
	/// became ready into the fiber waiting on it.
	///
	/// # Errors
	/// If the underlying [`Reactor::poll`] call fails.
	pub fn poll_once(&self, timeout: Option<Duration>) -> std::io::Result<()> {
		assert_eq!(self.current(), ROOT, "poll_once must be called from the root fiber");

		let events = self.0.borrow_mut().reactor.poll(timeout)?;

		for event in events {
			match event {
				Event::Io(token) => self.dispatch_io(token),
				Event::Timer(token) => self.dispatch_timer(token),
				Event::Async(token) if token == MUTEX_ASYNC_TOKEN => self.process_mutex_async(),
				Event::Async(token) if token == PENDING_ASYNC_TOKEN => self.process_pending_async(),
				Event::Async(_) => {}
			}
		}

		Ok(())
	}

	/// Create a new fiber, using the runtime's configured default stack
	/// size.
	pub fn create(&self, name: impl Into<String>, entry: impl FnOnce(Runtime) + 'static) -> FiberHandle {
		let stack_size = self.0.borrow().config.get_stack_size();

		self.create_with_stack_size(name, entry, stack_size)
	}

	/// Create a new fiber with an explicit stack size override.
	pub fn create_with_stack_size(
		&self, name: impl Into<String>, entry: impl FnOnce(Runtime) + 'static, stack_size: usize
	) -> FiberHandle {
		self.reap_zombies();

		let name = name.into();
		let parent = self.current();
		let warn_threshold = self.0.borrow().config.get_call_list_warn_threshold();

		let stack = self
			.0
			.borrow_mut()
			.pool
			.acquire(stack_size)
			.expect("mmap for a new fiber stack should not fail");

		let handle = {
			let mut inner = self.0.borrow_mut();

			inner.insert(|generation| FiberRecord {
				generation,
				name: name.clone(),
				fiber: Fiber::root(),
				parent: Some(parent),
				children: Vec::new(),
				reclaimed: false,
				arena: Arena::new(),
				call_list: crate::call::CallList::new(warn_threshold),
				w_io_expected: false,
				w_timer_expected: false,
				active_io: None,
				active_timer: false,
				parked_on: None,
				trace: None
			})
		};

		{
			let mut inner = self.0.borrow_mut();

			if let Some(parent_record) = inner.record_mut(parent) {
				parent_record.children.push(handle);
			}
		}

		let boxed_entry: Box<dyn FnOnce(Runtime)> = Box::new(entry);
		let trampoline_args =
			Box::new(TrampolineArgs { runtime: self.clone(), handle, entry: boxed_entry });
		let arg = Box::into_raw(trampoline_args).cast::<()>();

		/* Safety: `stack` is freshly acquired and not aliased; `trampoline`
		 * consumes `arg` exactly once on first resume */
		let fiber = unsafe { Fiber::new(stack, trampoline, arg) };

		let mut inner = self.0.borrow_mut();

		if let Some(record) = inner.record_mut(handle) {
			record.fiber = fiber;
		}

		handle
	}

	/// Reclaim a fiber: detach it from its parent, recursively reclaim its
	/// children, run its arena's cleanup sweep, and dequeue it from any
	/// mutex/condvar queue it was parked on. Idempotent.
	///
	/// # Errors
	/// If `handle` does not name a fiber this runtime knows about (never
	/// created, or already fully reaped).
	pub fn reclaim(&self, handle: FiberHandle) -> Result<()> {
		{
			let inner = self.0.borrow();

			if inner.record(handle).is_none() {
				return Err(Error::from(ErrorKind::NoFiber));
			}
		}

		self.reclaim_tree(handle);

		Ok(())
	}

	fn reclaim_tree(&self, root: FiberHandle) {
		let mut worklist = vec![root];

		while let Some(handle) = worklist.pop() {
			let outcome = {
				let mut inner = self.0.borrow_mut();
				let current = inner.current();

				let Some(record) = inner.record_mut(handle) else { continue };

				if record.reclaimed {
					continue;
				}

				record.reclaimed = true;
				record.w_io_expected = false;
				record.w_timer_expected = false;
				record.arena.clear();

				let active_io = record.active_io.take();
				let had_timer = std::mem::take(&mut record.active_timer);
				let children = std::mem::take(&mut record.children);
				let parked = record.parked_on.take();
				let is_current = handle == current;
				// `record`'s borrow of `inner` ends here; the reactor calls
				// below borrow a disjoint field but still need `inner` as a
				// whole, which method-call borrows can't see through.

				if let Some((fd, token)) = active_io {
					let _ = inner.reactor.disarm_io(fd, token);
				}

				if had_timer {
					let token = handle.timer_token();
					let _ = inner.reactor.disarm_timer(token);
				}

				(children, parked, is_current)
			};

			let (children, parked, is_current) = outcome;

			if let Some(parked) = parked {
				parked.remove(handle);
			}

			worklist.extend(children);

			if is_current {
				self.0.borrow_mut().zombies.push(handle);
			} else {
				self.finalize_reclaimed(handle);
			}
		}
	}

	fn finalize_reclaimed(&self, handle: FiberHandle) {
		let mut inner = self.0.borrow_mut();

		if let Some(mut record) = inner.take_slot(handle) {
			if let Some(stack) = record.fiber.take_stack() {
				inner.pool.release(stack);
			}
		}
	}

	/// Drain fibers that reclaimed themselves (ran to completion) and are
	/// now safe to finalize — they are guaranteed not to be the currently
	/// running fiber at this point.
	fn reap_zombies(&self) {
		let handles = std::mem::take(&mut self.0.borrow_mut().zombies);

		for handle in handles {
			self.finalize_reclaimed(handle);
		}
	}

	#[must_use]
	pub fn is_reclaimed(&self, handle: FiberHandle) -> bool {
		match self.0.borrow().record(handle) {
			Some(record) => record.reclaimed,
			None => true
		}
	}

	/// Whether the current fiber was resumed directly by the root fiber
	/// (a real reactor-driven completion) as opposed to another fiber
	/// calling it directly (a spurious wake). Looks at `top - 1` on the
	/// call stack.
	#[must_use]
	pub fn called_by_root(&self) -> bool {
		let inner = self.0.borrow();
		let len = inner.call_stack.len();

		len < 2 || inner.call_stack[len - 2].fiber == ROOT
	}

	/// Suspend the current fiber, returning control to whichever fiber is
	/// immediately below it on the call stack.
	///
	/// # Panics
	/// If called from the root fiber.
	pub fn yield_now(&self) {
		let (from_ptr, to_ptr) = {
			let mut inner = self.0.borrow_mut();

			assert!(inner.call_stack.len() > 1, "the root fiber must not yield");

			let popped = inner.call_stack.pop().expect("checked len above");
			let to = inner.call_stack.last().expect("root frame always present").fiber;
			let from_ptr = inner.fiber_ptr(popped.fiber);
			let to_ptr = inner.fiber_ptr(to);

			(from_ptr, to_ptr)
		};

		/* Safety: `from_ptr` is the currently running fiber's context;
		 * `to_ptr` names the fiber now at the top of the call stack, whose
		 * context was suspended by a previous `yield_now`/`call`/the
		 * initial transfer into the root fiber */
		unsafe { Fiber::switch(from_ptr, to_ptr) };

		self.reap_zombies();
	}

	/// A raw transfer into `handle` with no call-info attached, used for
	/// reactor-driven and async-queue-driven resumptions. Must only be
	/// called while the root fiber is running.
	fn resume_raw(&self, handle: FiberHandle) {
		let (from_ptr, to_ptr) = {
			let mut inner = self.0.borrow_mut();

			debug_assert_eq!(inner.current(), ROOT, "resume_raw must be called from root");

			inner.call_stack.push(Frame { fiber: handle, trace: None });

			let from_ptr = inner.fiber_ptr(ROOT);
			let to_ptr = inner.fiber_ptr(handle);

			(from_ptr, to_ptr)
		};

		/* Safety: see `yield_now`; `handle` was just validated to be a live,
		 * parked fiber by the caller before this is invoked */
		unsafe { Fiber::switch(from_ptr, to_ptr) };

		self.reap_zombies();
	}

	/// Transfer into `callee` with a call-info record the callee can
	/// retrieve via [`Self::next_call_info`]. Returns once `callee` (or
	/// whichever fiber it transitively `call`s) yields or completes.
	///
	/// # Errors
	/// [`ErrorKind::NoFiber`] if `callee` has already been reclaimed.
	/// [`ErrorKind::InvalidArgument`] if `args` is longer than the
	/// runtime's configured `max_args`.
	pub fn call(&self, callee: FiberHandle, args: &[Arg]) -> Result<i64> {
		let max_args = self.0.borrow().config.get_max_args();

		if args.len() > max_args {
			return Err(Error::from(ErrorKind::InvalidArgument));
		}

		let arg_list =
			crate::call::ArgList::from_slice(args).ok_or(Error::from(ErrorKind::InvalidArgument))?;

		self.call_impl(callee, Some(arg_list))
	}

	/// Transfer into `callee` with no call-info record at all (the callee's
	/// `next_call_info` will not see this transfer).
	///
	/// # Errors
	/// [`ErrorKind::NoFiber`] if `callee` has already been reclaimed.
	pub fn call_noinfo(&self, callee: FiberHandle) -> Result<i64> {
		self.call_impl(callee, None)
	}

	fn call_impl(&self, callee: FiberHandle, args: Option<crate::call::ArgList>) -> Result<i64> {
		let caller = self.current();

		{
			let mut inner = self.0.borrow_mut();

			let Some(record) = inner.record_mut(callee) else {
				return Err(Error::from(ErrorKind::NoFiber));
			};

			if record.reclaimed {
				return Err(Error::from(ErrorKind::NoFiber));
			}

			if let Some(args) = args {
				record.call_list.push(CallInfo { caller, args });
			}

			inner.call_stack.push(Frame { fiber: callee, trace: None });
		}

		let (from_ptr, to_ptr) = {
			let mut inner = self.0.borrow_mut();

			let from_ptr = inner.fiber_ptr(caller);
			let to_ptr = inner.fiber_ptr(callee);

			(from_ptr, to_ptr)
		};

		/* Safety: `caller` is the running fiber, `callee` was just validated
		 * live and pushed onto the call stack as the new top */
		unsafe { Fiber::switch(from_ptr, to_ptr) };

		self.reap_zombies();

		// The raw transfer protocol carries no return-value channel; `0` is
		// a reserved placeholder for a future extension (see DESIGN.md).
		Ok(0)
	}

	/// Pop the oldest pending call-info record for the current fiber into
	/// `slot`, returning whether one was available.
	pub fn next_call_info(&self, slot: &mut Option<CallInfo>) -> bool {
		let current = self.current();
		let mut inner = self.0.borrow_mut();

		let Some(record) = inner.record_mut(current) else {
			*slot = None;
			return false;
		};

		match record.call_list.pop() {
			Some(info) => {
				*slot = Some(info);
				true
			}
			None => {
				*slot = None;
				false
			}
		}
	}

	/// Write a human-readable rendering of the current call stack to
	/// `log_fn`, one frame per call.
	pub fn dump_stack(&self, mut log_fn: impl FnMut(&str)) {
		let inner = self.0.borrow();

		for (depth, frame) in inner.call_stack.iter().enumerate() {
			let name = inner.record(frame.fiber).map_or("<reclaimed>", |r| r.name.as_str());

			log_fn(&format!("#{depth} {name} ({:?})", frame.fiber));
		}
	}

	fn finish_current(&self, handle: FiberHandle) -> ! {
		let _ = self.reclaim(handle);

		let (from_ptr, to_ptr) = {
			let mut inner = self.0.borrow_mut();

			let popped = inner.call_stack.pop().expect("a fiber's own frame must be on top");
			debug_assert_eq!(popped.fiber, handle);

			let to = inner.call_stack.last().expect("root frame always present").fiber;
			let from_ptr = inner.fiber_ptr(handle);
			let to_ptr = inner.fiber_ptr(to);

			(from_ptr, to_ptr)
		};

		/* Safety: `handle` is the fiber currently executing this function;
		 * it never runs again after this switch, so there is no aliasing
		 * concern with its (now zombie-queued) `Fiber` */
		unsafe { Fiber::switch(from_ptr, to_ptr) };

		unreachable!("a reclaimed fiber must never be switched back into")
	}

	/// Allocate into the currently running fiber's arena.
	pub fn arena_alloc<T: 'static>(&self, value: T) -> crate::arena::ArenaPtr<T> {
		let current = self.current();
		let mut inner = self.0.borrow_mut();
		let record = inner.record_mut(current).expect("current fiber always has a record");

		record.arena.alloc(value)
	}

	/// Allocate into the currently running fiber's arena with a destructor
	/// run on [`Self::arena_free`] or when this fiber is reclaimed.
	pub fn arena_alloc_with_destructor<T: 'static>(
		&self, value: T, destructor: impl FnOnce(&mut T) + 'static
	) -> crate::arena::ArenaPtr<T> {
		let current = self.current();
		let mut inner = self.0.borrow_mut();
		let record = inner.record_mut(current).expect("current fiber always has a record");

		record.arena.alloc_with_destructor(value, Some(destructor))
	}

	/// Free an allocation from the currently running fiber's arena.
	///
	/// # Panics
	/// If `ptr` does not name a live allocation in the current fiber's
	/// arena.
	pub fn arena_free<T: 'static>(&self, ptr: crate::arena::ArenaPtr<T>) {
		let current = self.current();
		let mut inner = self.0.borrow_mut();
		let record = inner.record_mut(current).expect("current fiber always has a record");

		record.arena.free(ptr);
	}

	pub(crate) fn set_parked_on(&self, handle: FiberHandle, parked: Box<dyn ParkQueue>) {
		if let Some(record) = self.0.borrow_mut().record_mut(handle) {
			record.parked_on = Some(parked);
		}
	}

	pub(crate) fn clear_parked_on(&self, handle: FiberHandle) {
		if let Some(record) = self.0.borrow_mut().record_mut(handle) {
			record.parked_on = None;
		}
	}

	pub(crate) fn schedule_mutex_resume(&self, handle: FiberHandle) {
		let mut inner = self.0.borrow_mut();

		inner.mutexes_to_resume.push_back(handle);
		let _ = inner.reactor.signal_async(MUTEX_ASYNC_TOKEN);
	}

	pub(crate) fn schedule_pending_resume(&self, handle: FiberHandle) {
		let mut inner = self.0.borrow_mut();
		let was_empty = inner.pending_fibers.is_empty();

		inner.pending_fibers.push_back(handle);

		if was_empty {
			let _ = inner.reactor.signal_async(PENDING_ASYNC_TOKEN);
		}
	}

	pub(crate) fn arm_io(&self, fd: RawFd, interest: InterestSet) -> std::io::Result<()> {
		let current = self.current();
		let token = current.io_token();

		let mut inner = self.0.borrow_mut();

		inner.reactor.arm_io(fd, interest, token)?;

		if let Some(record) = inner.record_mut(current) {
			record.w_io_expected = true;
			record.active_io = Some((fd, token));
		}

		Ok(())
	}

	pub(crate) fn disarm_io(&self, fd: RawFd) {
		let current = self.current();
		let token = current.io_token();
		let mut inner = self.0.borrow_mut();

		let _ = inner.reactor.disarm_io(fd, token);

		if let Some(record) = inner.record_mut(current) {
			record.w_io_expected = false;
			record.active_io = None;
		}
	}

	pub(crate) fn arm_timer(&self, delay: Duration) -> std::io::Result<()> {
		let current = self.current();
		let token = current.timer_token();
		let mut inner = self.0.borrow_mut();

		inner.reactor.arm_timer(delay, token)?;

		if let Some(record) = inner.record_mut(current) {
			record.w_timer_expected = true;
			record.active_timer = true;
		}

		Ok(())
	}

	pub(crate) fn disarm_timer(&self) {
		let current = self.current();
		let token = current.timer_token();
		let mut inner = self.0.borrow_mut();

		let _ = inner.reactor.disarm_timer(token);

		if let Some(record) = inner.record_mut(current) {
			record.w_timer_expected = false;
			record.active_timer = false;
		}
	}

	fn dispatch_io(&self, token: Token) {
		let index = (token / 2) as u32;
		let Some(handle) = self.0.borrow().handle_for_index(index) else { return };

		let expected = self.0.borrow().record(handle).is_some_and(|r| r.w_io_expected);

		if !expected {
			// Stale event from a watcher disarmed in the same poll batch;
			// harmless, just drop it.
			return;
		}

		self.resume_raw(handle);
	}

	fn dispatch_timer(&self, token: Token) {
		let index = (token / 2) as u32;
		let Some(handle) = self.0.borrow().handle_for_index(index) else { return };

		let expected = self.0.borrow().record(handle).is_some_and(|r| r.w_timer_expected);

		if !expected {
			return;
		}

		self.resume_raw(handle);
	}

	fn process_mutex_async(&self) {
		loop {
			let next = self.0.borrow_mut().mutexes_to_resume.pop_front();

			match next {
				Some(handle) if !self.is_reclaimed(handle) => self.resume_raw(handle),
				Some(_) => {}
				None => break
			}
		}
	}

	fn process_pending_async(&self) {
		let next = self.0.borrow_mut().pending_fibers.pop_front();

		if let Some(handle) = next {
			if !self.is_reclaimed(handle) {
				self.resume_raw(handle);
			}

			let more = !self.0.borrow().pending_fibers.is_empty();

			if more {
				let _ = self.0.borrow_mut().reactor.signal_async(PENDING_ASYNC_TOKEN);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reactor::EpollReactor;

	fn test_runtime() -> Runtime {
		Runtime::new(EpollReactor::new().expect("epoll available"), Config::new())
			.expect("runtime construction should succeed")
	}

	#[test]
	fn root_is_current_on_a_fresh_runtime() {
		let runtime = test_runtime();

		assert_eq!(runtime.current(), ROOT);
		assert!(!runtime.is_reclaimed(ROOT));
	}

	#[test]
	fn ping_pong_call_and_yield() {
		let runtime = test_runtime();
		let log = Rc::new(RefCell::new(Vec::new()));

		let l = log.clone();
		let child = runtime.create("pong", move |rt| {
			l.borrow_mut().push("child-start");
			rt.yield_now();
			l.borrow_mut().push("child-resumed");
		});

		log.borrow_mut().push("root-calling");
		runtime.call(child, &[]).expect("child is alive");
		log.borrow_mut().push("root-resumed-once");
		runtime.call(child, &[]).expect("child is alive");
		log.borrow_mut().push("root-resumed-twice");

		assert_eq!(
			*log.borrow(),
			vec![
				"root-calling",
				"child-start",
				"root-resumed-once",
				"child-resumed",
				"root-resumed-twice"
			]
		);
	}

	#[test]
	fn reclaim_is_idempotent() {
		let runtime = test_runtime();
		let child = runtime.create("idle", |rt| {
			rt.yield_now();
		});

		runtime.call(child, &[]).expect("child is alive");
		runtime.reclaim(child).expect("first reclaim succeeds");
		runtime.reclaim(child).expect("second reclaim is a no-op, not an error");
		assert!(runtime.is_reclaimed(child));
	}

	#[test]
	fn reclaiming_an_unknown_handle_errors() {
		let runtime = test_runtime();
		let bogus = FiberHandle { index: 99, generation: 0 };

		assert!(runtime.reclaim(bogus).is_err());
	}

	#[test]
	fn call_rejects_too_many_arguments() {
		let runtime = test_runtime();
		let child = runtime.create("noop", |rt| {
			rt.yield_now();
		});

		let too_many = [Arg::Int(0); crate::config::DEFAULT_MAX_ARGS + 1];

		assert!(runtime.call(child, &too_many).is_err());
		runtime.reclaim(child).expect("fiber still exists, never resumed past create");
	}
}
