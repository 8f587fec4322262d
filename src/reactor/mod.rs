//! The reactor contract the runtime is built against.
//!
//! This crate ships one concrete implementation ([`EpollReactor`]) but the
//! runtime only ever talks to the [`Reactor`] trait, so an embedder with
//! their own event loop can supply one instead.

mod epoll;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use enumflags2::{bitflags, BitFlags};

pub use epoll::EpollReactor;

/// Readiness directions a fiber can wait for on a file descriptor.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
	Read = 0b01,
	Write = 0b10
}

pub type InterestSet = BitFlags<Interest>;

/// An opaque identifier the runtime attaches to a watcher when arming it;
/// handed back unchanged in the matching [`Event`].
pub type Token = u64;

/// One readiness notification produced by a single [`Reactor::poll`] call.
#[derive(Clone, Copy, Debug)]
pub enum Event {
	Io(Token),
	Timer(Token),
	Async(Token)
}

/// The narrow interface the runtime needs from an event loop: fd readiness,
/// one-shot timers, and coalescing cross-call wake signals.
pub trait Reactor {
	/// Run one iteration, returning every watcher that became ready.
	/// `timeout` of `None` means block until at least one event fires.
	fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Event>>;

	/// Arm a level-triggered readiness watcher for `fd`.
	fn arm_io(&mut self, fd: RawFd, interest: InterestSet, token: Token) -> io::Result<()>;

	/// Disarm the readiness watcher previously armed for `fd` under `token`.
	fn disarm_io(&mut self, fd: RawFd, token: Token) -> io::Result<()>;

	/// Arm a one-shot timer that fires `delay` from now.
	fn arm_timer(&mut self, delay: Duration, token: Token) -> io::Result<()>;

	/// Disarm a previously armed timer.
	fn disarm_timer(&mut self, token: Token) -> io::Result<()>;

	/// Register an async wake channel identified by `token`. Repeated
	/// [`Reactor::signal_async`] calls before the next `poll` must coalesce
	/// into a single [`Event::Async`].
	fn arm_async(&mut self, token: Token) -> io::Result<()>;

	/// Wake the channel registered under `token` from any point in the
	/// single-threaded program (there is no cross-thread requirement here,
	/// but the signature mirrors the reference's `ev_async_send`).
	fn signal_async(&mut self, token: Token) -> io::Result<()>;

	/// Tear down the async channel registered under `token`.
	fn disarm_async(&mut self, token: Token) -> io::Result<()>;
}
