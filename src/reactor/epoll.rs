//! `epoll` + `timerfd` + `eventfd`-backed [`Reactor`].
//!
//! Mirrors how the teacher wraps raw `epoll_create1`/`epoll_ctl`/`epoll_wait`
//! and `eventfd2` behind small safe structs, using the `libc` crate in place
//! of the teacher's hand-rolled raw-syscall layer (see DESIGN.md).

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::{Event, Interest, InterestSet, Reactor, Token};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
	Io,
	Timer,
	Async
}

pub struct EpollReactor {
	epoll_fd: RawFd,
	kinds: HashMap<Token, Kind>,
	owned_fds: HashMap<Token, RawFd>
}

impl EpollReactor {
	pub fn new() -> io::Result<Self> {
		/* Safety: requesting a fresh epoll instance; the returned fd is owned
		 * exclusively by this struct */
		let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };

		if epoll_fd < 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(Self { epoll_fd, kinds: HashMap::new(), owned_fds: HashMap::new() })
	}

	fn epoll_add(&self, fd: RawFd, events: u32, token: Token) -> io::Result<()> {
		let mut event = libc::epoll_event { events, u64: token };

		/* Safety: `event` is a valid, fully-initialized epoll_event; `fd` is
		 * a valid descriptor for the lifetime of this call */
		let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) };

		if rc != 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(())
	}

	fn epoll_del(&self, fd: RawFd) -> io::Result<()> {
		/* Safety: passing a null event pointer is valid for EPOLL_CTL_DEL on
		 * Linux; `fd` is a valid descriptor for the lifetime of this call */
		let rc = unsafe {
			libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
		};

		if rc != 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(())
	}
}

impl Reactor for EpollReactor {
	fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Event>> {
		let timeout_ms = match timeout {
			Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
			None => -1
		};

		let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 64];

		/* Safety: `raw` is a valid buffer of the given length for the
		 * duration of the call */
		let n = unsafe {
			libc::epoll_wait(self.epoll_fd, raw.as_mut_ptr(), raw.len() as i32, timeout_ms)
		};

		if n < 0 {
			let err = io::Error::last_os_error();

			if err.kind() == io::ErrorKind::Interrupted {
				return Ok(Vec::new());
			}

			return Err(err);
		}

		let mut events = Vec::with_capacity(n as usize);

		for raw_event in &raw[..n as usize] {
			let token = raw_event.u64;

			let Some(kind) = self.kinds.get(&token).copied() else {
				continue;
			};

			match kind {
				Kind::Io => events.push(Event::Io(token)),
				Kind::Timer => {
					if let Some(&fd) = self.owned_fds.get(&token) {
						drain(fd);
					}

					events.push(Event::Timer(token));
				}
				Kind::Async => {
					if let Some(&fd) = self.owned_fds.get(&token) {
						drain(fd);
					}

					events.push(Event::Async(token));
				}
			}
		}

		Ok(events)
	}

	fn arm_io(&mut self, fd: RawFd, interest: InterestSet, token: Token) -> io::Result<()> {
		let mut mask = 0u32;

		if interest.contains(Interest::Read) {
			mask |= libc::EPOLLIN as u32;
		}

		if interest.contains(Interest::Write) {
			mask |= libc::EPOLLOUT as u32;
		}

		self.epoll_add(fd, mask, token)?;
		self.kinds.insert(token, Kind::Io);

		Ok(())
	}

	fn disarm_io(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
		self.epoll_del(fd)?;
		self.kinds.remove(&token);

		Ok(())
	}

	fn arm_timer(&mut self, delay: Duration, token: Token) -> io::Result<()> {
		/* Safety: requesting a fresh timerfd */
		let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };

		if fd < 0 {
			return Err(io::Error::last_os_error());
		}

		let spec = libc::itimerspec {
			it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
			it_value: libc::timespec {
				tv_sec: delay.as_secs() as libc::time_t,
				tv_nsec: libc::c_long::from(delay.subsec_nanos() as i32)
			}
		};

		/* Safety: `fd` was just created, `spec` is fully initialized */
		let rc = unsafe {
			libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut())
		};

		if rc != 0 {
			let err = io::Error::last_os_error();

			/* Safety: closing the fd we just created */
			unsafe { libc::close(fd) };

			return Err(err);
		}

		if let Err(err) = self.epoll_add(fd, libc::EPOLLIN as u32, token) {
			/* Safety: closing the fd we just created */
			unsafe { libc::close(fd) };

			return Err(err);
		}

		self.kinds.insert(token, Kind::Timer);
		self.owned_fds.insert(token, fd);

		Ok(())
	}

	fn disarm_timer(&mut self, token: Token) -> io::Result<()> {
		self.kinds.remove(&token);

		if let Some(fd) = self.owned_fds.remove(&token) {
			self.epoll_del(fd)?;

			/* Safety: fd is owned exclusively by this reactor */
			unsafe { libc::close(fd) };
		}

		Ok(())
	}

	fn arm_async(&mut self, token: Token) -> io::Result<()> {
		/* Safety: requesting a fresh eventfd, starting counter at 0 */
		let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };

		if fd < 0 {
			return Err(io::Error::last_os_error());
		}

		if let Err(err) = self.epoll_add(fd, libc::EPOLLIN as u32, token) {
			/* Safety: closing the fd we just created */
			unsafe { libc::close(fd) };

			return Err(err);
		}

		self.kinds.insert(token, Kind::Async);
		self.owned_fds.insert(token, fd);

		Ok(())
	}

	fn signal_async(&mut self, token: Token) -> io::Result<()> {
		let Some(&fd) = self.owned_fds.get(&token) else {
			return Err(io::Error::new(io::ErrorKind::NotFound, "async channel not armed"));
		};

		let value: u64 = 1;

		/* Safety: writing exactly 8 bytes to an eventfd, per its contract */
		let rc = unsafe {
			libc::write(fd, std::ptr::addr_of!(value).cast(), std::mem::size_of::<u64>())
		};

		if rc < 0 {
			let err = io::Error::last_os_error();

			// EAGAIN just means the counter is already saturated/pending; a
			// pending wakeup is exactly what we want, so this isn't an error.
			if err.kind() == io::ErrorKind::WouldBlock {
				return Ok(());
			}

			return Err(err);
		}

		Ok(())
	}

	fn disarm_async(&mut self, token: Token) -> io::Result<()> {
		self.disarm_timer(token)
	}
}

fn drain(fd: RawFd) {
	let mut buf = [0u8; 8];

	/* Safety: reading up to 8 bytes into a buffer of that size; errors
	 * (EAGAIN in particular, if nothing was pending) are intentionally
	 * ignored since this is best-effort draining of a level-triggered fd */
	unsafe {
		libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
	}
}

impl Drop for EpollReactor {
	fn drop(&mut self) {
		for &fd in self.owned_fds.values() {
			/* Safety: every fd in `owned_fds` was opened by this reactor and
			 * is not shared */
			unsafe { libc::close(fd) };
		}

		/* Safety: `epoll_fd` was opened by `Self::new` and is not shared */
		unsafe { libc::close(self.epoll_fd) };
	}
}
