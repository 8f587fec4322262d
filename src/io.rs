//! Blocking-style I/O wrappers that park the calling fiber instead of the
//! thread.
//!
//! Every wrapper follows the same shape: arm the relevant watcher, yield,
//! check [`Runtime::called_by_root`] to tell a real completion from a
//! spurious wake, then retry the syscall in a loop that re-arms on
//! `EAGAIN`/`EWOULDBLOCK` and restarts on `EINTR`.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::reactor::Interest;
use crate::runtime::Runtime;

fn park_for(runtime: &Runtime, fd: RawFd, interest: Interest) -> io::Result<()> {
	runtime.arm_io(fd, interest.into())?;
	runtime.yield_now();

	let woke_for_real = runtime.called_by_root();

	runtime.disarm_io(fd);

	if woke_for_real {
		Ok(())
	} else {
		Err(io::Error::from(io::ErrorKind::Interrupted))
	}
}

fn retry_eintr<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
	loop {
		match op() {
			Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
			other => return other
		}
	}
}

/// Read once into `buf`, parking until `fd` is readable.
///
/// # Errors
/// Any I/O error the underlying `read(2)` returns, or
/// [`io::ErrorKind::Interrupted`] if another fiber woke this one directly
/// instead of the reactor (a spurious wake).
pub fn read(runtime: &Runtime, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
	loop {
		park_for(runtime, fd, Interest::Read)?;

		let rc = retry_eintr(|| {
			/* Safety: `fd` is caller-owned and valid for the duration of this
			 * call; `buf` is a valid, exclusively borrowed slice */
			let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };

			if rc >= 0 { Ok(rc as usize) } else { Err(io::Error::last_os_error()) }
		});

		match rc {
			Ok(n) => return Ok(n),
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err)
		}
	}
}

/// Read until `buf` is completely filled or EOF, returning the number of
/// bytes actually read (less than `buf.len()` only at EOF).
///
/// # Errors
/// See [`read`].
pub fn read_all(runtime: &Runtime, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;

	while filled < buf.len() {
		let n = read(runtime, fd, &mut buf[filled..])?;

		if n == 0 {
			break;
		}

		filled += n;
	}

	Ok(filled)
}

/// Read a single line (up to and including `\n`, or until EOF), one byte at
/// a time. Simple and slow by design — callers that care about throughput
/// should buffer themselves, the way the reference leaves buffering to the
/// caller too.
///
/// # Errors
/// See [`read`].
pub fn readline(runtime: &Runtime, fd: RawFd) -> io::Result<Vec<u8>> {
	let mut line = Vec::new();
	let mut byte = [0u8; 1];

	loop {
		let n = read(runtime, fd, &mut byte)?;

		if n == 0 {
			break;
		}

		line.push(byte[0]);

		if byte[0] == b'\n' {
			break;
		}
	}

	Ok(line)
}

/// Write once from `buf`, parking until `fd` is writable.
///
/// # Errors
/// See [`read`].
pub fn write(runtime: &Runtime, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
	loop {
		park_for(runtime, fd, Interest::Write)?;

		let rc = retry_eintr(|| {
			/* Safety: `fd` is caller-owned and valid; `buf` is a valid slice
			 * for the duration of this call */
			let rc = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };

			if rc >= 0 { Ok(rc as usize) } else { Err(io::Error::last_os_error()) }
		});

		match rc {
			Ok(n) => return Ok(n),
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err)
		}
	}
}

/// Write the entire buffer, looping over short writes.
///
/// # Errors
/// See [`read`].
pub fn write_all(runtime: &Runtime, fd: RawFd, buf: &[u8]) -> io::Result<()> {
	let mut sent = 0;

	while sent < buf.len() {
		sent += write(runtime, fd, &buf[sent..])?;
	}

	Ok(())
}

/// Receive a datagram, along with the sender's raw address bytes.
///
/// # Errors
/// See [`read`].
pub fn recvfrom(runtime: &Runtime, fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Vec<u8>)> {
	loop {
		park_for(runtime, fd, Interest::Read)?;

		let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

		let rc = retry_eintr(|| {
			/* Safety: `addr`/`addr_len` describe a buffer exactly
			 * `sockaddr_storage`-sized; `buf` is a valid slice */
			let rc = unsafe {
				libc::recvfrom(
					fd,
					buf.as_mut_ptr().cast(),
					buf.len(),
					0,
					std::ptr::addr_of_mut!(addr).cast(),
					std::ptr::addr_of_mut!(addr_len)
				)
			};

			if rc >= 0 { Ok(rc as usize) } else { Err(io::Error::last_os_error()) }
		});

		match rc {
			Ok(n) => {
				/* Safety: `addr` was filled in by `recvfrom` above to at most
				 * `addr_len` bytes */
				let raw = unsafe {
					std::slice::from_raw_parts(
						std::ptr::addr_of!(addr).cast::<u8>(),
						addr_len as usize
					)
				};

				return Ok((n, raw.to_vec()));
			}
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err)
		}
	}
}

/// Send a datagram to a raw address (as returned by [`recvfrom`] or built by
/// the caller).
///
/// # Errors
/// See [`read`].
pub fn sendto(runtime: &Runtime, fd: RawFd, buf: &[u8], addr: &[u8]) -> io::Result<usize> {
	loop {
		park_for(runtime, fd, Interest::Write)?;

		let rc = retry_eintr(|| {
			/* Safety: `addr` is a valid `sockaddr`-compatible buffer of
			 * `addr.len()` bytes, `buf` is a valid slice */
			let rc = unsafe {
				libc::sendto(
					fd,
					buf.as_ptr().cast(),
					buf.len(),
					0,
					addr.as_ptr().cast(),
					addr.len() as libc::socklen_t
				)
			};

			if rc >= 0 { Ok(rc as usize) } else { Err(io::Error::last_os_error()) }
		});

		match rc {
			Ok(n) => return Ok(n),
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err)
		}
	}
}

/// Accept a connection on a listening socket, parking until one is pending.
///
/// # Errors
/// See [`read`].
pub fn accept(runtime: &Runtime, fd: RawFd) -> io::Result<RawFd> {
	loop {
		park_for(runtime, fd, Interest::Read)?;

		let rc = retry_eintr(|| {
			/* Safety: `fd` is a caller-owned listening socket */
			let rc = unsafe {
				libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_CLOEXEC)
			};

			if rc >= 0 { Ok(rc) } else { Err(io::Error::last_os_error()) }
		});

		match rc {
			Ok(client_fd) => return Ok(client_fd),
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err)
		}
	}
}

/// Suspend the calling fiber for up to `duration`, returning the unslept
/// remainder (clamped to zero).
///
/// A real timer completion returns `Duration::ZERO`; a spurious wake (the
/// fiber was `call`ed directly instead of resumed by the reactor) disarms
/// the timer and returns early with whatever time was left, so the caller
/// can re-arm it — composing a timeout out of `sleep` plus another
/// operation relies on seeing that remainder rather than having it absorbed
/// here.
///
/// # Errors
/// Only if arming the timer itself fails.
pub fn sleep(runtime: &Runtime, duration: Duration) -> io::Result<Duration> {
	let deadline = Instant::now() + duration;
	let remaining = deadline.saturating_duration_since(Instant::now());

	if remaining.is_zero() {
		return Ok(Duration::ZERO);
	}

	runtime.arm_timer(remaining)?;
	runtime.yield_now();

	let woke_for_real = runtime.called_by_root();

	runtime.disarm_timer();

	if woke_for_real {
		Ok(Duration::ZERO)
	} else {
		Ok(deadline.saturating_duration_since(Instant::now()))
	}
}
