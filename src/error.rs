//! Crate-wide error type.
//!
//! Three families, matching the taxonomy in the design docs: programmer
//! errors abort instead of being represented here; operation errors carry
//! an [`ErrorKind`]; I/O errors wrap [`std::io::Error`] so callers can still
//! inspect `raw_os_error()` the way POSIX code expects.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Operation-level failure kinds.
///
/// These correspond to `FBR_EINVAL`/`FBR_ENOFIBER` in the reference plus a
/// couple of cases that a typed Rust API surfaces explicitly instead of
/// relying on an assertion.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Too many arguments were passed to `call`, or some other argument was
	/// out of range.
	InvalidArgument,
	/// The target fiber handle refers to a fiber that has already been
	/// reclaimed (or never existed).
	NoFiber,
	/// `cond.wait` was called with a mutex that the caller does not hold.
	MutexNotHeld,
}

impl ErrorKind {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InvalidArgument => "invalid argument",
			Self::NoFiber => "no such fiber",
			Self::MutexNotHeld => "mutex not held by caller",
		}
	}
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		fmt.write_str(self.as_str())
	}
}

/// The crate's error type.
///
/// `Error::Op` is an operation error (see [`ErrorKind`]); `Error::Io` wraps
/// an I/O failure from one of the [`crate::io`] wrappers, including the
/// `EINTR` case used to represent a spurious wake.
#[derive(Debug, Error)]
pub enum Error {
	#[error("{0}")]
	Op(ErrorKind),

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl Error {
	#[must_use]
	pub const fn kind(&self) -> Option<ErrorKind> {
		match self {
			Self::Op(kind) => Some(*kind),
			Self::Io(_) => None,
		}
	}

	/// Mirrors the reference's `fbr_strerror`, kept for parity even though
	/// `Display` is the idiomatic way to render this error.
	#[must_use]
	pub fn strerror(&self) -> String {
		self.to_string()
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Self {
		Self::Op(kind)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_matches_strerror() {
		let err: Error = ErrorKind::NoFiber.into();

		assert_eq!(err.strerror(), "no such fiber");
		assert_eq!(err.kind(), Some(ErrorKind::NoFiber));
	}

	#[test]
	fn io_error_has_no_kind() {
		let err: Error = io::Error::from(io::ErrorKind::WouldBlock).into();

		assert_eq!(err.kind(), None);
	}
}
