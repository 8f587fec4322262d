//! Stackful cooperative fibers over a single-threaded event reactor.
//!
//! A [`runtime::Runtime`] schedules fibers the way a single OS thread runs
//! code: only one fiber (or the root) ever executes at a time, and control
//! passes between them via an explicit `call`/`yield` transfer rather than a
//! preemptive scheduler. I/O, timers, and the mutex/condvar primitives in
//! [`sync`] all suspend the calling fiber by yielding back to whichever
//! fiber resumed it, ultimately bottoming out at the root fiber running the
//! [`reactor::Reactor`] event loop.

pub mod arena;
pub mod call;
pub mod config;
pub mod error;
pub mod fiber;
pub mod io;
pub mod log;
pub mod reactor;
pub mod runtime;
pub mod sync;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use reactor::EpollReactor;
pub use runtime::{FiberHandle, Runtime};
