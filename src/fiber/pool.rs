//! Stack retention pool.
//!
//! The runtime is single-threaded, so unlike the teacher's thread-shared
//! pool this one needs no internal locking; the runtime simply owns it.

use super::stack::Stack;
use crate::config::{DEFAULT_POOL_RETENTION_MIN, DEFAULT_POOL_RETENTION_RATIO};

pub struct Pool {
	stacks: Vec<Stack>,
	active: u64,
	retention_ratio: u64,
	retention_min: u64
}

impl Pool {
	#[must_use]
	pub const fn new(retention_ratio: u64, retention_min: u64) -> Self {
		Self { stacks: Vec::new(), active: 0, retention_ratio, retention_min }
	}

	/// Take a stack of exactly `size` bytes from the pool, mapping a fresh
	/// one if none of that size are currently retained.
	///
	/// Retained the fiber's own requested size on reuse rather than always
	/// handing back the default (a latent bug in the reference when stack
	/// sizes vary across fibers; see DESIGN.md).
	pub fn acquire(&mut self, size: usize) -> std::io::Result<Stack> {
		self.active = self.active.checked_add(1).expect("fiber count overflow");

		if let Some(index) = self.stacks.iter().position(|s| s.len() == size) {
			log::trace!(target: "fiberio::fiber::pool", "reusing pooled stack");

			return Ok(self.stacks.swap_remove(index));
		}

		log::trace!(target: "fiberio::fiber::pool", "mapping new stack");

		Stack::new(size)
	}

	/// Returns the ideal number of retained stacks for the given number of
	/// active fibers, matching the teacher's 20% + 16 headroom ratio by
	/// default, or whatever `Config::pool_retention_ratio`/`_min` the pool
	/// was built with.
	const fn ideal_capacity(&self, active: u64) -> u64 {
		active * self.retention_ratio / 100 + self.retention_min
	}

	/// Return a stack to the pool, or drop it if the pool is already at its
	/// ideal retention capacity for the current load.
	pub fn release(&mut self, stack: Stack) {
		self.active = self.active.saturating_sub(1);

		let ideal = self.ideal_capacity(self.active);

		if ideal > self.stacks.len() as u64 {
			log::trace!(target: "fiberio::fiber::pool", "retaining stack in pool");

			self.stacks.push(stack);
		} else {
			log::trace!(target: "fiberio::fiber::pool", "dropping excess stack");
		}
	}

	pub fn active(&self) -> u64 {
		self.active
	}
}

impl Default for Pool {
	fn default() -> Self {
		Self::new(DEFAULT_POOL_RETENTION_RATIO, DEFAULT_POOL_RETENTION_MIN)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ideal_capacity_matches_ratio() {
		let pool = Pool::new(20, 16);

		assert_eq!(pool.ideal_capacity(0), 16);
		assert_eq!(pool.ideal_capacity(100), 36);
	}

	#[test]
	fn acquire_then_release_retains_for_reuse() {
		let mut pool = Pool::default();
		let stack = pool.acquire(64 * 1024).expect("mmap should succeed");

		assert_eq!(pool.active(), 1);

		pool.release(stack);

		assert_eq!(pool.active(), 0);
		assert_eq!(pool.stacks.len(), 1);
	}
}
