//! Runtime configuration.

use crate::fiber::DEFAULT_STACK_SIZE;

/// Tuning knobs for a [`crate::runtime::Runtime`].
///
/// There's no config file format here (the reference library has no
/// equivalent either); this is a plain builder meant to be constructed in
/// code, the way the teacher's executor/worker configs are.
#[derive(Clone, Debug)]
pub struct Config {
	stack_size: usize,
	max_args: usize,
	call_list_warn_threshold: usize,
	pool_retention_ratio: u64,
	pool_retention_min: u64,
	backtraces: bool
}

/// Maximum number of tagged arguments a single `call` may carry, matching
/// the reference's `FBR_CALL_INFO_MAX_ARGS`.
pub const DEFAULT_MAX_ARGS: usize = 10;

/// Default `CallList` length past which a single `warn!` fires, once, to
/// flag a callee that isn't draining its mailbox.
pub const DEFAULT_CALL_LIST_WARN_THRESHOLD: usize = 1000;

/// Default percentage of live fibers the stack pool retains on release,
/// matching the teacher's `Pool::calculate_ideal` heuristic.
pub const DEFAULT_POOL_RETENTION_RATIO: u64 = 20;

/// Default minimum number of stacks the pool retains regardless of load.
pub const DEFAULT_POOL_RETENTION_MIN: u64 = 16;

impl Config {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			stack_size: DEFAULT_STACK_SIZE,
			max_args: DEFAULT_MAX_ARGS,
			call_list_warn_threshold: DEFAULT_CALL_LIST_WARN_THRESHOLD,
			pool_retention_ratio: DEFAULT_POOL_RETENTION_RATIO,
			pool_retention_min: DEFAULT_POOL_RETENTION_MIN,
			backtraces: false
		}
	}

	/// Stack size used for every non-root fiber created by the runtime.
	///
	/// # Panics
	/// If `size` is `0`.
	#[must_use]
	pub fn stack_size(mut self, size: usize) -> Self {
		assert!(size > 0, "fiber stack size must be non-zero");

		self.stack_size = size;
		self
	}

	/// Maximum argument count accepted by `call`. Bounded the same way the
	/// reference bounds `FBR_CALL_INFO_MAX_ARGS` so that `CallInfo` stays a
	/// fixed-size, allocation-free value.
	///
	/// # Panics
	/// If `max` is `0` or greater than [`DEFAULT_MAX_ARGS`].
	#[must_use]
	pub fn max_args(mut self, max: usize) -> Self {
		assert!(
			max > 0 && max <= DEFAULT_MAX_ARGS,
			"max_args must be in 1..={DEFAULT_MAX_ARGS}"
		);

		self.max_args = max;
		self
	}

	/// Queue length past which a fiber's [`crate::call::CallList`] logs a
	/// one-shot warning: a sign the callee has stopped draining its mailbox
	/// rather than a hard limit (the reference has no cap here either).
	///
	/// # Panics
	/// If `threshold` is `0`.
	#[must_use]
	pub fn call_list_warn_threshold(mut self, threshold: usize) -> Self {
		assert!(threshold > 0, "call_list_warn_threshold must be non-zero");

		self.call_list_warn_threshold = threshold;
		self
	}

	/// Percentage of live fibers the stack pool retains when a stack is
	/// released, on top of [`Config::pool_retention_min`].
	///
	/// # Panics
	/// If `percent` is greater than `100`.
	#[must_use]
	pub fn pool_retention_ratio(mut self, percent: u64) -> Self {
		assert!(percent <= 100, "pool_retention_ratio must be a percentage in 0..=100");

		self.pool_retention_ratio = percent;
		self
	}

	/// Minimum number of stacks the pool retains regardless of load.
	#[must_use]
	pub const fn pool_retention_min(mut self, min: u64) -> Self {
		self.pool_retention_min = min;
		self
	}

	/// Capture a fiber's creation/reclaim stack trace for `dump_stack`
	/// diagnostics. Off by default: it's a debugging aid, not something a
	/// production build should pay for.
	#[must_use]
	pub const fn backtraces(mut self, enabled: bool) -> Self {
		self.backtraces = enabled;
		self
	}

	pub(crate) const fn get_stack_size(&self) -> usize {
		self.stack_size
	}

	pub(crate) const fn get_max_args(&self) -> usize {
		self.max_args
	}

	pub(crate) const fn get_backtraces(&self) -> bool {
		self.backtraces
	}

	pub(crate) const fn get_call_list_warn_threshold(&self) -> usize {
		self.call_list_warn_threshold
	}

	pub(crate) const fn get_pool_retention_ratio(&self) -> u64 {
		self.pool_retention_ratio
	}

	pub(crate) const fn get_pool_retention_min(&self) -> u64 {
		self.pool_retention_min
	}
}

impl Default for Config {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_reference_constants() {
		let config = Config::new();

		assert_eq!(config.get_stack_size(), DEFAULT_STACK_SIZE);
		assert_eq!(config.get_max_args(), DEFAULT_MAX_ARGS);
		assert_eq!(config.get_call_list_warn_threshold(), DEFAULT_CALL_LIST_WARN_THRESHOLD);
		assert_eq!(config.get_pool_retention_ratio(), DEFAULT_POOL_RETENTION_RATIO);
		assert_eq!(config.get_pool_retention_min(), DEFAULT_POOL_RETENTION_MIN);
		assert!(!config.get_backtraces());
	}

	#[test]
	#[should_panic(expected = "pool_retention_ratio must be a percentage")]
	fn rejects_pool_retention_ratio_above_100() {
		let _ = Config::new().pool_retention_ratio(101);
	}

	#[test]
	#[should_panic(expected = "max_args must be in")]
	fn rejects_max_args_above_bound() {
		let _ = Config::new().max_args(DEFAULT_MAX_ARGS + 1);
	}
}
