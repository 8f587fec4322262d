//! Logging helpers built on the `log` facade.
//!
//! Unlike the teacher, this is a library and does not install a global
//! logger via `ctor` — that's an application's call to make (tests and
//! benches wire up `env_logger`). What's kept is the `format_target`
//! convention: tracing a specific runtime object logs its type name and
//! address so interleaved fiber output stays attributable.

use std::any::type_name;

fn struct_name<T>(_: &T) -> &'static str {
	type_name::<T>().rsplit("::").next().unwrap_or("?")
}

fn struct_addr<T>(val: &T) -> String {
	format!("{:p}", std::ptr::from_ref(val))
}

#[must_use]
pub fn format_target<T>(val: &T) -> String {
	format!("{} @ {}", struct_name(val), struct_addr(val))
}

#[macro_export]
macro_rules! error {
	(target: $target: expr, $($arg: tt)+) => {
		log::error!(target: &$crate::log::format_target($target) as &str, $($arg)+)
	};
	($($arg: tt)+) => { log::error!($($arg)+) };
}

#[macro_export]
macro_rules! warn {
	(target: $target: expr, $($arg: tt)+) => {
		log::warn!(target: &$crate::log::format_target($target) as &str, $($arg)+)
	};
	($($arg: tt)+) => { log::warn!($($arg)+) };
}

#[macro_export]
macro_rules! info {
	(target: $target: expr, $($arg: tt)+) => {
		log::info!(target: &$crate::log::format_target($target) as &str, $($arg)+)
	};
	($($arg: tt)+) => { log::info!($($arg)+) };
}

#[macro_export]
macro_rules! debug {
	(target: $target: expr, $($arg: tt)+) => {
		log::debug!(target: &$crate::log::format_target($target) as &str, $($arg)+)
	};
	($($arg: tt)+) => { log::debug!($($arg)+) };
}

#[macro_export]
macro_rules! trace {
	(target: $target: expr, $($arg: tt)+) => {
		log::trace!(target: &$crate::log::format_target($target) as &str, $($arg)+)
	};
	($($arg: tt)+) => { log::trace!($($arg)+) };
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Widget;

	#[test]
	fn format_target_includes_type_name() {
		let widget = Widget;

		assert!(format_target(&widget).starts_with("Widget @ 0x"));
	}
}
