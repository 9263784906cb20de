//! Module containing helper functions to manipulate time

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns milliseconds since UNIX epoch
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("clock is set before the UNIX epoch")
		.as_millis() as u64
}
