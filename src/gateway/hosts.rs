//! Destination host failover

use std::sync::atomic::{AtomicUsize, Ordering};

use ferry_util::error::{Error, OkOrMessage};

/// Immutable, ordered list of destination hosts with an atomic cursor.
/// The cursor is advanced by the retry runner's failover hook; clients
/// are always constructed fresh against the current host.
pub struct HostPicker {
	hosts: Vec<String>,
	index: AtomicUsize,
}

impl HostPicker {
	pub fn new(hosts: Vec<String>) -> Result<Self, Error> {
		hosts
			.first()
			.ok_or_message("Destination host list cannot be empty")?;
		Ok(Self {
			hosts,
			index: AtomicUsize::new(0),
		})
	}

	pub fn current(&self) -> &str {
		&self.hosts[self.index.load(Ordering::SeqCst) % self.hosts.len()]
	}

	/// Move to the next host round-robin and return it
	pub fn advance(&self) -> &str {
		let previous = self.index.fetch_add(1, Ordering::SeqCst);
		&self.hosts[(previous + 1) % self.hosts.len()]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_round_robin_failover() {
		let picker = HostPicker::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
		assert_eq!(picker.current(), "a");
		assert_eq!(picker.advance(), "b");
		assert_eq!(picker.current(), "b");
		assert_eq!(picker.advance(), "c");
		assert_eq!(picker.advance(), "a");
		assert_eq!(picker.current(), "a");
	}

	#[test]
	fn test_empty_host_list_rejected() {
		assert!(HostPicker::new(vec![]).is_err());
	}
}
