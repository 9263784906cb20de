//! Module containing identifier generation helpers

use rand::prelude::*;

/// Generate a random 32-byte identifier, hex-encoded without separators.
///
/// Used for locally synthesized upload ids (azure family) and worker ids.
pub fn gen_hex_id() -> String {
	let mut id = [0u8; 32];
	thread_rng().fill(&mut id[..]);
	hex::encode(id)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_gen_hex_id() {
		let id = gen_hex_id();
		assert_eq!(id.len(), 64);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(id, gen_hex_id());
	}
}
