//! Transient state of one multipart upload

use ferry_gateway::destination::CompletedPart;
use ferry_model::replication::DestinationFamily;
use ferry_util::data::gen_hex_id;

/// Per-entry state of an open multipart upload. Created on init-MPU
/// (or synthesized locally for the azure family) and destroyed on
/// complete-MPU or abort-MPU.
pub struct UploadSession {
	upload_id: String,
	family: DestinationFamily,
	parts: Vec<CompletedPart>,
}

impl UploadSession {
	pub fn new(upload_id: String, family: DestinationFamily) -> Self {
		Self {
			upload_id,
			family,
			parts: vec![],
		}
	}

	/// Session with a locally generated upload id (azure family)
	pub fn local(family: DestinationFamily) -> Self {
		Self::new(gen_hex_id(), family)
	}

	pub fn upload_id(&self) -> &str {
		&self.upload_id
	}

	/// Record the uploaded parts, restoring part-number order after
	/// the unordered parallel upload. Only the azure family carries
	/// per-part sub-part counts into complete-MPU.
	pub fn record_parts(&mut self, mut parts: Vec<CompletedPart>) {
		parts.sort_by_key(|p| p.part_number);
		if self.family != DestinationFamily::Azure {
			for part in parts.iter_mut() {
				part.number_sub_parts = None;
			}
		}
		self.parts = parts;
	}

	pub fn parts(&self) -> &[CompletedPart] {
		&self.parts[..]
	}
}
