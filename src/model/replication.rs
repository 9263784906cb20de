//! Replication state carried by object metadata

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ferry_util::error::Error;

/// Replication state of one site (or of the whole entry)
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicationStatus {
	Pending,
	Completed,
	Failed,
}

impl Default for ReplicationStatus {
	fn default() -> Self {
		ReplicationStatus::Pending
	}
}

impl fmt::Display for ReplicationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReplicationStatus::Pending => write!(f, "PENDING"),
			ReplicationStatus::Completed => write!(f, "COMPLETED"),
			ReplicationStatus::Failed => write!(f, "FAILED"),
		}
	}
}

/// What the entry asks to be replicated
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationContent {
	Metadata,
	Data,
	Mpu,
	PutTagging,
	DeleteTagging,
}

/// Replication state of one destination site
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationBackend {
	pub site: String,
	pub status: ReplicationStatus,
	#[serde(
		rename = "dataStoreVersionId",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_version_id: Option<String>,
}

/// Replication section of the object metadata
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicationInfo {
	#[serde(default)]
	pub status: ReplicationStatus,
	#[serde(default)]
	pub backends: Vec<ReplicationBackend>,
	#[serde(default)]
	pub content: Vec<ReplicationContent>,
	#[serde(default)]
	pub destination: String,
	#[serde(rename = "storageClass", default)]
	pub storage_class: String,
	#[serde(rename = "storageType", default)]
	pub storage_type: String,
	#[serde(rename = "isNFS", default)]
	pub is_nfs: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
}

impl ReplicationInfo {
	pub fn backend(&self, site: &str) -> Option<&ReplicationBackend> {
		self.backends.iter().find(|b| b.site == site)
	}

	pub fn backend_mut(&mut self, site: &str) -> &mut ReplicationBackend {
		if let Some(i) = self.backends.iter().position(|b| b.site == site) {
			&mut self.backends[i]
		} else {
			self.backends.push(ReplicationBackend {
				site: site.to_string(),
				status: ReplicationStatus::Pending,
				data_store_version_id: None,
			});
			self.backends.last_mut().unwrap()
		}
	}

	/// Recompute the aggregate status from the per-site statuses
	pub fn update_status(&mut self) {
		if self
			.backends
			.iter()
			.any(|b| b.status == ReplicationStatus::Failed)
		{
			self.status = ReplicationStatus::Failed;
		} else if !self.backends.is_empty()
			&& self
				.backends
				.iter()
				.all(|b| b.status == ReplicationStatus::Completed)
		{
			self.status = ReplicationStatus::Completed;
		} else {
			self.status = ReplicationStatus::Pending;
		}
	}
}

/// Coarse categorization of a destination backend; selects multipart
/// upload part constraints and upload id format
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationFamily {
	Generic,
	Gcp,
	Azure,
}

impl FromStr for DestinationFamily {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		match s {
			"generic" => Ok(DestinationFamily::Generic),
			"gcp" => Ok(DestinationFamily::Gcp),
			"azure" => Ok(DestinationFamily::Azure),
			_ => Err(Error::Message(format!(
				"Invalid destination family: {} (expected generic, gcp or azure)",
				s
			))),
		}
	}
}

impl fmt::Display for DestinationFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DestinationFamily::Generic => write!(f, "generic"),
			DestinationFamily::Gcp => write!(f, "gcp"),
			DestinationFamily::Azure => write!(f, "azure"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_aggregation() {
		let mut info = ReplicationInfo::default();
		info.backend_mut("a").status = ReplicationStatus::Completed;
		info.backend_mut("b").status = ReplicationStatus::Pending;
		info.update_status();
		assert_eq!(info.status, ReplicationStatus::Pending);

		info.backend_mut("b").status = ReplicationStatus::Completed;
		info.update_status();
		assert_eq!(info.status, ReplicationStatus::Completed);

		info.backend_mut("a").status = ReplicationStatus::Failed;
		info.update_status();
		assert_eq!(info.status, ReplicationStatus::Failed);
	}

	#[test]
	fn test_content_wire_names() {
		let c = vec![
			ReplicationContent::Data,
			ReplicationContent::Mpu,
			ReplicationContent::PutTagging,
		];
		assert_eq!(
			serde_json::to_string(&c).unwrap(),
			r#"["DATA","MPU","PUT_TAGGING"]"#
		);
	}
}
