//! Object metadata and part locations

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::replication::*;

/// Separator between the object key and the version id in a versioned key
pub const VERSION_ID_SEPARATOR: char = '\u{0}';

/// Build a versioned key from an object key and an optional version id
pub fn versioned_key(key: &str, version_id: Option<&str>) -> String {
	match version_id {
		Some(v) => format!("{}{}{}", key, VERSION_ID_SEPARATOR, v),
		None => key.to_string(),
	}
}

/// Split a versioned key into the object key and the version id
pub fn split_versioned_key(versioned: &str) -> (&str, Option<&str>) {
	match versioned.split_once(VERSION_ID_SEPARATOR) {
		Some((key, version)) => (key, Some(version)),
		None => (versioned, None),
	}
}

/// Inclusive byte range within an object
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ByteRange {
	pub start: u64,
	pub end: u64,
}

impl ByteRange {
	pub fn new(start: u64, end: u64) -> Self {
		Self { start, end }
	}

	/// Number of bytes covered (ranges are inclusive, never empty)
	#[allow(clippy::len_without_is_empty)]
	pub fn len(&self) -> u64 {
		self.end - self.start + 1
	}
}

/// One ordered element of an object's data location
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct PartLocation {
	#[serde(rename = "partNumber")]
	pub part_number: u64,
	#[serde(rename = "partSize")]
	pub part_size: u64,
	/// Byte offset of this part within the object
	#[serde(default)]
	pub start: u64,
	#[serde(rename = "partETag", default, skip_serializing_if = "Option::is_none")]
	pub part_etag: Option<String>,
	/// Backend identity of the part, "partNumber:objectId".
	/// Required before any data I/O is issued for the entry.
	#[serde(
		rename = "dataStoreETag",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_etag: Option<String>,
	#[serde(rename = "dataStoreName")]
	pub data_store_name: String,
	#[serde(
		rename = "dataStoreType",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_type: Option<String>,
}

impl PartLocation {
	/// Object id portion of the dataStoreETag (after the "partNumber:" prefix)
	pub fn data_store_object_id(&self) -> Option<&str> {
		self.data_store_etag
			.as_deref()
			.map(|etag| etag.split_once(':').map(|(_, id)| id).unwrap_or(etag))
	}
}

/// Coalesce adjacent parts that share a backend identity, to minimize
/// the number of destination writes
pub fn reduce_locations(locations: &[PartLocation]) -> Vec<PartLocation> {
	let mut reduced: Vec<PartLocation> = Vec::with_capacity(locations.len());
	for loc in locations {
		match reduced.last_mut() {
			Some(prev)
				if prev.data_store_name == loc.data_store_name
					&& prev.data_store_etag.is_some()
					&& prev.data_store_object_id() == loc.data_store_object_id()
					&& prev.start + prev.part_size == loc.start =>
			{
				prev.part_size += loc.part_size;
			}
			_ => reduced.push(loc.clone()),
		}
	}
	reduced
}

/// Serialized metadata of one object version, as carried in the inner
/// value of an object log entry
#[derive(PartialEq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectMd {
	#[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
	pub version_id: Option<String>,
	#[serde(rename = "content-length", default)]
	pub content_length: u64,
	#[serde(rename = "content-md5", default, skip_serializing_if = "String::is_empty")]
	pub content_md5: String,
	#[serde(
		rename = "content-type",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub content_type: Option<String>,
	#[serde(
		rename = "cache-control",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub cache_control: Option<String>,
	#[serde(
		rename = "content-disposition",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub content_disposition: Option<String>,
	#[serde(
		rename = "content-encoding",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub content_encoding: Option<String>,
	#[serde(rename = "owner-id", default, skip_serializing_if = "String::is_empty")]
	pub owner_id: String,
	#[serde(
		rename = "owner-display-name",
		default,
		skip_serializing_if = "String::is_empty"
	)]
	pub owner_display_name: String,
	#[serde(
		rename = "x-amz-meta",
		default,
		skip_serializing_if = "BTreeMap::is_empty"
	)]
	pub user_metadata: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub location: Vec<PartLocation>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, String>,
	#[serde(rename = "isDeleteMarker", default)]
	pub is_delete_marker: bool,
	#[serde(rename = "replicationInfo", default)]
	pub replication_info: ReplicationInfo,
	// Canonical data store pointers, set by the metadata mirror projection
	#[serde(
		rename = "dataStoreName",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_name: Option<String>,
	#[serde(
		rename = "dataStoreType",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_type: Option<String>,
	#[serde(
		rename = "dataStoreVersionId",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub data_store_version_id: Option<String>,
}

/// One parsed object log entry: the object identity plus its metadata.
/// Owned by the one replication task processing it.
#[derive(PartialEq, Clone, Debug)]
pub struct ObjectEntry {
	bucket: String,
	key: String,
	md: ObjectMd,
}

impl ObjectEntry {
	pub fn new(bucket: String, key: String, md: ObjectMd) -> Self {
		Self { bucket, key, md }
	}

	pub fn bucket(&self) -> &str {
		&self.bucket
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn versioned_key(&self) -> String {
		versioned_key(&self.key, self.md.version_id.as_deref())
	}

	pub fn version_id(&self) -> Option<&str> {
		self.md.version_id.as_deref()
	}

	pub fn content_length(&self) -> u64 {
		self.md.content_length
	}

	pub fn content_md5(&self) -> &str {
		&self.md.content_md5
	}

	pub fn content_type(&self) -> Option<&str> {
		self.md.content_type.as_deref()
	}

	pub fn user_metadata(&self) -> &BTreeMap<String, String> {
		&self.md.user_metadata
	}

	pub fn owner_id(&self) -> &str {
		&self.md.owner_id
	}

	pub fn locations(&self) -> &[PartLocation] {
		&self.md.location[..]
	}

	pub fn tags(&self) -> &BTreeMap<String, String> {
		&self.md.tags
	}

	pub fn is_delete_marker(&self) -> bool {
		self.md.is_delete_marker
	}

	pub fn replication(&self) -> &ReplicationInfo {
		&self.md.replication_info
	}

	pub fn is_nfs(&self) -> bool {
		self.md.replication_info.is_nfs
	}

	pub fn storage_class(&self) -> &str {
		&self.md.replication_info.storage_class
	}

	pub fn content_has(&self, content: ReplicationContent) -> bool {
		self.md.replication_info.content.contains(&content)
	}

	pub fn site_status(&self, site: &str) -> Option<ReplicationStatus> {
		self.md.replication_info.backend(site).map(|b| b.status)
	}

	pub fn site_data_store_version_id(&self, site: &str) -> Option<&str> {
		self.md
			.replication_info
			.backend(site)
			.and_then(|b| b.data_store_version_id.as_deref())
	}

	// ---- Mutators used by the task and the mirror projection ----

	pub fn set_site_status(&mut self, site: &str, status: ReplicationStatus) {
		self.md.replication_info.backend_mut(site).status = status;
		self.md.replication_info.update_status();
	}

	pub fn set_site_data_store_version_id(&mut self, site: &str, id: &str) {
		self.md.replication_info.backend_mut(site).data_store_version_id = Some(id.to_string());
	}

	pub fn set_owner(&mut self, id: &str, display_name: &str) {
		self.md.owner_id = id.to_string();
		self.md.owner_display_name = display_name.to_string();
	}

	/// Rewrite every part location (and the object-level pointer) to
	/// the given canonical data store
	pub fn rewrite_data_store(&mut self, name: &str, store_type: &str) {
		for loc in self.md.location.iter_mut() {
			loc.data_store_name = name.to_string();
			loc.data_store_type = Some(store_type.to_string());
		}
		self.md.data_store_name = Some(name.to_string());
		self.md.data_store_type = Some(store_type.to_string());
	}

	pub fn set_data_store_version_id(&mut self, id: &str) {
		self.md.data_store_version_id = Some(id.to_string());
	}

	/// Serialize the metadata back to its inner-value wire form
	pub fn serialize_md(&self) -> Result<String, ferry_util::error::Error> {
		Ok(serde_json::to_string(&self.md)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn loc(n: u64, size: u64, start: u64, store: &str, etag: &str) -> PartLocation {
		PartLocation {
			part_number: n,
			part_size: size,
			start,
			part_etag: None,
			data_store_etag: Some(etag.to_string()),
			data_store_name: store.to_string(),
			data_store_type: None,
		}
	}

	#[test]
	fn test_versioned_key_round_trip() {
		let vk = versioned_key("photos/cat.jpg", Some("v1"));
		assert_eq!(split_versioned_key(&vk), ("photos/cat.jpg", Some("v1")));
		assert_eq!(split_versioned_key("plain"), ("plain", None));
	}

	#[test]
	fn test_reduce_locations_coalesces_same_backend_object() {
		let locations = vec![
			loc(1, 100, 0, "sproxyd", "1:aaaa"),
			loc(2, 100, 100, "sproxyd", "2:aaaa"),
			loc(3, 50, 200, "sproxyd", "3:bbbb"),
			loc(4, 50, 250, "other", "4:bbbb"),
		];
		let reduced = reduce_locations(&locations);
		assert_eq!(reduced.len(), 3);
		assert_eq!(reduced[0].part_size, 200);
		assert_eq!(reduced[0].start, 0);
		assert_eq!(reduced[1].part_size, 50);
		assert_eq!(reduced[2].data_store_name, "other");
	}

	#[test]
	fn test_reduce_locations_requires_adjacency() {
		let locations = vec![
			loc(1, 100, 0, "sproxyd", "1:aaaa"),
			// hole between 100 and 150
			loc(2, 100, 150, "sproxyd", "2:aaaa"),
		];
		assert_eq!(reduce_locations(&locations).len(), 2);
	}

	#[test]
	fn test_site_status_mutators() {
		let mut entry = ObjectEntry::new("b".into(), "k".into(), ObjectMd::default());
		assert_eq!(entry.site_status("aws-east-1"), None);

		entry.set_site_status("aws-east-1", ReplicationStatus::Completed);
		entry.set_site_data_store_version_id("aws-east-1", "dsv-1");
		assert_eq!(
			entry.site_status("aws-east-1"),
			Some(ReplicationStatus::Completed)
		);
		assert_eq!(
			entry.site_data_store_version_id("aws-east-1"),
			Some("dsv-1")
		);
		assert_eq!(
			entry.replication().status,
			ReplicationStatus::Completed
		);
	}
}
