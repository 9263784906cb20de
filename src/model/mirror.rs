//! Projection of log entries into metadata mirror writes.
//!
//! The mirror processor itself is an external collaborator consuming
//! the same log; only its write interface and the pure projection of
//! entries into mirror records live here.

use async_trait::async_trait;

use ferry_util::error::Error;

use crate::entry::*;
use crate::object::ObjectEntry;

/// Write surface of the document-database metadata mirror.
/// Versioning semantics are preserved in the versioned key, so all
/// writes go through the unversioned operations.
#[async_trait]
pub trait MetadataMirror: Send + Sync {
	async fn put_object_no_ver(&self, bucket: &str, key: &str, value: &[u8])
		-> Result<(), Error>;
	async fn delete_object_no_ver(&self, bucket: &str, key: &str) -> Result<(), Error>;
}

/// One write to apply to the mirror
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MirrorWrite {
	pub bucket: String,
	pub key: String,
	/// `None` projects to a deletion or a value-less listing record
	pub value: Option<Vec<u8>>,
}

/// Owner identity substituted on mirrored objects
#[derive(Clone, Debug)]
pub struct OwnerRewrite {
	pub id: String,
	pub display_name: String,
}

/// Canonical data store identity of the mirror
#[derive(Clone, Debug)]
pub struct MirrorTarget {
	/// Prefix prepended to bucket names in the mirror namespace
	pub prefix: String,
	pub data_store_name: String,
	pub data_store_type: String,
	/// Owner substitution applied to mirrored objects, when the
	/// mirror namespace belongs to a different account
	pub owner_rewrite: Option<OwnerRewrite>,
}

impl MirrorTarget {
	fn prefixed(&self, bucket: &str) -> String {
		format!("{}-{}", self.prefix, bucket)
	}

	/// Project an object entry: locations are rewritten to the
	/// mirror's canonical data store and, when a version id is
	/// present, the canonical dataStoreVersionId is set.
	pub fn object_write(&self, entry: &ObjectEntry) -> Result<MirrorWrite, Error> {
		let mut entry = entry.clone();
		entry.rewrite_data_store(&self.data_store_name, &self.data_store_type);
		if let Some(version_id) = entry.version_id().map(str::to_string) {
			entry.set_data_store_version_id(&version_id);
		}
		if let Some(owner) = &self.owner_rewrite {
			entry.set_owner(&owner.id, &owner.display_name);
		}
		Ok(MirrorWrite {
			bucket: self.prefixed(entry.bucket()),
			key: entry.versioned_key(),
			value: Some(entry.serialize_md()?.into_bytes()),
		})
	}

	/// Project a deletion of a versioned key
	pub fn delete_write(&self, entry: &DeleteEntry) -> MirrorWrite {
		MirrorWrite {
			bucket: self.prefixed(&entry.bucket),
			key: entry.key.clone(),
			value: None,
		}
	}

	/// Project an account bucket-listing record
	pub fn bucket_write(&self, bucket_name: &str) -> MirrorWrite {
		MirrorWrite {
			bucket: USERS_BUCKET.to_string(),
			key: self.prefixed(bucket_name),
			value: None,
		}
	}

	/// Project a bucket metadata blob
	pub fn bucket_md_write(&self, entry: &BucketMdEntry) -> MirrorWrite {
		let name = self.prefixed(&entry.name);
		MirrorWrite {
			bucket: name.clone(),
			key: name,
			value: entry.value.as_ref().map(|v| v.clone().into_bytes()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::object::*;

	fn target() -> MirrorTarget {
		MirrorTarget {
			prefix: "mirror".to_string(),
			data_store_name: "mirror-store".to_string(),
			data_store_type: "mongodb".to_string(),
			owner_rewrite: None,
		}
	}

	#[test]
	fn test_object_write_rewrites_data_store() {
		let mut md = ObjectMd::default();
		md.version_id = Some("v1".to_string());
		md.location = vec![PartLocation {
			part_number: 1,
			part_size: 10,
			start: 0,
			part_etag: None,
			data_store_etag: Some("1:aaaa".to_string()),
			data_store_name: "sproxyd".to_string(),
			data_store_type: None,
		}];
		let entry = ObjectEntry::new("photos".into(), "cat.jpg".into(), md);

		let write = target().object_write(&entry).unwrap();
		assert_eq!(write.bucket, "mirror-photos");
		assert_eq!(write.key, versioned_key("cat.jpg", Some("v1")));

		let projected: ObjectMd =
			serde_json::from_slice(write.value.as_deref().unwrap()).unwrap();
		assert_eq!(projected.location[0].data_store_name, "mirror-store");
		assert_eq!(
			projected.location[0].data_store_type.as_deref(),
			Some("mongodb")
		);
		assert_eq!(projected.data_store_version_id.as_deref(), Some("v1"));
	}

	#[test]
	fn test_object_write_applies_owner_rewrite() {
		let mut t = target();
		t.owner_rewrite = Some(OwnerRewrite {
			id: "mirror-account".to_string(),
			display_name: "Mirror".to_string(),
		});
		let mut md = ObjectMd::default();
		md.owner_id = "original-owner".to_string();
		let entry = ObjectEntry::new("photos".into(), "cat.jpg".into(), md);

		let write = t.object_write(&entry).unwrap();
		let projected: ObjectMd =
			serde_json::from_slice(write.value.as_deref().unwrap()).unwrap();
		assert_eq!(projected.owner_id, "mirror-account");
		assert_eq!(projected.owner_display_name, "Mirror");
	}

	#[test]
	fn test_bucket_writes() {
		let t = target();
		let listing = t.bucket_write("photos");
		assert_eq!(listing.bucket, USERS_BUCKET);
		assert_eq!(listing.key, "mirror-photos");
		assert_eq!(listing.value, None);

		let md = t.bucket_md_write(&BucketMdEntry {
			name: "photos".into(),
			value: Some("{}".into()),
		});
		assert_eq!(md.bucket, "mirror-photos");
		assert_eq!(md.key, "mirror-photos");
		assert_eq!(md.value.as_deref(), Some(&b"{}"[..]));
	}
}
