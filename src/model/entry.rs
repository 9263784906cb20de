//! Parsing of log bus records into typed queue entries

use serde_json::{json, Value};

use ferry_util::bus::LogRecord;
use ferry_util::error::Error;

use crate::object::*;

/// Account bucket-listing namespace of the source metadata layer
pub const USERS_BUCKET: &str = "users..bucket";

/// One parsed record from the inbound log bus
#[derive(PartialEq, Clone, Debug)]
pub enum QueueEntry {
	/// An object version to replicate (or a metadata-only mutation)
	Object(ObjectEntry),
	/// Deletion of a versioned key
	Delete(DeleteEntry),
	/// Account bucket-listing record (metadata mirror food)
	Bucket(BucketEntry),
	/// Bucket metadata blob (metadata mirror food)
	BucketMd(BucketMdEntry),
	/// Out-of-band action request (e.g. copyData)
	Action(ActionEntry),
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct DeleteEntry {
	pub bucket: String,
	/// Versioned key of the deleted entry
	pub key: String,
}

impl DeleteEntry {
	pub fn object_key(&self) -> &str {
		split_versioned_key(&self.key).0
	}

	pub fn version_id(&self) -> Option<&str> {
		split_versioned_key(&self.key).1
	}
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BucketEntry {
	/// Listing key, identifying the owner and the bucket
	pub key: String,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BucketMdEntry {
	pub name: String,
	/// Serialized bucket metadata, opaque to the core
	pub value: Option<String>,
}

#[derive(PartialEq, Clone, Debug)]
pub struct ActionEntry {
	pub action_type: String,
	pub parameters: Value,
}

fn required_str<'a>(v: &'a Value, field: &str) -> Result<&'a str, Error> {
	v.get(field)
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Malformed(format!("missing or invalid field: {}", field)))
}

impl QueueEntry {
	/// Parse a log bus record into a typed entry.
	/// Fails with `Error::Malformed` when the value cannot be decoded
	/// or required fields are absent.
	pub fn parse(record: &LogRecord) -> Result<QueueEntry, Error> {
		let value: Value = serde_json::from_slice(&record.value)
			.map_err(|e| Error::Malformed(format!("record value is not JSON: {}", e)))?;

		match required_str(&value, "type")? {
			"del" => Ok(QueueEntry::Delete(DeleteEntry {
				bucket: required_str(&value, "bucket")?.to_string(),
				key: required_str(&value, "key")?.to_string(),
			})),
			"put" => {
				let bucket = required_str(&value, "bucket")?;
				match value.get("key").and_then(Value::as_str) {
					None => Ok(QueueEntry::BucketMd(BucketMdEntry {
						name: bucket.to_string(),
						value: value
							.get("value")
							.and_then(Value::as_str)
							.map(str::to_string),
					})),
					Some(key) if bucket == USERS_BUCKET => Ok(QueueEntry::Bucket(BucketEntry {
						key: key.to_string(),
					})),
					Some(key) => {
						let md_str = required_str(&value, "value")?;
						let md: ObjectMd = serde_json::from_str(md_str).map_err(|e| {
							Error::Malformed(format!("invalid object metadata: {}", e))
						})?;
						let (object_key, _version) = split_versioned_key(key);
						Ok(QueueEntry::Object(ObjectEntry::new(
							bucket.to_string(),
							object_key.to_string(),
							md,
						)))
					}
				}
			}
			"action" => Ok(QueueEntry::Action(ActionEntry {
				action_type: required_str(&value, "actionType")?.to_string(),
				parameters: value.get("parameters").cloned().unwrap_or(Value::Null),
			})),
			other => Err(Error::Malformed(format!("unknown entry type: {}", other))),
		}
	}

	/// Serialize the entry back to its wire form
	pub fn serialize(&self) -> Result<Vec<u8>, Error> {
		let value = match self {
			QueueEntry::Object(entry) => json!({
				"type": "put",
				"bucket": entry.bucket(),
				"key": entry.versioned_key(),
				"value": entry.serialize_md()?,
			}),
			QueueEntry::Delete(entry) => json!({
				"type": "del",
				"bucket": entry.bucket,
				"key": entry.key,
			}),
			QueueEntry::Bucket(entry) => json!({
				"type": "put",
				"bucket": USERS_BUCKET,
				"key": entry.key,
				"value": Value::Null,
			}),
			QueueEntry::BucketMd(entry) => match &entry.value {
				Some(v) => json!({
					"type": "put",
					"bucket": entry.name,
					"value": v,
				}),
				None => json!({
					"type": "put",
					"bucket": entry.name,
				}),
			},
			QueueEntry::Action(entry) => json!({
				"type": "action",
				"actionType": entry.action_type,
				"parameters": entry.parameters,
			}),
		};
		Ok(serde_json::to_vec(&value)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::replication::*;

	fn record(value: Vec<u8>) -> LogRecord {
		LogRecord {
			topic: "entries".to_string(),
			partition: 0,
			offset: 0,
			key: None,
			value,
		}
	}

	fn sample_md() -> ObjectMd {
		let mut md = ObjectMd::default();
		md.version_id = Some("v1".to_string());
		md.content_length = 1024;
		md.content_md5 = "d41d8cd98f00b204e9800998ecf8427e".to_string();
		md.owner_id = "owner".to_string();
		md.location = vec![PartLocation {
			part_number: 1,
			part_size: 1024,
			start: 0,
			part_etag: Some("etag1".to_string()),
			data_store_etag: Some("1:aaaa".to_string()),
			data_store_name: "sproxyd".to_string(),
			data_store_type: None,
		}];
		md.replication_info = ReplicationInfo {
			status: ReplicationStatus::Pending,
			backends: vec![ReplicationBackend {
				site: "aws-east-1".to_string(),
				status: ReplicationStatus::Pending,
				data_store_version_id: None,
			}],
			content: vec![ReplicationContent::Data, ReplicationContent::Metadata],
			destination: "arn:aws:s3:::dest".to_string(),
			storage_class: "aws-east-1".to_string(),
			storage_type: "aws_s3".to_string(),
			is_nfs: false,
			role: None,
		};
		md
	}

	#[test]
	fn test_parse_object_entry() {
		let md = sample_md();
		let wire = json!({
			"type": "put",
			"bucket": "photos",
			"key": format!("cat.jpg{}v1", VERSION_ID_SEPARATOR),
			"value": serde_json::to_string(&md).unwrap(),
		});
		let entry = QueueEntry::parse(&record(serde_json::to_vec(&wire).unwrap())).unwrap();
		match &entry {
			QueueEntry::Object(obj) => {
				assert_eq!(obj.bucket(), "photos");
				assert_eq!(obj.key(), "cat.jpg");
				assert_eq!(obj.version_id(), Some("v1"));
				assert_eq!(obj.content_length(), 1024);
				assert!(obj.content_has(ReplicationContent::Data));
			}
			_ => panic!("expected object entry"),
		}
	}

	#[test]
	fn test_parse_serialize_identity() {
		let md = sample_md();
		let entries = vec![
			QueueEntry::Object(ObjectEntry::new("photos".into(), "cat.jpg".into(), md)),
			QueueEntry::Delete(DeleteEntry {
				bucket: "photos".into(),
				key: versioned_key("cat.jpg", Some("v1")),
			}),
			QueueEntry::Bucket(BucketEntry {
				key: "owner..|..photos".into(),
			}),
			QueueEntry::BucketMd(BucketMdEntry {
				name: "photos".into(),
				value: Some("{\"acl\":{}}".into()),
			}),
			QueueEntry::Action(ActionEntry {
				action_type: "copyData".into(),
				parameters: json!({"target": "aws-east-1"}),
			}),
		];
		for entry in entries {
			let reparsed = QueueEntry::parse(&record(entry.serialize().unwrap())).unwrap();
			assert_eq!(entry, reparsed);
		}
	}

	#[test]
	fn test_parse_delete_entry_versioned_key() {
		let wire = json!({
			"type": "del",
			"bucket": "photos",
			"key": format!("cat.jpg{}v7", VERSION_ID_SEPARATOR),
		});
		match QueueEntry::parse(&record(serde_json::to_vec(&wire).unwrap())).unwrap() {
			QueueEntry::Delete(del) => {
				assert_eq!(del.object_key(), "cat.jpg");
				assert_eq!(del.version_id(), Some("v7"));
			}
			_ => panic!("expected delete entry"),
		}
	}

	#[test]
	fn test_parse_malformed() {
		assert!(matches!(
			QueueEntry::parse(&record(b"not json".to_vec())),
			Err(Error::Malformed(_))
		));
		assert!(matches!(
			QueueEntry::parse(&record(b"{\"bucket\":\"b\"}".to_vec())),
			Err(Error::Malformed(_))
		));
		let wire = json!({"type": "put", "bucket": "b", "key": "k", "value": "not md json"});
		assert!(matches!(
			QueueEntry::parse(&record(serde_json::to_vec(&wire).unwrap())),
			Err(Error::Malformed(_))
		));
	}
}
