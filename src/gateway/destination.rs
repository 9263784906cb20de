//! Gateway to the cross-backend put surface of the destination

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::{Body, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ferry_util::config::DestinationConfig;
use ferry_util::error::{Error, Origin};

use crate::client::*;
use crate::hosts::HostPicker;

/// Header carrying the backend storage type (e.g. "aws_s3")
pub const STORAGE_TYPE_HEADER: &str = "x-ferry-storage-type";
/// Header carrying the storage class, i.e. the replication site
pub const STORAGE_CLASS_HEADER: &str = "x-ferry-storage-class";
/// Header carrying the source version id of the replicated object
pub const VERSION_ID_HEADER: &str = "x-ferry-version-id";
/// Header carrying the logical object size of a write
pub const OBJECT_SIZE_HEADER: &str = "x-ferry-object-size";
/// Prefix under which user metadata entries are forwarded
pub const USER_MD_HEADER_PREFIX: &str = "x-ferry-meta-";

/// Attributes forwarded with an object write
#[derive(Debug, Clone, Default)]
pub struct PutObjectArgs {
	pub bucket: String,
	pub key: String,
	/// Version id of the object at the source
	pub version_id: Option<String>,
	/// Size of this write (the whole object for single puts and
	/// metadata-only puts, one part for ranged puts)
	pub content_length: u64,
	pub content_type: Option<String>,
	pub user_metadata: BTreeMap<String, String>,
	pub tags: BTreeMap<String, String>,
}

/// Result of a destination write
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PutOutcome {
	#[serde(rename = "versionId", default)]
	pub version_id: Option<String>,
}

/// One uploaded part, as sent back with complete-MPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
	#[serde(rename = "PartNumber")]
	pub part_number: u64,
	#[serde(rename = "ETag")]
	pub etag: String,
	/// Azure family only: number of blocks the destination wrote for
	/// this part
	#[serde(
		rename = "NumberSubParts",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub number_sub_parts: Option<u64>,
}

/// Write surface of the destination, as seen by the task
#[async_trait]
pub trait DestinationClient: Send + Sync {
	async fn put_object(
		&self,
		args: &PutObjectArgs,
		body: Option<Body>,
	) -> Result<PutOutcome, Error>;

	async fn initiate_mpu(&self, args: &PutObjectArgs) -> Result<String, Error>;

	async fn put_mpu_part(
		&self,
		args: &PutObjectArgs,
		upload_id: &str,
		part_number: u64,
		size: u64,
		body: Body,
	) -> Result<CompletedPart, Error>;

	async fn complete_mpu(
		&self,
		args: &PutObjectArgs,
		upload_id: &str,
		parts: &[CompletedPart],
	) -> Result<PutOutcome, Error>;

	async fn abort_mpu(&self, args: &PutObjectArgs, upload_id: &str) -> Result<(), Error>;

	async fn delete_object(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
	) -> Result<PutOutcome, Error>;

	async fn put_object_tagging(
		&self,
		bucket: &str,
		key: &str,
		tags: &BTreeMap<String, String>,
		data_store_version_id: Option<&str>,
	) -> Result<PutOutcome, Error>;

	async fn delete_object_tagging(
		&self,
		bucket: &str,
		key: &str,
		data_store_version_id: Option<&str>,
	) -> Result<PutOutcome, Error>;
}

/// Destination endpoint set: builds a client bound to the current
/// host; the retry runner advances the cursor on target-side failures
/// so that the next attempt re-binds.
pub trait DestinationEndpoints: Send + Sync {
	fn bind(&self) -> Arc<dyn DestinationClient>;
	fn advance(&self);
}

// ---- HTTP implementation ----

/// HTTP client to the cross-backend surface of one destination host
pub struct HttpDestination {
	client: SignedClient,
	storage_type: String,
	site: String,
}

impl HttpDestination {
	pub fn new(client: SignedClient, storage_type: String, site: String) -> Self {
		Self {
			client,
			storage_type,
			site,
		}
	}

	fn base_headers(&self) -> Vec<(&'static str, String)> {
		vec![
			(STORAGE_TYPE_HEADER, self.storage_type.clone()),
			(STORAGE_CLASS_HEADER, self.site.clone()),
		]
	}

	fn put_headers(&self, args: &PutObjectArgs) -> Vec<(&'static str, String)> {
		let mut headers = self.base_headers();
		headers.push((OBJECT_SIZE_HEADER, args.content_length.to_string()));
		if let Some(version_id) = &args.version_id {
			headers.push((VERSION_ID_HEADER, version_id.clone()));
		}
		if let Some(content_type) = &args.content_type {
			headers.push(("content-type", content_type.clone()));
		}
		headers
	}

	fn data_path(bucket: &str, key: &str, query: &[(&str, Option<&str>)]) -> String {
		format!(
			"/_/cross-backend/data/{}/{}{}",
			encode_component(bucket),
			encode_component(key),
			query_string(query)
		)
	}

	fn mpu_path(bucket: &str, key: &str, query: &[(&str, Option<&str>)]) -> String {
		format!(
			"/_/cross-backend/mpu/{}/{}{}",
			encode_component(bucket),
			encode_component(key),
			query_string(query)
		)
	}

	fn tagging_path(bucket: &str, key: &str, query: &[(&str, Option<&str>)]) -> String {
		format!(
			"/_/cross-backend/tagging/{}/{}{}",
			encode_component(bucket),
			encode_component(key),
			query_string(query)
		)
	}

	async fn expect_json<T: DeserializeOwned>(&self, resp: Response<Body>) -> Result<T, Error> {
		if !resp.status().is_success() {
			return Err(error_from_response(Origin::Target, resp).await);
		}
		let body = hyper::body::to_bytes(resp.into_body())
			.await
			.map_err(|e| Error::transient(Origin::Target, e))?;
		serde_json::from_slice(&body)
			.map_err(|e| Error::PermanentTarget(format!("invalid response body: {}", e)))
	}

	/// Like expect_json, but tolerates an empty success body
	async fn expect_outcome(&self, resp: Response<Body>) -> Result<PutOutcome, Error> {
		if !resp.status().is_success() {
			return Err(error_from_response(Origin::Target, resp).await);
		}
		let body = hyper::body::to_bytes(resp.into_body())
			.await
			.map_err(|e| Error::transient(Origin::Target, e))?;
		if body.is_empty() {
			return Ok(PutOutcome::default());
		}
		serde_json::from_slice(&body)
			.map_err(|e| Error::PermanentTarget(format!("invalid response body: {}", e)))
	}
}

#[async_trait]
impl DestinationClient for HttpDestination {
	async fn put_object(
		&self,
		args: &PutObjectArgs,
		body: Option<Body>,
	) -> Result<PutOutcome, Error> {
		let path = Self::data_path(&args.bucket, &args.key, &[]);
		let mut owned_headers = self
			.put_headers(args)
			.into_iter()
			.map(|(n, v)| (n.to_string(), v))
			.collect::<Vec<_>>();
		for (name, value) in args.user_metadata.iter() {
			owned_headers.push((format!("{}{}", USER_MD_HEADER_PREFIX, name), value.clone()));
		}
		let headers = owned_headers
			.iter()
			.map(|(n, v)| (n.as_str(), v.clone()))
			.collect::<Vec<(&str, String)>>();
		let body = match body {
			Some(body) => ClientBody::Stream(body),
			None => ClientBody::None,
		};
		let resp = self
			.client
			.request(Method::PUT, &path, &headers, body)
			.await?;
		self.expect_outcome(resp).await
	}

	async fn initiate_mpu(&self, args: &PutObjectArgs) -> Result<String, Error> {
		#[derive(Deserialize)]
		struct InitiateResponse {
			#[serde(rename = "uploadId")]
			upload_id: String,
		}
		let path = Self::mpu_path(&args.bucket, &args.key, &[("uploads", Some(""))]);
		let resp = self
			.client
			.request(Method::POST, &path, &self.put_headers(args), ClientBody::None)
			.await?;
		let init: InitiateResponse = self.expect_json(resp).await?;
		Ok(init.upload_id)
	}

	async fn put_mpu_part(
		&self,
		args: &PutObjectArgs,
		upload_id: &str,
		part_number: u64,
		size: u64,
		body: Body,
	) -> Result<CompletedPart, Error> {
		#[derive(Deserialize)]
		struct PartResponse {
			#[serde(rename = "ETag")]
			etag: String,
			#[serde(rename = "NumberSubParts", default)]
			number_sub_parts: Option<u64>,
		}
		let part_number_str = part_number.to_string();
		let path = Self::mpu_path(
			&args.bucket,
			&args.key,
			&[
				("partNumber", Some(part_number_str.as_str())),
				("uploadId", Some(upload_id)),
			],
		);
		let mut headers = self.base_headers();
		headers.push(("content-length", size.to_string()));
		let resp = self
			.client
			.request(Method::PUT, &path, &headers, ClientBody::Stream(body))
			.await?;
		let part: PartResponse = self.expect_json(resp).await?;
		Ok(CompletedPart {
			part_number,
			etag: part.etag,
			number_sub_parts: part.number_sub_parts,
		})
	}

	async fn complete_mpu(
		&self,
		args: &PutObjectArgs,
		upload_id: &str,
		parts: &[CompletedPart],
	) -> Result<PutOutcome, Error> {
		let path = Self::mpu_path(&args.bucket, &args.key, &[("uploadId", Some(upload_id))]);
		let body = serde_json::to_vec(parts)?;
		let resp = self
			.client
			.request(
				Method::POST,
				&path,
				&self.put_headers(args),
				ClientBody::Buf(body),
			)
			.await?;
		self.expect_outcome(resp).await
	}

	async fn abort_mpu(&self, args: &PutObjectArgs, upload_id: &str) -> Result<(), Error> {
		let path = Self::mpu_path(&args.bucket, &args.key, &[("uploadId", Some(upload_id))]);
		let resp = self
			.client
			.request(
				Method::DELETE,
				&path,
				&self.base_headers(),
				ClientBody::None,
			)
			.await?;
		if !resp.status().is_success() {
			return Err(error_from_response(Origin::Target, resp).await);
		}
		Ok(())
	}

	async fn delete_object(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
	) -> Result<PutOutcome, Error> {
		let path = Self::data_path(bucket, key, &[("versionId", version_id)]);
		let resp = self
			.client
			.request(
				Method::DELETE,
				&path,
				&self.base_headers(),
				ClientBody::None,
			)
			.await?;
		self.expect_outcome(resp).await
	}

	async fn put_object_tagging(
		&self,
		bucket: &str,
		key: &str,
		tags: &BTreeMap<String, String>,
		data_store_version_id: Option<&str>,
	) -> Result<PutOutcome, Error> {
		let path = Self::tagging_path(bucket, key, &[("versionId", data_store_version_id)]);
		let body = serde_json::to_vec(&serde_json::json!({ "tags": tags }))?;
		let resp = self
			.client
			.request(
				Method::PUT,
				&path,
				&self.base_headers(),
				ClientBody::Buf(body),
			)
			.await?;
		self.expect_outcome(resp).await
	}

	async fn delete_object_tagging(
		&self,
		bucket: &str,
		key: &str,
		data_store_version_id: Option<&str>,
	) -> Result<PutOutcome, Error> {
		let path = Self::tagging_path(bucket, key, &[("versionId", data_store_version_id)]);
		let resp = self
			.client
			.request(
				Method::DELETE,
				&path,
				&self.base_headers(),
				ClientBody::None,
			)
			.await?;
		self.expect_outcome(resp).await
	}
}

/// Pool of destination hosts implementing host failover
pub struct DestinationPool {
	picker: HostPicker,
	creds: GatewayCreds,
	storage_type: String,
	site: String,
	timeout: Duration,
}

impl DestinationPool {
	pub fn new(config: &DestinationConfig, site: &str) -> Result<Self, Error> {
		Ok(Self {
			picker: HostPicker::new(config.hosts.clone())?,
			creds: GatewayCreds {
				region: config.region.clone(),
				access_key_id: config.access_key_id.clone(),
				secret_access_key: config.secret_access_key.clone(),
			},
			storage_type: config.storage_type.clone(),
			site: site.to_string(),
			timeout: Duration::from_millis(config.request_timeout_ms),
		})
	}

	fn endpoint(&self) -> String {
		let host = self.picker.current();
		if host.contains("://") {
			host.to_string()
		} else {
			format!("http://{}", host)
		}
	}
}

impl DestinationEndpoints for DestinationPool {
	fn bind(&self) -> Arc<dyn DestinationClient> {
		Arc::new(HttpDestination::new(
			SignedClient::new(
				&self.endpoint(),
				self.creds.clone(),
				Origin::Target,
				self.timeout,
			),
			self.storage_type.clone(),
			self.site.clone(),
		))
	}

	fn advance(&self) {
		let next = self.picker.advance();
		info!("Destination failover: next attempt will use host {}", next);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_completed_part_wire_format() {
		let parts = vec![
			CompletedPart {
				part_number: 1,
				etag: "etag1".into(),
				number_sub_parts: None,
			},
			CompletedPart {
				part_number: 2,
				etag: "etag2".into(),
				number_sub_parts: Some(3),
			},
		];
		assert_eq!(
			serde_json::to_string(&parts).unwrap(),
			r#"[{"PartNumber":1,"ETag":"etag1"},{"PartNumber":2,"ETag":"etag2","NumberSubParts":3}]"#
		);
	}

	#[test]
	fn test_paths() {
		assert_eq!(
			HttpDestination::mpu_path("b", "a key", &[("uploadId", Some("u1"))]),
			"/_/cross-backend/mpu/b/a%20key?uploadId=u1"
		);
		assert_eq!(
			HttpDestination::data_path("b", "k", &[("versionId", None)]),
			"/_/cross-backend/data/b/k"
		);
	}
}
