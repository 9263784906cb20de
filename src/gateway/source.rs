//! Gateway to the source object service

use std::time::Duration;

use async_trait::async_trait;
use hyper::{Method, StatusCode};

use ferry_model::object::{ByteRange, ObjectMd};
use ferry_model::policy::ReplicationPolicy;
use ferry_util::config::SourceConfig;
use ferry_util::error::{Error, Origin};

use crate::client::*;
use crate::stream::*;

/// Read surface of the source object service, as seen by the task
#[async_trait]
pub trait SourceClient: Send + Sync {
	/// Fetch the replication policy of a bucket
	async fn bucket_replication_policy(&self, bucket: &str) -> Result<ReplicationPolicy, Error>;

	/// Fetch the current metadata of an object version
	async fn object_metadata(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
	) -> Result<ObjectMd, Error>;

	/// Open a (possibly ranged) byte stream over an object version
	async fn object_stream(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
		range: Option<ByteRange>,
		part_number: Option<u64>,
	) -> Result<ByteStream, Error>;
}

/// HTTP implementation of the source gateway
pub struct SourceGateway {
	client: SignedClient,
}

impl SourceGateway {
	pub fn new(config: &SourceConfig) -> Self {
		let creds = GatewayCreds {
			region: config.region.clone(),
			access_key_id: config.access_key_id.clone(),
			secret_access_key: config.secret_access_key.clone(),
		};
		Self {
			client: SignedClient::new(
				&config.endpoint,
				creds,
				Origin::Source,
				Duration::from_millis(config.request_timeout_ms),
			),
		}
	}
}

#[async_trait]
impl SourceClient for SourceGateway {
	async fn bucket_replication_policy(&self, bucket: &str) -> Result<ReplicationPolicy, Error> {
		let path = format!("/_/policy/{}/replication", encode_component(bucket));
		let resp = self
			.client
			.request(Method::GET, &path, &[], ClientBody::None)
			.await?;
		if !resp.status().is_success() {
			return Err(error_from_response(Origin::Source, resp).await);
		}
		let body = hyper::body::to_bytes(resp.into_body())
			.await
			.map_err(|e| Error::transient(Origin::Source, e))?;
		serde_json::from_slice(&body)
			.map_err(|e| Error::Message(format!("Invalid replication policy body: {}", e)))
	}

	async fn object_metadata(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
	) -> Result<ObjectMd, Error> {
		let path = format!(
			"/_/metadata/{}/{}{}",
			encode_component(bucket),
			encode_component(key),
			query_string(&[("versionId", version_id)])
		);
		let resp = self
			.client
			.request(Method::GET, &path, &[], ClientBody::None)
			.await?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Err(Error::ObjNotFound {
				bucket: bucket.to_string(),
				key: key.to_string(),
			});
		}
		if !resp.status().is_success() {
			return Err(error_from_response(Origin::Source, resp).await);
		}
		let body = hyper::body::to_bytes(resp.into_body())
			.await
			.map_err(|e| Error::transient(Origin::Source, e))?;
		serde_json::from_slice(&body)
			.map_err(|e| Error::Message(format!("Invalid object metadata body: {}", e)))
	}

	async fn object_stream(
		&self,
		bucket: &str,
		key: &str,
		version_id: Option<&str>,
		range: Option<ByteRange>,
		part_number: Option<u64>,
	) -> Result<ByteStream, Error> {
		let part_number = part_number.map(|n| n.to_string());
		let path = format!(
			"/{}/{}{}",
			encode_component(bucket),
			encode_component(key),
			query_string(&[
				("versionId", version_id),
				("partNumber", part_number.as_deref()),
			])
		);
		let mut headers = vec![];
		if let Some(range) = &range {
			headers.push(("range", format!("bytes={}-{}", range.start, range.end)));
		}
		let resp = self
			.client
			.request(Method::GET, &path, &headers, ClientBody::None)
			.await?;
		match resp.status() {
			StatusCode::NOT_FOUND => Err(Error::ObjNotFound {
				bucket: bucket.to_string(),
				key: key.to_string(),
			}),
			s if s.is_success() => Ok(BodyStream::boxed(resp.into_body(), Origin::Source)),
			_ => Err(error_from_response(Origin::Source, resp).await),
		}
	}
}
