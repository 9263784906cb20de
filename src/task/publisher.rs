//! Publication of replication outcomes and metric events on the log bus

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ferry_model::entry::QueueEntry;
use ferry_model::object::ObjectEntry;
use ferry_util::bus::{LogRecord, RecordProducer};
use ferry_util::error::Error;
use ferry_util::time::now_msec;

/// Kind of a metric event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
	Queued,
	Completed,
	Failed,
}

/// Pipeline a metric event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricExtension {
	Crr,
	Ingestion,
}

/// One metric event, published on the metrics topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
	pub timestamp: u64,
	pub ops: u64,
	pub bytes: u64,
	pub extension: MetricExtension,
	#[serde(rename = "type")]
	pub kind: MetricKind,
	pub site: String,
	#[serde(rename = "bucketName", default, skip_serializing_if = "Option::is_none")]
	pub bucket_name: Option<String>,
	#[serde(rename = "objectKey", default, skip_serializing_if = "Option::is_none")]
	pub object_key: Option<String>,
	#[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
	pub version_id: Option<String>,
}

/// Publishes per-site replication status and metric events.
///
/// Status publication is load-bearing (its result decides whether the
/// entry's offset may be committed); metric events are best-effort.
pub struct StatusPublisher {
	producer: Arc<dyn RecordProducer>,
	status_topic: String,
	metrics_topic: String,
	site: String,
}

impl StatusPublisher {
	pub fn new(
		producer: Arc<dyn RecordProducer>,
		status_topic: String,
		metrics_topic: String,
		site: String,
	) -> Self {
		Self {
			producer,
			status_topic,
			metrics_topic,
			site,
		}
	}

	/// Publish the updated entry metadata carrying the new site status
	pub async fn publish_status(&self, entry: &ObjectEntry) -> Result<(), Error> {
		let value = QueueEntry::Object(entry.clone()).serialize()?;
		let key = format!("{}/{}", entry.bucket(), entry.versioned_key());
		self.producer
			.send(LogRecord::new(self.status_topic.clone(), Some(key), value))
			.await
	}

	async fn publish_metric(
		&self,
		kind: MetricKind,
		ops: u64,
		bytes: u64,
		entry: &ObjectEntry,
	) {
		let event = MetricEvent {
			timestamp: now_msec(),
			ops,
			bytes,
			extension: MetricExtension::Crr,
			kind,
			site: self.site.clone(),
			bucket_name: Some(entry.bucket().to_string()),
			object_key: Some(entry.key().to_string()),
			version_id: entry.version_id().map(str::to_string),
		};
		let value = match serde_json::to_vec(&event) {
			Ok(value) => value,
			Err(e) => {
				warn!("Could not serialize metric event: {}", e);
				return;
			}
		};
		if let Err(e) = self
			.producer
			.send(LogRecord::new(self.metrics_topic.clone(), None, value))
			.await
		{
			debug!("Could not publish metric event: {}", e);
		}
	}

	/// A transfer was admitted: one op, the whole object size
	pub async fn metric_queued(&self, entry: &ObjectEntry) {
		self.publish_metric(MetricKind::Queued, 1, entry.content_length(), entry)
			.await;
	}

	/// One part (or single put) finished
	pub async fn metric_part_completed(&self, entry: &ObjectEntry, bytes: u64) {
		self.publish_metric(MetricKind::Completed, 0, bytes, entry)
			.await;
	}

	/// The whole object settled successfully
	pub async fn metric_object_completed(&self, entry: &ObjectEntry) {
		self.publish_metric(MetricKind::Completed, 1, 0, entry).await;
	}

	/// The entry failed terminally
	pub async fn metric_failed(&self, entry: &ObjectEntry) {
		self.publish_metric(MetricKind::Failed, 1, entry.content_length(), entry)
			.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ferry_model::object::ObjectMd;
	use ferry_util::bus::MemoryBus;

	fn entry() -> ObjectEntry {
		let mut md = ObjectMd::default();
		md.version_id = Some("v1".to_string());
		md.content_length = 2048;
		ObjectEntry::new("photos".into(), "cat.jpg".into(), md)
	}

	#[tokio::test]
	async fn test_metric_event_wire_format() {
		let bus = MemoryBus::new();
		let publisher = StatusPublisher::new(
			Arc::new(bus.producer()),
			"status".into(),
			"metrics".into(),
			"aws-east-1".into(),
		);
		publisher.metric_queued(&entry()).await;

		let records = bus.records("metrics");
		assert_eq!(records.len(), 1);
		let event: serde_json::Value = serde_json::from_slice(&records[0].value).unwrap();
		assert_eq!(event["type"], "queued");
		assert_eq!(event["extension"], "crr");
		assert_eq!(event["ops"], 1);
		assert_eq!(event["bytes"], 2048);
		assert_eq!(event["site"], "aws-east-1");
		assert_eq!(event["bucketName"], "photos");
		assert_eq!(event["objectKey"], "cat.jpg");
		assert_eq!(event["versionId"], "v1");
		assert!(event["timestamp"].as_u64().unwrap() > 0);
	}

	#[tokio::test]
	async fn test_status_record_round_trips() {
		let bus = MemoryBus::new();
		let publisher = StatusPublisher::new(
			Arc::new(bus.producer()),
			"status".into(),
			"metrics".into(),
			"aws-east-1".into(),
		);
		let mut entry = entry();
		entry.set_site_status(
			"aws-east-1",
			ferry_model::replication::ReplicationStatus::Completed,
		);
		publisher.publish_status(&entry).await.unwrap();

		let records = bus.records("status");
		assert_eq!(records.len(), 1);
		assert_eq!(
			records[0].key.as_deref(),
			Some(format!("photos/{}", entry.versioned_key()).as_str())
		);
		match QueueEntry::parse(&records[0]).unwrap() {
			QueueEntry::Object(reparsed) => {
				assert_eq!(
					reparsed.site_status("aws-east-1"),
					Some(ferry_model::replication::ReplicationStatus::Completed)
				);
			}
			_ => panic!("expected object entry"),
		}
	}
}
