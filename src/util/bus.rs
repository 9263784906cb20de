//! Interface to the durable log bus, and an in-process backend.
//!
//! Ordering, at-least-once delivery, offset management and group
//! membership are provided by the implementation behind these traits;
//! Ferry only polls, publishes and commits. The in-process `MemoryBus`
//! backend backs the test suite and the daemon's development mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::Error;

/// One record read from or written to the replication log bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
	pub topic: String,
	pub partition: i32,
	pub offset: i64,
	pub key: Option<String>,
	pub value: Vec<u8>,
}

impl LogRecord {
	/// Build a record for publication; partition and offset are
	/// assigned by the bus when the record is appended.
	pub fn new(topic: impl Into<String>, key: Option<String>, value: Vec<u8>) -> Self {
		Self {
			topic: topic.into(),
			partition: 0,
			offset: 0,
			key,
			value,
		}
	}
}

/// Consumer side of the log bus: one ordered partition stream
#[async_trait]
pub trait RecordConsumer: Send + Sync {
	/// Wait for and return the next record in log order.
	/// `Ok(None)` means the stream has ended.
	async fn poll(&self) -> Result<Option<LogRecord>, Error>;

	/// Mark this record's offset as processed
	async fn commit(&self, record: &LogRecord) -> Result<(), Error>;
}

/// Producer side of the log bus
#[async_trait]
pub trait RecordProducer: Send + Sync {
	async fn send(&self, record: LogRecord) -> Result<(), Error>;
}

// ---- In-process backend ----

struct TopicState {
	records: Vec<LogRecord>,
	committed: i64,
}

impl TopicState {
	fn new() -> Self {
		Self {
			records: vec![],
			committed: -1,
		}
	}
}

struct BusInner {
	topics: Mutex<HashMap<String, TopicState>>,
	notify: Notify,
}

/// In-process log bus: per-topic ordered records with monotonically
/// assigned offsets and committed-offset tracking
pub struct MemoryBus {
	inner: Arc<BusInner>,
}

impl MemoryBus {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(BusInner {
				topics: Mutex::new(HashMap::new()),
				notify: Notify::new(),
			}),
		}
	}

	pub fn producer(&self) -> MemoryProducer {
		MemoryProducer {
			inner: self.inner.clone(),
		}
	}

	pub fn consumer(&self, topic: &str) -> MemoryConsumer {
		MemoryConsumer {
			inner: self.inner.clone(),
			topic: topic.to_string(),
			cursor: AtomicUsize::new(0),
		}
	}

	/// All records appended to a topic so far
	pub fn records(&self, topic: &str) -> Vec<LogRecord> {
		let topics = self.inner.topics.lock().unwrap();
		topics
			.get(topic)
			.map(|s| s.records.clone())
			.unwrap_or_default()
	}

	/// Highest committed offset of a topic, if any record was committed
	pub fn committed_offset(&self, topic: &str) -> Option<i64> {
		let topics = self.inner.topics.lock().unwrap();
		topics
			.get(topic)
			.and_then(|s| (s.committed >= 0).then(|| s.committed))
	}
}

impl Default for MemoryBus {
	fn default() -> Self {
		Self::new()
	}
}

pub struct MemoryProducer {
	inner: Arc<BusInner>,
}

#[async_trait]
impl RecordProducer for MemoryProducer {
	async fn send(&self, mut record: LogRecord) -> Result<(), Error> {
		{
			let mut topics = self.inner.topics.lock().unwrap();
			let state = topics
				.entry(record.topic.clone())
				.or_insert_with(TopicState::new);
			record.partition = 0;
			record.offset = state.records.len() as i64;
			state.records.push(record);
		}
		self.inner.notify.notify_waiters();
		Ok(())
	}
}

pub struct MemoryConsumer {
	inner: Arc<BusInner>,
	topic: String,
	cursor: AtomicUsize,
}

#[async_trait]
impl RecordConsumer for MemoryConsumer {
	async fn poll(&self) -> Result<Option<LogRecord>, Error> {
		loop {
			// Register for wakeup before checking, so that a record
			// appended in between is not missed
			let notified = self.inner.notify.notified();
			{
				let topics = self.inner.topics.lock().unwrap();
				if let Some(state) = topics.get(&self.topic) {
					let cursor = self.cursor.load(Ordering::SeqCst);
					if cursor < state.records.len() {
						self.cursor.store(cursor + 1, Ordering::SeqCst);
						return Ok(Some(state.records[cursor].clone()));
					}
				}
			}
			notified.await;
		}
	}

	async fn commit(&self, record: &LogRecord) -> Result<(), Error> {
		let mut topics = self.inner.topics.lock().unwrap();
		let state = topics
			.entry(self.topic.clone())
			.or_insert_with(TopicState::new);
		if record.offset > state.committed {
			state.committed = record.offset;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_produce_consume_commit() {
		let bus = MemoryBus::new();
		let producer = bus.producer();
		let consumer = bus.consumer("entries");

		for i in 0..3u8 {
			producer
				.send(LogRecord::new("entries", Some(format!("k{}", i)), vec![i]))
				.await
				.unwrap();
		}

		let r0 = consumer.poll().await.unwrap().unwrap();
		let r1 = consumer.poll().await.unwrap().unwrap();
		assert_eq!(r0.offset, 0);
		assert_eq!(r1.offset, 1);
		assert_eq!(r1.value, vec![1]);

		assert_eq!(bus.committed_offset("entries"), None);
		consumer.commit(&r1).await.unwrap();
		assert_eq!(bus.committed_offset("entries"), Some(1));
		// Committing an older record does not move the offset back
		consumer.commit(&r0).await.unwrap();
		assert_eq!(bus.committed_offset("entries"), Some(1));
	}

	#[tokio::test]
	async fn test_poll_wakes_up_on_send() {
		let bus = MemoryBus::new();
		let producer = bus.producer();
		let consumer = bus.consumer("entries");

		let handle = tokio::spawn(async move { consumer.poll().await });
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		producer
			.send(LogRecord::new("entries", None, b"hello".to_vec()))
			.await
			.unwrap();

		let polled = handle.await.unwrap().unwrap().unwrap();
		assert_eq!(polled.value, b"hello".to_vec());
	}
}
