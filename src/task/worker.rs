//! Queue worker binding a log bus consumer to the replication task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use ferry_model::entry::QueueEntry;
use ferry_util::bus::{LogRecord, RecordConsumer};

use crate::task::{ReplicationTask, TaskOutcome};

/// Consumes log records and drives them through the replication task
/// with a bounded number of in-flight entries. An entry's offset is
/// committed only once its outcome publication was enqueued.
pub struct QueueWorker {
	consumer: Arc<dyn RecordConsumer>,
	task: Arc<ReplicationTask>,
	concurrency: usize,
}

impl QueueWorker {
	pub fn new(
		consumer: Arc<dyn RecordConsumer>,
		task: Arc<ReplicationTask>,
		concurrency: usize,
	) -> Self {
		Self {
			consumer,
			task,
			concurrency,
		}
	}

	/// Run until shutdown, draining in-flight entries before returning
	pub async fn run(self: Arc<Self>, mut must_exit: watch::Receiver<bool>) {
		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		while !*must_exit.borrow() {
			let record = tokio::select! {
				polled = self.consumer.poll() => match polled {
					Ok(Some(record)) => record,
					Ok(None) => {
						info!("Log bus stream ended");
						break;
					}
					Err(e) => {
						error!("Could not poll the log bus: {}", e);
						tokio::time::sleep(Duration::from_secs(1)).await;
						continue;
					}
				},
				changed = must_exit.changed() => {
					if changed.is_err() {
						break;
					}
					continue;
				}
			};

			let permit = tokio::select! {
				permit = semaphore.clone().acquire_owned() => match permit {
					Ok(permit) => permit,
					Err(_) => break,
				},
				changed = must_exit.changed() => {
					if changed.is_err() {
						break;
					}
					continue;
				}
			};

			let this = self.clone();
			tokio::spawn(async move {
				this.process_record(record).await;
				drop(permit);
			});
		}

		// Wait for in-flight entries to settle
		let _ = semaphore.acquire_many(self.concurrency as u32).await;
		info!("Queue worker stopped");
	}

	async fn process_record(&self, record: LogRecord) {
		let entry = match QueueEntry::parse(&record) {
			Ok(entry) => entry,
			Err(e) => {
				warn!(
					"Dropping malformed record {}[{}]@{}: {}",
					record.topic, record.partition, record.offset, e
				);
				self.commit(&record).await;
				return;
			}
		};
		match entry {
			QueueEntry::Object(object) => {
				let result = self.task.process(object).await;
				if let TaskOutcome::Failed(reason) = &result.outcome {
					debug!(
						"Entry at offset {} settled as FAILED: {}",
						record.offset, reason
					);
				}
				if result.committable {
					self.commit(&record).await;
				}
			}
			QueueEntry::Delete(_)
			| QueueEntry::Bucket(_)
			| QueueEntry::BucketMd(_)
			| QueueEntry::Action(_) => {
				// Not core work: these entries feed the collaborator
				// processors consuming the same log
				trace!("Skipping non-object entry at offset {}", record.offset);
				self.commit(&record).await;
			}
		}
	}

	async fn commit(&self, record: &LogRecord) {
		if let Err(e) = self.consumer.commit(record).await {
			warn!(
				"Could not commit offset {} on {}: {}",
				record.offset, record.topic, e
			);
		}
	}
}
