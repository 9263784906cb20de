//! Process-local metrics of the replication task engine

use opentelemetry::global;
use opentelemetry::metrics::{Counter, UpDownCounter};
use opentelemetry::KeyValue;

use crate::task::{TaskOutcome, TaskResult};

/// Counters exposed by the task engine; per-object metric events are
/// published on the bus by the status publisher, independently.
pub struct TaskMetrics {
	pub(crate) entries_completed: Counter<u64>,
	pub(crate) entries_skipped: Counter<u64>,
	pub(crate) entries_failed: Counter<u64>,
	pub(crate) parts_replicated: Counter<u64>,
	pub(crate) bytes_replicated: Counter<u64>,
	pub(crate) entries_in_flight: UpDownCounter<i64>,
	attributes: Vec<KeyValue>,
}

impl TaskMetrics {
	pub fn new(site: &str) -> Self {
		let meter = global::meter("ferry_task");
		Self {
			entries_completed: meter
				.u64_counter("replication.entries_completed")
				.with_description("Number of log entries replicated successfully")
				.init(),
			entries_skipped: meter
				.u64_counter("replication.entries_skipped")
				.with_description("Number of log entries skipped without publication")
				.init(),
			entries_failed: meter
				.u64_counter("replication.entries_failed")
				.with_description("Number of log entries that failed terminally")
				.init(),
			parts_replicated: meter
				.u64_counter("replication.parts_replicated")
				.with_description("Number of object parts written to the destination")
				.init(),
			bytes_replicated: meter
				.u64_counter("replication.bytes_replicated")
				.with_description("Number of object bytes written to the destination")
				.init(),
			entries_in_flight: meter
				.i64_up_down_counter("replication.entries_in_flight")
				.with_description("Number of entries currently being replicated")
				.init(),
			attributes: vec![KeyValue::new("site", site.to_string())],
		}
	}

	pub(crate) fn task_started(&self) {
		self.entries_in_flight.add(1, &self.attributes);
	}

	pub(crate) fn task_settled(&self, result: &TaskResult) {
		self.entries_in_flight.add(-1, &self.attributes);
		match &result.outcome {
			TaskOutcome::Completed { .. } => self.entries_completed.add(1, &self.attributes),
			TaskOutcome::Skipped(_) => self.entries_skipped.add(1, &self.attributes),
			TaskOutcome::Failed(_) => self.entries_failed.add(1, &self.attributes),
		}
	}

	pub(crate) fn part_replicated(&self, bytes: u64) {
		self.parts_replicated.add(1, &self.attributes);
		self.bytes_replicated.add(bytes, &self.attributes);
	}
}
