//! Replication of one log entry to one destination site

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use hyper::Body;
use tokio::sync::watch;

use ferry_gateway::destination::{CompletedPart, DestinationEndpoints, PutObjectArgs, PutOutcome};
use ferry_gateway::source::SourceClient;
use ferry_model::object::{reduce_locations, ByteRange, ObjectEntry, ObjectMd, PartLocation};
use ferry_model::replication::{DestinationFamily, ReplicationContent, ReplicationStatus};
use ferry_util::error::{Error, Origin};
use ferry_util::retry::{retry_call, RetryPolicy};

use crate::metrics::TaskMetrics;
use crate::publisher::StatusPublisher;
use crate::range;
use crate::session::UploadSession;

/// Maximum parallel part transfers within one task
pub const MAX_PARALLEL_PARTS: usize = 10;

/// Why an entry was skipped without publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// No enabled replication rule matches the entry
	Precondition,
	/// The source object no longer exists
	ObjNotFound,
	/// The source state changed, or the site was already completed
	InvalidObjectState,
	/// The source denied the request outright
	SourceDenied,
	/// The worker is shutting down; the entry stays uncommitted
	Shutdown,
}

/// Terminal outcome of one replication task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
	Completed { version_id: Option<String> },
	Skipped(SkipReason),
	Failed(String),
}

/// Outcome plus the offset-commit decision for the harness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
	pub outcome: TaskOutcome,
	pub committable: bool,
}

/// Replicates single log entries end-to-end to one destination site
pub struct ReplicationTask {
	source: Arc<dyn SourceClient>,
	destination: Arc<dyn DestinationEndpoints>,
	publisher: Arc<StatusPublisher>,
	metrics: Arc<TaskMetrics>,
	site: String,
	family: DestinationFamily,
	retry: RetryPolicy,
	must_exit: watch::Receiver<bool>,
}

impl ReplicationTask {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		source: Arc<dyn SourceClient>,
		destination: Arc<dyn DestinationEndpoints>,
		publisher: Arc<StatusPublisher>,
		metrics: Arc<TaskMetrics>,
		site: String,
		family: DestinationFamily,
		retry: RetryPolicy,
		must_exit: watch::Receiver<bool>,
	) -> Self {
		Self {
			source,
			destination,
			publisher,
			metrics,
			site,
			family,
			retry,
			must_exit,
		}
	}

	/// Run one entry end-to-end and settle its outcome
	pub async fn process(&self, entry: ObjectEntry) -> TaskResult {
		self.metrics.task_started();
		let run_result = self.run(&entry).await;
		let result = self.settle(entry, run_result).await;
		self.metrics.task_settled(&result);
		result
	}

	async fn run(&self, entry: &ObjectEntry) -> Result<Option<String>, Error> {
		self.check_policy(entry).await?;
		let source_md = self.fetch_source_md(entry).await?;

		if entry.is_delete_marker() {
			return self.put_delete_marker(entry).await;
		}
		if entry.site_status(&self.site) == Some(ReplicationStatus::Completed)
			&& entry.content_has(ReplicationContent::Data)
		{
			return Err(Error::InvalidObjectState(format!(
				"site {} already completed",
				self.site
			)));
		}
		if entry.content_has(ReplicationContent::Mpu) {
			return self.replicate_multipart(entry, source_md.as_ref()).await;
		}
		if entry.content_has(ReplicationContent::PutTagging) {
			return self.put_tagging(entry).await;
		}
		if entry.content_has(ReplicationContent::DeleteTagging) {
			return self.delete_tagging(entry).await;
		}
		self.replicate_data(entry).await
	}

	async fn settle(
		&self,
		mut entry: ObjectEntry,
		run_result: Result<Option<String>, Error>,
	) -> TaskResult {
		let err = match run_result {
			Ok(version_id) => {
				entry.set_site_status(&self.site, ReplicationStatus::Completed);
				if let Some(version_id) = &version_id {
					entry.set_site_data_store_version_id(&self.site, version_id);
				}
				let committable = self.publish_status_outcome(&entry, "COMPLETED").await;
				return TaskResult {
					outcome: TaskOutcome::Completed { version_id },
					committable,
				};
			}
			Err(err) => err,
		};

		let skip = |reason| TaskResult {
			outcome: TaskOutcome::Skipped(reason),
			committable: true,
		};
		match err {
			Error::Shutdown => {
				info!(
					"Interrupted while replicating {}/{}, leaving the entry uncommitted",
					entry.bucket(),
					entry.key()
				);
				TaskResult {
					outcome: TaskOutcome::Skipped(SkipReason::Shutdown),
					committable: false,
				}
			}
			Error::PreconditionFailed(reason) => {
				info!(
					"Skipping {}/{}: {}",
					entry.bucket(),
					entry.key(),
					reason
				);
				skip(SkipReason::Precondition)
			}
			Error::ObjNotFound { .. } => {
				info!(
					"Skipping {}/{}: source object not found",
					entry.bucket(),
					entry.key()
				);
				skip(SkipReason::ObjNotFound)
			}
			Error::InvalidObjectState(reason) => {
				warn!(
					"Skipping {}/{}: invalid object state: {}",
					entry.bucket(),
					entry.key(),
					reason
				);
				skip(SkipReason::InvalidObjectState)
			}
			Error::PermanentSource(reason) => {
				warn!(
					"Skipping {}/{}: source rejected the request: {}",
					entry.bucket(),
					entry.key(),
					reason
				);
				skip(SkipReason::SourceDenied)
			}
			err => {
				error!(
					"Replication of {}/{} to site {} failed: {}",
					entry.bucket(),
					entry.key(),
					self.site,
					err
				);
				entry.set_site_status(&self.site, ReplicationStatus::Failed);
				let committable = self.publish_status_outcome(&entry, "FAILED").await;
				self.publisher.metric_failed(&entry).await;
				TaskResult {
					outcome: TaskOutcome::Failed(err.to_string()),
					committable,
				}
			}
		}
	}

	async fn publish_status_outcome(&self, entry: &ObjectEntry, what: &str) -> bool {
		match self.publisher.publish_status(entry).await {
			Ok(()) => true,
			Err(e) => {
				error!(
					"Could not publish {} status for {}/{}: {}",
					what,
					entry.bucket(),
					entry.key(),
					e
				);
				false
			}
		}
	}

	/// Retry wrapper advancing the destination host when the failed
	/// attempt was raised on the target side
	async fn retried_target<T, F, Fut>(&self, describe: &str, attempt: F) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let destination = self.destination.clone();
		retry_call(&self.retry, describe, attempt, move |err| {
			if err.origin() == Some(Origin::Target) {
				destination.advance();
			}
		})
		.await
	}

	// ---- S1: replication policy ----

	async fn check_policy(&self, entry: &ObjectEntry) -> Result<(), Error> {
		let policy = retry_call(
			&self.retry,
			"fetch bucket replication policy",
			|| self.source.bucket_replication_policy(entry.bucket()),
			|_| (),
		)
		.await?;
		match policy.rule_for(entry.key()) {
			Some(rule) if rule.enabled => Ok(()),
			Some(rule) => Err(Error::PreconditionFailed(format!(
				"replication rule {} is disabled",
				rule.id
			))),
			None => Err(Error::PreconditionFailed(format!(
				"no replication rule matches key {}",
				entry.key()
			))),
		}
	}

	// ---- S2: source metadata ----

	/// Fetch the current source metadata. `Ok(None)` means the source
	/// has no underlying object, which is only tolerated for delete
	/// markers (non-versioned objects have none).
	async fn fetch_source_md(&self, entry: &ObjectEntry) -> Result<Option<ObjectMd>, Error> {
		let fetched = retry_call(
			&self.retry,
			"fetch source metadata",
			|| {
				self.source
					.object_metadata(entry.bucket(), entry.key(), entry.version_id())
			},
			|_| (),
		)
		.await;
		match fetched {
			Ok(md) => Ok(Some(md)),
			Err(Error::ObjNotFound { .. }) if entry.is_delete_marker() => Ok(None),
			Err(Error::ObjNotFound { .. }) if entry.is_nfs() => Err(Error::InvalidObjectState(
				"source object disappeared from the filesystem bucket".to_string(),
			)),
			Err(e) => Err(e),
		}
	}

	/// Check that the source still holds the content described by the
	/// entry (filesystem-backed buckets may mutate under us)
	async fn recheck_source_state(&self, entry: &ObjectEntry) -> Result<(), Error> {
		let fetched = retry_call(
			&self.retry,
			"re-check source object state",
			|| {
				self.source
					.object_metadata(entry.bucket(), entry.key(), entry.version_id())
			},
			|_| (),
		)
		.await;
		match fetched {
			Ok(md) => self.check_source_unchanged(entry, Some(&md)),
			Err(Error::ObjNotFound { .. }) => self.check_source_unchanged(entry, None),
			Err(e) => Err(e),
		}
	}

	fn check_source_unchanged(
		&self,
		entry: &ObjectEntry,
		md: Option<&ObjectMd>,
	) -> Result<(), Error> {
		match md {
			Some(md) if md.content_md5 == entry.content_md5() => Ok(()),
			Some(_) => Err(Error::InvalidObjectState(
				"source content changed during replication".to_string(),
			)),
			None => Err(Error::InvalidObjectState(
				"source object disappeared during replication".to_string(),
			)),
		}
	}

	fn put_args(&self, entry: &ObjectEntry, content_length: u64) -> PutObjectArgs {
		PutObjectArgs {
			bucket: entry.bucket().to_string(),
			key: entry.key().to_string(),
			version_id: entry.version_id().map(str::to_string),
			content_length,
			content_type: entry.content_type().map(str::to_string),
			user_metadata: entry.user_metadata().clone(),
			tags: entry.tags().clone(),
		}
	}

	// ---- S5: multipart replication ----

	async fn replicate_multipart(
		&self,
		entry: &ObjectEntry,
		source_md: Option<&ObjectMd>,
	) -> Result<Option<String>, Error> {
		if entry.is_nfs() {
			self.check_source_unchanged(entry, source_md)?;
		}
		self.publisher.metric_queued(entry).await;

		let args = self.put_args(entry, entry.content_length());
		let mut session = match self.family {
			DestinationFamily::Azure => UploadSession::local(self.family),
			_ => {
				let upload_id = self
					.retried_target("initiate multipart upload", || async {
						self.destination.bind().initiate_mpu(&args).await
					})
					.await?;
				UploadSession::new(upload_id, self.family)
			}
		};
		debug!(
			"Replicating {}/{} with multipart upload {}",
			entry.bucket(),
			entry.key(),
			session.upload_id()
		);

		let upload_id = session.upload_id().to_string();
		let ranges = range::plan(entry.content_length(), self.family);
		let uploaded: Result<Vec<CompletedPart>, Error> = stream::iter(
			ranges
				.into_iter()
				.enumerate()
				.map(|(i, r)| self.replicate_part(entry, &upload_id, (i as u64) + 1, r)),
		)
		.buffer_unordered(MAX_PARALLEL_PARTS)
		.try_collect()
		.await;

		let parts = match uploaded {
			Ok(parts) => parts,
			Err(e) => {
				self.abort_upload(entry, &upload_id).await;
				return Err(e);
			}
		};
		session.record_parts(parts);

		let out = self
			.retried_target("complete multipart upload", || async {
				self.destination
					.bind()
					.complete_mpu(&args, &upload_id, session.parts())
					.await
			})
			.await?;
		self.publisher.metric_object_completed(entry).await;
		Ok(out.version_id)
	}

	async fn replicate_part(
		&self,
		entry: &ObjectEntry,
		upload_id: &str,
		part_number: u64,
		part_range: Option<ByteRange>,
	) -> Result<CompletedPart, Error> {
		if *self.must_exit.borrow() {
			return Err(Error::Shutdown);
		}
		let size = part_range.map(|r| r.len()).unwrap_or(0);
		let args = self.put_args(entry, size);
		let part = self
			.retried_target("replicate object part", || async {
				// A retried part re-opens its source stream
				let body = self
					.source
					.object_stream(
						entry.bucket(),
						entry.key(),
						entry.version_id(),
						part_range,
						None,
					)
					.await?;
				self.destination
					.bind()
					.put_mpu_part(&args, upload_id, part_number, size, Body::wrap_stream(body))
					.await
			})
			.await?;
		if entry.is_nfs() {
			self.recheck_source_state(entry).await?;
		}
		self.publisher.metric_part_completed(entry, size).await;
		self.metrics.part_replicated(size);
		Ok(part)
	}

	/// Best-effort abort of an open multipart upload
	async fn abort_upload(&self, entry: &ObjectEntry, upload_id: &str) {
		let args = self.put_args(entry, 0);
		let res = self
			.retried_target("abort multipart upload", || async {
				self.destination.bind().abort_mpu(&args, upload_id).await
			})
			.await;
		if let Err(e) = res {
			warn!(
				"Could not abort multipart upload {} of {}/{}: {}",
				upload_id,
				entry.bucket(),
				entry.key(),
				e
			);
		}
	}

	// ---- S8: single-put replication ----

	async fn replicate_data(&self, entry: &ObjectEntry) -> Result<Option<String>, Error> {
		if entry
			.locations()
			.iter()
			.any(|l| l.data_store_etag.is_none())
		{
			return Err(Error::Message(format!(
				"Missing dataStoreETag in part locations of {}/{}",
				entry.bucket(),
				entry.key()
			)));
		}
		self.publisher.metric_queued(entry).await;

		if entry.locations().is_empty() {
			// Metadata-only mutation: no body, logical size only
			let args = self.put_args(entry, entry.content_length());
			let out = self
				.retried_target("put object metadata", || async {
					self.destination.bind().put_object(&args, None).await
				})
				.await?;
			self.publisher
				.metric_part_completed(entry, entry.content_length())
				.await;
			self.publisher.metric_object_completed(entry).await;
			return Ok(out.version_id);
		}

		let reduced = reduce_locations(entry.locations());
		let outcomes: Vec<(u64, PutOutcome)> = stream::iter(
			reduced
				.into_iter()
				.map(|part| async move { self.replicate_reduced_part(entry, &part).await }),
		)
		.buffer_unordered(MAX_PARALLEL_PARTS)
		.try_collect()
		.await?;

		let version_id = outcomes
			.iter()
			.min_by_key(|(start, _)| *start)
			.and_then(|(_, out)| out.version_id.clone());
		self.publisher.metric_object_completed(entry).await;
		Ok(version_id)
	}

	async fn replicate_reduced_part(
		&self,
		entry: &ObjectEntry,
		part: &PartLocation,
	) -> Result<(u64, PutOutcome), Error> {
		if *self.must_exit.borrow() {
			return Err(Error::Shutdown);
		}
		let part_range = if part.part_size == 0 {
			None
		} else {
			Some(ByteRange::new(
				part.start,
				part.start + part.part_size - 1,
			))
		};
		let args = self.put_args(entry, part.part_size);
		let out = self
			.retried_target("put object data", || async {
				let body = self
					.source
					.object_stream(
						entry.bucket(),
						entry.key(),
						entry.version_id(),
						part_range,
						None,
					)
					.await?;
				self.destination
					.bind()
					.put_object(&args, Some(Body::wrap_stream(body)))
					.await
			})
			.await?;
		self.publisher
			.metric_part_completed(entry, part.part_size)
			.await;
		self.metrics.part_replicated(part.part_size);
		Ok((part.start, out))
	}

	// ---- S4: delete markers ----

	async fn put_delete_marker(&self, entry: &ObjectEntry) -> Result<Option<String>, Error> {
		let out = self
			.retried_target("replicate delete marker", || async {
				self.destination
					.bind()
					.delete_object(entry.bucket(), entry.key(), entry.version_id())
					.await
			})
			.await?;
		Ok(out.version_id)
	}

	// ---- S6/S7: tagging ----

	async fn put_tagging(&self, entry: &ObjectEntry) -> Result<Option<String>, Error> {
		let data_store_version_id = entry
			.site_data_store_version_id(&self.site)
			.map(str::to_string);
		let out = self
			.retried_target("put object tagging", || async {
				self.destination
					.bind()
					.put_object_tagging(
						entry.bucket(),
						entry.key(),
						entry.tags(),
						data_store_version_id.as_deref(),
					)
					.await
			})
			.await?;
		Ok(out.version_id)
	}

	async fn delete_tagging(&self, entry: &ObjectEntry) -> Result<Option<String>, Error> {
		let data_store_version_id = entry
			.site_data_store_version_id(&self.site)
			.map(str::to_string);
		let out = self
			.retried_target("delete object tagging", || async {
				self.destination
					.bind()
					.delete_object_tagging(
						entry.bucket(),
						entry.key(),
						data_store_version_id.as_deref(),
					)
					.await
			})
			.await?;
		Ok(out.version_id)
	}
}
