//! Daemon wiring: config, gateways, bus and worker lifecycle

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::watch;

use ferry_gateway::destination::DestinationPool;
use ferry_gateway::source::SourceGateway;
use ferry_model::replication::DestinationFamily;
use ferry_task::metrics::TaskMetrics;
use ferry_task::publisher::StatusPublisher;
use ferry_task::task::ReplicationTask;
use ferry_task::worker::QueueWorker;
use ferry_util::bus::MemoryBus;
use ferry_util::config::read_config;
use ferry_util::error::{Error, ErrorContext};
use ferry_util::retry::RetryPolicy;

pub async fn run_server(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file.clone()).err_context(format!(
		"Unable to read configuration file {}",
		config_file.to_string_lossy()
	))?;

	let site = config.replication_site.clone();
	let family = DestinationFamily::from_str(&config.destination.family)?;

	info!("Initializing gateways...");
	let source = Arc::new(SourceGateway::new(&config.source));
	let destination = Arc::new(DestinationPool::new(&config.destination, &site)?);

	info!("Initializing log bus ({})...", config.bus.backend);
	let bus = match config.bus.backend.as_str() {
		"memory" => MemoryBus::new(),
		other => {
			return Err(Error::Message(format!(
				"Unknown log bus backend: {} (production deployments bind an external implementation of the bus interface)",
				other
			)))
		}
	};

	let publisher = Arc::new(StatusPublisher::new(
		Arc::new(bus.producer()),
		config.bus.status_topic.clone(),
		config.bus.metrics_topic.clone(),
		site.clone(),
	));
	let metrics = Arc::new(TaskMetrics::new(&site));

	let (send_shutdown, watch_shutdown) = watch::channel(false);

	let task = Arc::new(ReplicationTask::new(
		source,
		destination,
		publisher,
		metrics,
		site.clone(),
		family,
		RetryPolicy::from_config(&config.retry),
		watch_shutdown.clone(),
	));

	info!(
		"Starting {} queue worker(s) replicating to site {}...",
		config.worker_count, site
	);
	let mut workers = vec![];
	for _ in 0..config.worker_count {
		let consumer = Arc::new(bus.consumer(&config.bus.entry_topic));
		let worker = Arc::new(QueueWorker::new(
			consumer,
			task.clone(),
			config.worker_concurrency,
		));
		workers.push(tokio::spawn(worker.run(watch_shutdown.clone())));
	}

	info!("Ferry is up and running");
	tokio::spawn(async move {
		if let Err(e) = tokio::signal::ctrl_c().await {
			error!("Could not install the shutdown signal handler: {}", e);
			return;
		}
		info!("Shutdown signal received, draining in-flight entries...");
		let _ = send_shutdown.send(true);
	});

	for handle in workers {
		if let Err(e) = handle.await {
			error!("Worker exited abnormally: {}", e);
		}
	}

	info!("Ferry shut down cleanly");
	Ok(())
}
