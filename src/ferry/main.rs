//! Ferry daemon, hosting replication queue workers

#[macro_use]
extern crate tracing;

mod server;

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
	name = "ferry",
	about = "Cross-backend replication engine for S3-compatible object storage"
)]
struct Opt {
	/// Path to configuration file
	#[structopt(
		short = "c",
		long = "config",
		env = "FERRY_CONFIG_FILE",
		default_value = "/etc/ferry.toml"
	)]
	pub config_file: PathBuf,

	#[structopt(subcommand)]
	cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
	/// Run the replication worker daemon
	#[structopt(name = "server")]
	Server,
}

#[tokio::main]
async fn main() {
	// By default, Tokio keeps running when a task panics. A worker in
	// an unknown state is worse than a restart, so abort instead.
	std::panic::set_hook(Box::new(move |panic_info| {
		eprintln!("======== PANIC (internal Ferry error) ========");
		eprintln!("{}", panic_info);
		eprintln!();
		eprintln!("BACKTRACE:");
		eprintln!("{:?}", backtrace::Backtrace::new());
		std::process::abort();
	}));

	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "ferry=info")
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let opt = Opt::from_args();

	let res = match opt.cmd {
		Command::Server => server::run_server(opt.config_file).await,
	};

	if let Err(e) = res {
		eprintln!("Error: {}", e);
		std::process::exit(1);
	}
}
