use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tilecache::build;
use tilecache::config::Document;
use tilecache::dispatcher::Dispatcher;
use tilecache::server::TileServer;
use tokio::time::{Duration, sleep};

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// YAML configuration file describing grids, sources, caches and layers.
	#[arg(required = true)]
	pub config: PathBuf,

	/// Serve via socket ip. Default: 0.0.0.0
	#[arg(short = 'i', long)]
	pub ip: Option<String>,

	/// Serve via port. Default: 8080
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Shut down automatically after this many milliseconds (mainly for tests).
	#[arg(long)]
	pub auto_shutdown: Option<u64>,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let yaml = std::fs::read_to_string(&arguments.config).with_context(|| format!("reading config file {:?}", arguments.config))?;
	let document: Document = serde_yaml_ng::from_str(&yaml).with_context(|| format!("parsing config file {:?}", arguments.config))?;

	let env = build::build_environment(&document.globals)?;
	let runtime = build::build(&document, &env)?;
	let dispatcher = Arc::new(Dispatcher::new(runtime));

	let ip = arguments.ip.clone().unwrap_or_else(|| "0.0.0.0".to_string());
	let port = arguments.port.unwrap_or(8080);
	let mut server = TileServer::new(ip, port, dispatcher);
	server.start().await?;
	log::info!("listening on port {}", server.get_port());

	if let Some(milliseconds) = arguments.auto_shutdown {
		sleep(Duration::from_millis(milliseconds)).await;
	} else {
		loop {
			sleep(Duration::from_secs(60)).await;
		}
	}

	server.stop().await;
	Ok(())
}
