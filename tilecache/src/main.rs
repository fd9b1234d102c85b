mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{ErrorLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<ErrorLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Show a summary of a configuration without serving it
	Probe(tools::probe::Subcommand),

	#[clap(alias = "server")]
	/// Serve tiles via http
	Serve(tools::serve::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Probe(arguments) => tools::probe::run(arguments),
		Commands::Serve(arguments) => tools::serve::run(arguments),
	}
}

#[cfg(test)]
mod tests {
	use crate::{Cli, run};
	use anyhow::Result;
	use clap::Parser;

	pub fn run_command(arg_vec: Vec<&str>) -> Result<String> {
		let cli = Cli::try_parse_from(arg_vec)?;
		let msg = format!("{:?}", cli);
		run(cli)?;
		Ok(msg)
	}

	#[test]
	fn help() {
		let err = run_command(vec!["tilecache"]).unwrap_err().to_string();
		assert!(err.contains("Usage: tilecache"));
	}

	#[test]
	fn version() {
		let err = run_command(vec!["tilecache", "-V"]).unwrap_err().to_string();
		assert!(err.starts_with("tilecache "));
	}

	#[test]
	fn probe_subcommand_requires_a_config_path() {
		let output = run_command(vec!["tilecache", "probe"]).unwrap_err().to_string();
		assert!(output.starts_with("Show a summary of a configuration"));
	}

	#[test]
	fn serve_subcommand_requires_a_config_path() {
		let output = run_command(vec!["tilecache", "serve"]).unwrap_err().to_string();
		assert!(output.starts_with("Serve tiles via http"));
	}
}
