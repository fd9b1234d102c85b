use anyhow::{Context, Result};
use std::path::PathBuf;
use tilecache::build;
use tilecache::build::{Layer, Runtime};
use tilecache::config::Document;
use tilecache_storage::{DimensionValues, TileCoord};

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// YAML configuration file to load and summarize.
	#[arg(required = true)]
	pub config: PathBuf,

	/// Fetch a sample tile from every cache to confirm it is actually
	/// reachable. Repeat (-d -d) to probe level 1 as well as level 0.
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub deep: u8,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let yaml = std::fs::read_to_string(&arguments.config).with_context(|| format!("reading config file {:?}", arguments.config))?;
	let document: Document = serde_yaml_ng::from_str(&yaml).with_context(|| format!("parsing config file {:?}", arguments.config))?;

	let env = build::build_environment(&document.globals)?;
	let runtime = build::build(&document, &env)?;

	println!("sources: {}", runtime.sources.len());
	for name in runtime.sources.keys() {
		println!("  - {name}");
	}

	println!("caches: {}", runtime.caches.len());
	for (name, manager) in &runtime.caches {
		let grid = manager.grid();
		println!(
			"  - {name}: srs={} levels={} format={}",
			grid.srs(),
			grid.num_levels(),
			manager.format().content_type()
		);
	}

	println!("layers:");
	print_layers(&runtime.layers, 1);

	if arguments.deep > 0 {
		probe_caches(&runtime, arguments.deep).await?;
	}

	Ok(())
}

fn print_layers(layers: &[Layer], indent: usize) {
	for layer in layers {
		println!("{}- {} ({} entries)", "  ".repeat(indent), layer.name, layer.entries.len());
		print_layers(&layer.children, indent + 1);
	}
}

async fn probe_caches(runtime: &Runtime, deep: u8) -> Result<()> {
	let levels_to_check = deep as usize;
	for (name, manager) in &runtime.caches {
		for level in 0..levels_to_check.min(manager.grid().num_levels()) {
			let coord = TileCoord::new(level, 0, 0);
			match manager.load_tiles(&[coord], &DimensionValues::new()).await {
				Ok(tiles) => {
					let present = tiles.first().is_some_and(|tile| tile.image.is_some());
					println!("cache {name} level {level}: {}", if present { "tile present" } else { "not cached yet" });
				}
				Err(err) => println!("cache {name} level {level}: error {err:#}"),
			}
		}
	}
	Ok(())
}
