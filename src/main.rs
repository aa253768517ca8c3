use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::fs;

use docsync::config::Config;
use docsync::connectivity::ConnectivityDetector;
use docsync::gc::OperationGc;
use docsync::logging;
use docsync::server;
use docsync::store::Store;
use docsync::sync::SyncManager;
use docsync::types::SyncCycleResult;

///////////////////////
// Utility functions //
///////////////////////

fn report(result: &SyncCycleResult) {
	if result.success {
		eprintln!(
			"sync: {} pushed, {} pulled, {} conflicts",
			result.pushed,
			result.pulled,
			result.conflicts.len()
		);
	} else {
		eprintln!(
			"sync failed: {}",
			result.message.as_deref().unwrap_or("unknown reason")
		);
	}
	for error in &result.errors {
		eprintln!("  {}", error);
	}
}

fn init_docsync_dir(config: &Config) -> Result<PathBuf, Box<dyn Error>> {
	let dir = config.docsync_dir.clone();
	match fs::metadata(&dir) {
		Ok(meta) => {
			if meta.is_dir() {
				Ok(dir)
			} else {
				Err(format!("{} exists, but it is not a directory!", dir.display()).into())
			}
		}
		Err(_) => {
			fs::create_dir_all(&dir)?;
			Ok(dir)
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	logging::init_tracing();

	let matches = Command::new("DocSync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Offline-first document synchronization engine")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("Config file path"),
		)
		.subcommand(
			Command::new("serve").about("Run the sync HTTP server").arg(
				Arg::new("listen")
					.short('l')
					.long("listen")
					.value_name("ADDR")
					.help("Listen address (overrides config)"),
			),
		)
		.subcommand(
			Command::new("sync")
				.about("Run one push/pull cycle against the configured server")
				.arg(
					Arg::new("watch")
						.short('w')
						.long("watch")
						.action(ArgAction::SetTrue)
						.help("Keep running with the auto-sync timer"),
				),
		)
		.subcommand(Command::new("gc").about("Compact the operation log now"))
		.get_matches();

	let config_path = matches.get_one::<String>("config").map(PathBuf::from);
	let config = Config::load(config_path.as_deref())?;
	init_docsync_dir(&config)?;

	if let Some(sub) = matches.subcommand_matches("serve") {
		let listen = sub
			.get_one::<String>("listen")
			.cloned()
			.unwrap_or_else(|| config.listen_addr.clone());
		let addr: SocketAddr = listen.parse()?;

		let store = Arc::new(Store::open(&config.db_path())?);
		server::serve(addr, store, config.rate_limit()).await?;
	} else if let Some(sub) = matches.subcommand_matches("sync") {
		let store = Arc::new(Store::open(&config.db_path())?);
		let detector = Arc::new(ConnectivityDetector::new());
		detector.set_online();

		let manager = SyncManager::new(store, detector, config.sync_config());

		if sub.get_flag("watch") {
			manager.start();
			let result = manager.sync().await;
			report(&result);
			tokio::signal::ctrl_c().await?;
			manager.destroy();
		} else {
			let result = manager.sync().await;
			report(&result);
			if !result.success {
				std::process::exit(1);
			}
		}
	} else if matches.subcommand_matches("gc").is_some() {
		let store = Arc::new(Store::open(&config.db_path())?);
		let gc = OperationGc::new(store, config.gc_config());
		match gc.run(true)? {
			Some(stats) => eprintln!(
				"gc: {} aged out, {} removed by compaction across {} files",
				stats.deleted_by_age, stats.deleted_by_compaction, stats.files_compacted
			),
			None => eprintln!("gc: refused (already running)"),
		}
	}

	Ok(())
}

// vim: ts=4
