//! Main entry point for the broker service.
//!
//! This binary assembles the order lifecycle engine with the available
//! storage and connector implementations and runs it, optionally together
//! with the HTTP API server.

use broker_config::Config;
use broker_core::{BrokerBuilder, BrokerEngine};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod server;

/// Command-line arguments for the broker service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the broker service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the broker engine with all implementations
/// 5. Runs the broker until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started broker");

	let config_path = args.config.to_string_lossy().into_owned();
	let config = Config::from_file(&config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.broker.id);

	let engine = Arc::new(build_engine(config.clone())?);

	let api_enabled = config.api.as_ref().is_some_and(|api| api.enabled);

	if api_enabled {
		let api_config = config
			.api
			.clone()
			.ok_or("API enabled but not configured")?;
		let api_engine = Arc::clone(&engine);

		// Run the engine and the API server concurrently
		tokio::select! {
			result = engine.run() => {
				tracing::info!("Engine finished");
				result?;
			}
			result = server::start_server(api_config, api_engine) => {
				tracing::info!("API server finished");
				result?;
			}
		}
	} else {
		tracing::info!("Starting engine only");
		engine.run().await?;
	}

	tracing::info!("Stopped broker");
	Ok(())
}

/// Builds the broker engine with every available implementation registered.
///
/// The configuration decides which of them are actually instantiated.
fn build_engine(config: Config) -> Result<BrokerEngine, broker_core::BrokerError> {
	let mut builder = BrokerBuilder::new(config);

	for (name, factory) in broker_storage::get_all_implementations() {
		builder = builder.with_storage_factory(name, factory);
	}
	for (name, factory) in broker_connector::get_all_implementations() {
		builder = builder.with_connector_factory(name, factory);
	}

	builder.build()
}
