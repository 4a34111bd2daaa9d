use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pos_catalog_sync::{config, observability, run, sync_once};

#[derive(Parser)]
#[command(
	name = "pos-catalog-sync",
	about = "Mirror back-office catalog changes into the POS store"
)]
struct Cli {
	/// Configuration file (JSON, TOML or YAML); layered over the defaults
	#[arg(long, short)]
	config: Option<PathBuf>,
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Watch for change markers and sync until stopped (default)
	Run,
	/// Load and validate the configuration, then print a summary
	CheckConfig,
	/// Run one full sync cycle now and exit
	SyncOnce,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let settings = match config::load(cli.config.as_deref()) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Failed to load config: {}", e);
			return ExitCode::FAILURE;
		}
	};

	match cli.command.unwrap_or(Commands::Run) {
		Commands::CheckConfig => {
			println!(
				"source: {}@{}:{}/{}",
				settings.source.user, settings.source.host, settings.source.port, settings.source.database
			);
			println!("target: {}", settings.target.path.display());
			println!(
				"price type {} / divisor {} / weight unit {} / piece unit {} ({})",
				settings.price_type,
				settings.divisor,
				settings.weight_unit_id,
				settings.piece_unit_id,
				if settings.use_piece { "enabled" } else { "disabled" }
			);
			for (key, d) in &settings.departments {
				println!("department {}: code {} speed key {} \"{}\"", key, d.code, d.speed_key(), d.name);
			}
			println!(
				"retry every {}s, idle poll {}ms",
				settings.poll_interval_secs, settings.idle_poll_ms
			);
			ExitCode::SUCCESS
		}
		Commands::Run => {
			if let Err(e) = observability::init_logging(settings.log_level, settings.log_file.as_deref()) {
				eprintln!("{:#}", e);
				return ExitCode::FAILURE;
			}
			match run(&settings).await {
				Ok(()) => ExitCode::SUCCESS,
				Err(e) => {
					log::error!("{:#}", e);
					ExitCode::FAILURE
				}
			}
		}
		Commands::SyncOnce => {
			if let Err(e) = observability::init_logging(settings.log_level, settings.log_file.as_deref()) {
				eprintln!("{:#}", e);
				return ExitCode::FAILURE;
			}
			match sync_once(&settings).await {
				Ok(summary) if summary.failures() == 0 => ExitCode::SUCCESS,
				Ok(summary) => {
					log::error!("{} entity kinds failed to sync", summary.failures());
					ExitCode::FAILURE
				}
				Err(e) => {
					log::error!("{:#}", e);
					ExitCode::FAILURE
				}
			}
		}
	}
}
