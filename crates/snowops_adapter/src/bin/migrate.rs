#![forbid(unsafe_code)]

use std::process::ExitCode;

use clap::Parser;
use snowops_adapter::{init_tracing, open_store, AdapterConfig};
use tracing::{error, info};

/// Applies the contract schema to the configured database and reports the
/// journal mode. Safe to run repeatedly.
#[derive(Parser)]
#[command(name = "snowops_contract_migrate")]
#[command(about = "Create or upgrade the snow-removal contract database")]
struct Cli {
    /// Overrides SNOWOPS_DB_PATH.
    #[arg(long)]
    db_path: Option<String>,
    /// Print the effective configuration as JSON and exit.
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = AdapterConfig::from_env();
    if let Some(path) = cli.db_path {
        config.db_path = path;
    }
    if cli.print_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("snowops_contract_migrate: {err}");
                ExitCode::FAILURE
            }
        };
    }
    if let Err(err) = init_tracing(&config.log_filter) {
        eprintln!("snowops_contract_migrate: {err}");
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, db_path = %config.db_path, "migration failed");
            return ExitCode::FAILURE;
        }
    };
    match store.journal_mode() {
        Ok(mode) => {
            info!(db_path = %config.db_path, journal_mode = %mode, "schema applied");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "could not read journal mode");
            ExitCode::FAILURE
        }
    }
}
