//! pracc - privacy protocol metrics aggregator
//!
//! Serves the JSON API by default; `overview`, `protocol` and `dominance`
//! print a single assembly and exit.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use pracc::{
    Assembler, RequestCache,
    api::Server,
    cli::{Cli, Command, OutputFormat},
    config::Config,
    insights::{dominance, exclude_protocols},
    registry::normalize_list,
    setup_tracing,
};

/// Exit code for an unknown protocol id
const EXIT_NOT_FOUND: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Serve { host, port }) => run_server(config, host, port).await,
        None => run_server(config, None, None).await,
        Some(Command::Overview { exclude, format }) => {
            run_overview(&config, exclude.as_deref(), format).await
        }
        Some(Command::Protocol { id, format }) => run_protocol(&config, &id, format).await,
        Some(Command::Dominance { format }) => run_dominance(&config, format).await,
    }
}

/// Run the HTTP API
async fn run_server(mut config: Config, host: Option<String>, port: Option<u16>) -> ExitCode {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting pracc"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

fn assembler(config: &Config) -> Option<Arc<Assembler>> {
    match Assembler::from_config(config) {
        Ok(a) => Some(Arc::new(a)),
        Err(e) => {
            error!("Failed to create assembler: {e}");
            None
        }
    }
}

/// Print the overview
async fn run_overview(config: &Config, exclude: Option<&str>, format: OutputFormat) -> ExitCode {
    let Some(assembler) = assembler(config) else {
        return ExitCode::FAILURE;
    };

    match assembler.assemble_overview(&RequestCache::new()).await {
        Ok(overview) => {
            let excluded = exclude.map(normalize_list).unwrap_or_default();
            if excluded.is_empty() {
                print_output(&overview, format)
            } else {
                print_output(&exclude_protocols(&overview, &excluded), format)
            }
        }
        Err(e) => {
            error!("Overview failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print one protocol
async fn run_protocol(config: &Config, id: &str, format: OutputFormat) -> ExitCode {
    let Some(assembler) = assembler(config) else {
        return ExitCode::FAILURE;
    };

    match assembler.assemble_detail(&RequestCache::new(), id).await {
        Ok(Some(detail)) => print_output(&detail, format),
        Ok(None) => {
            eprintln!("Protocol not found: {id}");
            ExitCode::from(EXIT_NOT_FOUND)
        }
        Err(e) => {
            error!("Detail failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print the dominance table
async fn run_dominance(config: &Config, format: OutputFormat) -> ExitCode {
    let Some(assembler) = assembler(config) else {
        return ExitCode::FAILURE;
    };

    match assembler.assemble_overview(&RequestCache::new()).await {
        Ok(overview) => print_output(&dominance(&overview), format),
        Err(e) => {
            error!("Dominance failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_output<T: Serialize>(value: &T, format: OutputFormat) -> ExitCode {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
    };

    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {e}");
            ExitCode::FAILURE
        }
    }
}
