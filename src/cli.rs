//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Privacy protocol metrics aggregator
#[derive(Parser, Debug)]
#[command(name = "pracc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PRACC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PRACC_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PRACC_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API (default)
    Serve {
        /// Host to bind to
        #[arg(long, env = "PRACC_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PRACC_PORT")]
        port: Option<u16>,
    },

    /// Print the protocol overview
    Overview {
        /// Protocols to leave out of the aggregated views (comma separated)
        #[arg(short, long)]
        exclude: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print one protocol's detail record
    Protocol {
        /// Protocol id
        #[arg(required = true)]
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the TVL dominance table
    Dominance {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

/// Serialization of one-shot command output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}
