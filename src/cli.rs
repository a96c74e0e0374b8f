use clap::{Parser, Subcommand, ValueEnum};

/// Sync the asset-tracking API into Postgres and republish derived views.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log instead of triggering downstream DAGs, and default to debug logging
    #[arg(long)]
    pub test: bool,

    /// Disable TLS certificate verification (local proxies only)
    #[arg(long)]
    pub local: bool,

    /// Log level for this crate; overrides LOG_LEVEL
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// Explicit `--log-level`, then `debug` in test mode, then the configured level.
    pub fn effective_log_level(&self, configured: &str) -> String {
        match (&self.log_level, self.test) {
            (Some(level), _) => level.clone(),
            (None, true) => "debug".to_string(),
            (None, false) => configured.to_string(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// Run the full pipeline
    #[default]
    Sync,
    /// Refetch and replace stored history for specific assets
    History {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
