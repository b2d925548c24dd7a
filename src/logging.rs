//! Logging setup.
//!
//! Everything goes to stderr so the acme window only ever holds command
//! output. `AFZ_LOG` (then `RUST_LOG`) overrides the preset picked on the
//! command line.

use std::io;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const ENV_VAR: &str = "AFZ_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{s}'. Use 'text' or 'json'.")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Errors only
    Quiet,
    /// Warnings and errors, including failed plumbs
    #[default]
    Normal,
    /// Startup, command runs and loop summary
    Verbose,
    /// Every dispatched command
    Debug,
    /// Every forwarded event and 9P message
    Trace,
}

impl LogPreset {
    fn level(self) -> Level {
        match self {
            LogPreset::Quiet => Level::ERROR,
            LogPreset::Normal => Level::WARN,
            LogPreset::Verbose => Level::INFO,
            LogPreset::Debug => Level::DEBUG,
            LogPreset::Trace => Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    pub format: LogFormat,
}

impl LogConfig {
    /// `quiet` wins over any number of `-v`.
    pub fn from_cli(verbose: u8, quiet: bool, format: LogFormat) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else {
            match verbose {
                0 => LogPreset::Normal,
                1 => LogPreset::Verbose,
                2 => LogPreset::Debug,
                _ => LogPreset::Trace,
            }
        };
        Self { preset, format }
    }

    fn directive(&self) -> String {
        let level = level_to_str(self.preset.level());
        // Dependencies stay at warn unless asked for explicitly.
        let deps = if self.preset == LogPreset::Quiet {
            "error"
        } else {
            "warn"
        };
        format!("{deps},afz={level}")
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_target(true)
                        .without_time(),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr).with_target(true))
                .init();
        }
    }
}
