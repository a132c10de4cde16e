//! Command-line interface for centauri.

use std::path::PathBuf;

use clap::Parser;

/// Environment variable consulted when `--log-level` is not given.
pub const LOG_LEVEL_ENV: &str = "CENTAURI_LOG";

/// centauri - tabbed, split-pane shell sessions driven from stdin
#[derive(Debug, Parser)]
#[command(name = "centauri")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.centauri.config.json)
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Log level for the log file (overrides CENTAURI_LOG)
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Cli {
    /// `--log-level`, then `CENTAURI_LOG`, then `warn`.
    pub fn log_level(&self) -> log::LevelFilter {
        resolve_log_level(self.log_level, std::env::var(LOG_LEVEL_ENV).ok().as_deref())
    }
}

fn resolve_log_level(flag: Option<LogLevelArg>, env: Option<&str>) -> log::LevelFilter {
    if let Some(flag) = flag {
        return flag.to_level_filter();
    }
    env.and_then(|value| value.trim().parse().ok())
        .unwrap_or(log::LevelFilter::Warn)
}
