//! Logger installation for the service binary.
//!
//! The library itself only emits records through the `log` facade. This module
//! wires those records to stdout and, optionally, to an append-only log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Writes every record to stdout and to an optional file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Parses a level name such as `INFO` or `debug`.
///
/// The Python-style names `WARNING`, `CRITICAL` and `FATAL` found in older
/// configuration files map to the nearest `log` level.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    let name = level.trim();
    let name = match name.to_ascii_lowercase().as_str() {
        "warning" => "warn",
        "critical" | "fatal" => "error",
        _ => name,
    };
    name.parse::<LevelFilter>()
        .map_err(|_| Error::Config(format!("Unknown logging level '{}'", level)))
}

/// Installs the global logger. `RUST_LOG`, when set, overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;

    let file = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        }
        None => None,
    };

    let mut builder = Builder::new();
    builder
        .filter_level(level)
        .format_timestamp_secs()
        .target(Target::Pipe(Box::new(TeeWriter { file })));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.try_init().map_err(Error::from)
}
