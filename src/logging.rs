use anyhow::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{data_dir, LoggingConfig};

pub fn log_path(config: &LoggingConfig) -> PathBuf {
    config
        .file
        .clone()
        .unwrap_or_else(|| data_dir().join("satgazer.log"))
}

/// Sends log output to a file, since the terminal belongs to the UI.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<PathBuf> {
    let path = log_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(Mutex::new(file)),
    );

    // Ignore error if subscriber was already set
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(path)
}
