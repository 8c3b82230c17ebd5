use std::path::Path;

use figsync_lib::{Config, SyncError};
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

pub fn load_config(path: Option<&Path>) -> Result<Config, SyncError> {
    let cfg = if let Some(p) = path {
        Config::from_file(p).map_err(|e| {
            SyncError::Config(format!("Failed to read config {}: {}", p.display(), e))
        })?
    } else {
        Config::default()
    };

    cfg.validate()
        .map_err(|e| SyncError::Config(format!("Invalid config: {}", e)))?;
    Ok(cfg)
}

/// Log filter from `LOG_LEVEL` (a level or a full directive list), `info`
/// when unset. `--verbose` forces `debug`.
pub fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim().to_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Logs go to stderr so stdout stays parseable.
pub fn init_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
