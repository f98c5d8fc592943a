//! Subscriber setup for the `safeval` binary.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::sync::Mutex;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use safeval_core::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. The file layer writes plain text
/// to `<log_dir>/safeval_<timestamp>.log`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console {
        let layer = if config.json_format {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        } else {
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        };
        layers.push(layer);
    }

    let mut log_file = None;
    if config.file {
        let dir = config.log_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let path = dir.join(format!(
            "safeval_{}.log",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let file = File::create(&path)
            .with_context(|| format!("creating log file {}", path.display()))?;

        let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
        log_file = Some(path);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::info!(level = %config.level, file = ?log_file, "Logging initialized");
    Ok(())
}
