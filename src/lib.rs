//! Capture a screen region, OCR it, and render any LaTeX it contains.

pub mod config;
pub mod dispatch;
pub mod latex;
pub mod ocr;
pub mod paths;
pub mod pipeline;
pub mod system;

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Sets up stderr logging. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();
}
