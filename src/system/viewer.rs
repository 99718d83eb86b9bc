//! Opens files with the desktop's default application.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[cfg(target_os = "macos")]
const OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
const OPENER: &str = "xdg-open";

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("`{0}` not found")]
    ToolMissing(&'static str),
    #[error("Failed to open {path}: {reason}")]
    Failed { path: String, reason: String },
}

/// Opens `path` with the default viewer. Returns once the opener has handed off.
pub fn open_in_viewer(path: &Path) -> Result<(), ViewerError> {
    debug!(path = %path.display(), opener = OPENER, "Opening file in default viewer");

    let status = Command::new(OPENER)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ViewerError::ToolMissing(OPENER)
            } else {
                ViewerError::Failed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

    if !status.success() {
        return Err(ViewerError::Failed {
            path: path.display().to_string(),
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}
