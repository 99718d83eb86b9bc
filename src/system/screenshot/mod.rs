//! Screen region capture.
//!
//! Capture is delegated to an external region-selection tool. The tool writes
//! one image to a temporary path; the resulting [`CaptureResult`] owns that
//! file and deletes it when dropped.

mod command;
#[cfg(target_os = "macos")]
mod macos;

pub use command::CommandCapture;
#[cfg(target_os = "macos")]
pub use macos::ScreencaptureCapture;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

const TEMP_PREFIX: &str = "latexsnip-capture-";
const TEMP_SUFFIX: &str = ".png";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Screenshot selection cancelled by user")]
    Cancelled,
    #[error("Capture tool `{program}` not found; is it installed?")]
    ToolMissing { program: String },
    #[error("Capture tool `{program}` failed: {reason}")]
    ToolFailed { program: String, reason: String },
    #[error("Failed to create temporary file: {0}")]
    TempFile(io::Error),
    #[error("Captured file {path} is not a readable image: {reason}")]
    InvalidImage { path: PathBuf, reason: String },
}

/// One captured image. Exactly one exists per pipeline run.
#[derive(Debug)]
pub struct CaptureResult {
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
    /// Present when the file is ours to delete.
    temp: Option<TempPath>,
}

impl CaptureResult {
    /// Wraps an image the user already has on disk. The file is never deleted.
    pub fn from_existing(path: &Path) -> Result<Self, CaptureError> {
        let (width, height) = read_dimensions(path)?;
        Ok(Self {
            image_path: path.to_path_buf(),
            width,
            height,
            captured_at: Local::now(),
            temp: None,
        })
    }

    /// Takes ownership of a temporary capture file; dropping the result removes it.
    pub(crate) fn from_temp(temp: TempPath) -> Result<Self, CaptureError> {
        let (width, height) = read_dimensions(&temp)?;
        Ok(Self {
            image_path: temp.to_path_buf(),
            width,
            height,
            captured_at: Local::now(),
            temp: Some(temp),
        })
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

impl Drop for CaptureResult {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            debug!(path = %self.image_path.display(), "Removing temporary capture file");
            if let Err(e) = temp.close() {
                warn!(error = %e, path = %self.image_path.display(), "Failed to remove temporary capture file");
            }
        }
    }
}

fn read_dimensions(path: &Path) -> Result<(u32, u32), CaptureError> {
    let invalid = |reason: String| CaptureError::InvalidImage {
        path: path.to_path_buf(),
        reason,
    };
    image::ImageReader::open(path)
        .map_err(|e| invalid(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?
        .into_dimensions()
        .map_err(|e| invalid(e.to_string()))
}

pub(crate) fn temp_capture_path() -> Result<TempPath, CaptureError> {
    let file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile()
        .map_err(CaptureError::TempFile)?;
    Ok(file.into_temp_path())
}

/// Maps a failure to start the capture tool. A missing binary is reported
/// as such rather than as a tool failure.
pub(crate) fn spawn_error(program: &str, e: io::Error) -> CaptureError {
    if e.kind() == io::ErrorKind::NotFound {
        CaptureError::ToolMissing {
            program: program.to_string(),
        }
    } else {
        CaptureError::ToolFailed {
            program: program.to_string(),
            reason: format!("failed to start: {e}"),
        }
    }
}

/// Produces a single image of a user-selected region. Blocks until the user
/// finishes or cancels.
pub trait Capture {
    fn acquire(&self) -> Result<CaptureResult, CaptureError>;
}

/// Uses an image that already exists instead of asking the user to select one.
pub struct ExistingImage {
    path: PathBuf,
}

impl ExistingImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Capture for ExistingImage {
    fn acquire(&self) -> Result<CaptureResult, CaptureError> {
        debug!(path = %self.path.display(), "Using existing image instead of interactive capture");
        CaptureResult::from_existing(&self.path)
    }
}

/// Picks the capture backend: the configured command, or the platform default.
pub fn default_capture(config: &Config) -> Box<dyn Capture> {
    if let Some(argv) = &config.capture_command {
        return Box::new(CommandCapture::from_argv(argv));
    }

    #[cfg(target_os = "macos")]
    {
        Box::new(ScreencaptureCapture)
    }

    #[cfg(not(target_os = "macos"))]
    {
        Box::new(CommandCapture::flameshot())
    }
}
