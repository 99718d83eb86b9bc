//! macOS-specific screenshot implementation using the screencapture command

use std::fs;
use std::process::Command;

use tracing::{debug, error, info};

use super::{spawn_error, temp_capture_path, Capture, CaptureError, CaptureResult};

const SCREENCAPTURE: &str = "screencapture";

/// Interactive region selection with `screencapture -i -x <path>`.
pub struct ScreencaptureCapture;

impl Capture for ScreencaptureCapture {
    fn acquire(&self) -> Result<CaptureResult, CaptureError> {
        debug!("Starting interactive screenshot region selection");

        let temp = temp_capture_path()?;
        debug!(path = %temp.display(), "Screenshot will be saved to temp file");

        // -i: interactive mode (crosshair for region selection), -x: no sound.
        // Escape cancels.
        let output = Command::new(SCREENCAPTURE)
            .arg("-i")
            .arg("-x")
            .arg(&*temp)
            .output()
            .map_err(|e| spawn_error(SCREENCAPTURE, e))?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);

            // Exit code 1 is what Escape produces
            if exit_code == 1 {
                debug!("User cancelled screenshot selection");
                return Err(CaptureError::Cancelled);
            }

            let reason = if stderr.trim().is_empty() {
                format!("exited with status {exit_code}")
            } else {
                stderr.trim().to_string()
            };
            error!(error = %reason, "Screenshot capture failed");
            return Err(CaptureError::ToolFailed {
                program: SCREENCAPTURE.to_string(),
                reason,
            });
        }

        // screencapture exits 0 without writing when the selection is dismissed
        let bytes = fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
        if bytes == 0 {
            debug!("No screenshot written, treating as cancelled");
            return Err(CaptureError::Cancelled);
        }

        let capture = CaptureResult::from_temp(temp)?;
        info!(
            bytes,
            path = %capture.image_path.display(),
            "Screenshot captured successfully"
        );
        Ok(capture)
    }
}
