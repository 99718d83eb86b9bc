//! Capture through a command that writes PNG bytes to stdout (flameshot by default).

use std::fs::{self, File};
use std::process::{Command, Stdio};

use tracing::{debug, error, info};

use super::{spawn_error, temp_capture_path, Capture, CaptureError, CaptureResult};

const FLAMESHOT: &str = "flameshot";

/// Runs `program args...` with stdout redirected into a temporary file.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
}

/// What a finished capture process means for the pipeline.
#[derive(Debug, PartialEq, Eq)]
enum ExitVerdict {
    Captured,
    Cancelled,
    Failed(String),
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `flameshot gui --raw`: interactive region selection, PNG on stdout.
    pub fn flameshot() -> Self {
        Self::new(FLAMESHOT, vec!["gui".to_string(), "--raw".to_string()])
    }

    /// Builds from a config argv list. The first element is the program.
    pub fn from_argv(argv: &[String]) -> Self {
        let (program, args) = argv.split_first().map_or_else(
            || (FLAMESHOT.to_string(), Vec::new()),
            |(program, args)| (program.clone(), args.to_vec()),
        );
        Self::new(program, args)
    }
}

fn mentions_cancel(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("abort") || lower.contains("cancel")
}

/// Decides between capture, cancellation and failure.
///
/// No bytes written means the user backed out unless the tool clearly
/// reported an error of its own.
fn exit_verdict(success: bool, code: Option<i32>, stderr: &str, bytes_written: u64) -> ExitVerdict {
    let stderr = stderr.trim();
    if bytes_written == 0 {
        if success || stderr.is_empty() || mentions_cancel(stderr) {
            return ExitVerdict::Cancelled;
        }
        return ExitVerdict::Failed(stderr.to_string());
    }
    if !success {
        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        return ExitVerdict::Failed(if stderr.is_empty() {
            format!("exited with status {code}")
        } else {
            format!("exited with status {code}: {stderr}")
        });
    }
    ExitVerdict::Captured
}

impl Capture for CommandCapture {
    fn acquire(&self) -> Result<CaptureResult, CaptureError> {
        debug!(program = %self.program, args = ?self.args, "Starting interactive region selection");

        let temp = temp_capture_path()?;
        let stdout = File::create(&temp).map_err(CaptureError::TempFile)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| spawn_error(&self.program, e))?;

        let bytes_written = fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
        let stderr = String::from_utf8_lossy(&output.stderr);

        match exit_verdict(output.status.success(), output.status.code(), &stderr, bytes_written) {
            ExitVerdict::Cancelled => {
                debug!("User cancelled screenshot selection");
                Err(CaptureError::Cancelled)
            }
            ExitVerdict::Failed(reason) => {
                error!(program = %self.program, error = %reason, "Screenshot capture failed");
                Err(CaptureError::ToolFailed {
                    program: self.program.clone(),
                    reason,
                })
            }
            ExitVerdict::Captured => {
                let capture = CaptureResult::from_temp(temp)?;
                info!(
                    bytes = bytes_written,
                    width = capture.width,
                    height = capture.height,
                    path = %capture.image_path.display(),
                    "Screenshot captured successfully"
                );
                Ok(capture)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_is_cancel() {
        assert_eq!(exit_verdict(true, Some(0), "", 0), ExitVerdict::Cancelled);
        assert_eq!(exit_verdict(false, Some(1), "", 0), ExitVerdict::Cancelled);
        assert_eq!(
            exit_verdict(false, Some(1), "flameshot: info: Screenshot aborted.", 0),
            ExitVerdict::Cancelled
        );
    }

    #[test]
    fn test_reported_error_without_output_is_failure() {
        assert_eq!(
            exit_verdict(false, Some(1), "could not connect to display", 0),
            ExitVerdict::Failed("could not connect to display".to_string())
        );
    }

    #[test]
    fn test_nonzero_exit_with_output_is_failure() {
        let verdict = exit_verdict(false, Some(3), "", 1024);
        assert_eq!(verdict, ExitVerdict::Failed("exited with status 3".to_string()));
    }

    #[test]
    fn test_success_with_output_is_capture() {
        assert_eq!(exit_verdict(true, Some(0), "", 1024), ExitVerdict::Captured);
    }

    #[test]
    fn test_from_argv_splits_program() {
        let capture = CommandCapture::from_argv(&[
            "grimshot".to_string(),
            "save".to_string(),
            "area".to_string(),
            "-".to_string(),
        ]);
        assert_eq!(capture.program, "grimshot");
        assert_eq!(capture.args, vec!["save", "area", "-"]);
    }

    #[test]
    fn test_missing_tool() {
        let capture = CommandCapture::new("latexsnip-no-such-capture-tool", vec![]);
        assert!(matches!(
            capture.acquire(),
            Err(CaptureError::ToolMissing { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_without_output_is_cancelled() {
        let capture = CommandCapture::new("sh", vec!["-c".to_string(), "exit 0".to_string()]);
        assert!(matches!(capture.acquire(), Err(CaptureError::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_png_on_stdout_is_captured() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("region.png");
        image::RgbImage::new(20, 10).save(&source).unwrap();

        let capture = CommandCapture::new("cat", vec![source.to_string_lossy().into_owned()]);
        let result = capture.acquire().unwrap();
        assert_eq!((result.width, result.height), (20, 10));
        assert!(result.is_temporary());
        assert_ne!(result.image_path, source);
    }
}
