//! Desktop notifications via `notify-send` (Linux) or `osascript` (macOS).

use std::io::ErrorKind;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[cfg(not(target_os = "macos"))]
const APP_NAME: &str = "latexsnip";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification tool `{0}` not found")]
    ToolMissing(&'static str),
    #[error("Notification tool `{tool}` failed: {reason}")]
    Failed { tool: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Critical => "critical",
        }
    }
}

fn run(tool: &'static str, command: &mut Command) -> Result<(), NotifyError> {
    let output = command.output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            NotifyError::ToolMissing(tool)
        } else {
            NotifyError::Failed {
                tool,
                reason: e.to_string(),
            }
        }
    })?;
    if !output.status.success() {
        return Err(NotifyError::Failed {
            tool,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Escapes a string for use inside an AppleScript string literal.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Shows a notification with the given title and body.
pub fn send_notification(title: &str, body: &str, urgency: Urgency) -> Result<(), NotifyError> {
    debug!(title, urgency = urgency.as_str(), "Sending desktop notification");

    #[cfg(target_os = "macos")]
    {
        let script = format!(
            "display notification {} with title {}",
            applescript_quote(body),
            applescript_quote(title)
        );
        run("osascript", Command::new("osascript").args(["-e", &script]))
    }

    #[cfg(not(target_os = "macos"))]
    {
        run(
            "notify-send",
            Command::new("notify-send")
                .arg(format!("--urgency={}", urgency.as_str()))
                .arg(format!("--app-name={APP_NAME}"))
                .arg(title)
                .arg(body),
        )
    }
}
