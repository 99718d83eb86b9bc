//! Linux-specific clipboard implementation

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use arboard::{Clipboard, LinuxClipboardKind, SetExtLinux};
use tracing::{debug, info, warn};

use super::ClipboardError;

/// How long the arboard fallback keeps serving the selection before we exit.
const ARBOARD_SERVE_TIMEOUT: Duration = Duration::from_secs(2);

const XCLIP_ARGS: &[&str] = &["-selection", "clipboard"];
const WL_COPY_ARGS: &[&str] = &[];

/// Tools tried in order. Wayland first only when a Wayland session is present.
fn candidate_tools() -> Vec<(&'static str, &'static [&'static str])> {
    let mut tools = vec![("xclip", XCLIP_ARGS)];
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        tools.insert(0, ("wl-copy", WL_COPY_ARGS));
    }
    tools
}

/// Writes `text` to a clipboard tool's stdin. `Ok(false)` means the tool is not installed.
fn pipe_to_tool(tool: &'static str, args: &[&str], text: &str) -> Result<bool, ClipboardError> {
    let mut child = match Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        // xclip forks a server that would hold inherited pipes open
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(ClipboardError::Tool {
                tool,
                reason: e.to_string(),
            })
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .map_err(|e| ClipboardError::Tool {
                tool,
                reason: format!("failed to write to stdin: {e}"),
            })?;
    }

    let status = child.wait().map_err(|e| ClipboardError::Tool {
        tool,
        reason: e.to_string(),
    })?;
    if !status.success() {
        return Err(ClipboardError::Tool {
            tool,
            reason: format!("exited with {status}"),
        });
    }
    Ok(true)
}

pub(super) fn set_clipboard_text_linux(text: &str) -> Result<(), ClipboardError> {
    let mut last_error = None;
    for (tool, args) in candidate_tools() {
        match pipe_to_tool(tool, args, text) {
            Ok(true) => {
                info!(tool, "Text copied to clipboard");
                return Ok(());
            }
            Ok(false) => debug!(tool, "Clipboard tool not installed"),
            Err(e) => {
                warn!(tool, error = %e, "Clipboard tool failed, trying next");
                last_error = Some(e);
            }
        }
    }

    debug!("Falling back to arboard clipboard");
    let fallback = Clipboard::new().and_then(|mut clipboard| {
        clipboard
            .set()
            .clipboard(LinuxClipboardKind::Clipboard)
            .wait_until(Instant::now() + ARBOARD_SERVE_TIMEOUT)
            .text(text.to_string())
    });
    match (fallback, last_error) {
        (Ok(()), _) => {
            info!("Text copied to clipboard via arboard");
            Ok(())
        }
        (Err(_), Some(tool_error)) => Err(tool_error),
        (Err(e), None) => Err(ClipboardError::Unavailable(format!(
            "install wl-clipboard or xclip; arboard: {e}"
        ))),
    }
}
