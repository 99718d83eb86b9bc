//! Clipboard writing.
//!
//! - On Linux: pipes the text into `wl-copy` (Wayland) or `xclip` (X11), which
//!   keep serving the selection after we exit; falls back to `arboard`.
//! - On macOS and Windows: uses `arboard::Clipboard::set_text()`.

#[cfg(target_os = "linux")]
mod linux;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClipboardError {
    #[error("No clipboard tool available ({0})")]
    Unavailable(String),
    #[error("Clipboard tool `{tool}` failed: {reason}")]
    Tool { tool: &'static str, reason: String },
    #[error("Clipboard error: {0}")]
    Arboard(#[from] arboard::Error),
}

/// Replaces the system clipboard contents with `text`.
/// Logs only the length of the text.
pub fn set_clipboard_text(text: &str) -> Result<(), ClipboardError> {
    debug!(len = text.len(), "Copying text to clipboard");

    #[cfg(target_os = "linux")]
    {
        linux::set_clipboard_text_linux(text)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let mut clipboard = arboard::Clipboard::new()?;
        clipboard.set_text(text.to_string())?;
        Ok(())
    }
}
