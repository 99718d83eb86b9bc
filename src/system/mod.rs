//! System interactions (screenshot, clipboard, viewer, notifications)

mod clipboard;
mod notify;
pub mod screenshot;
mod viewer;

pub use clipboard::{set_clipboard_text, ClipboardError};
pub use notify::{send_notification, NotifyError, Urgency};
pub use screenshot::{default_capture, Capture, CaptureError, CaptureResult, ExistingImage};
pub use viewer::{open_in_viewer, ViewerError};
