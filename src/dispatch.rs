//! Final side effects of a pipeline run: clipboard, viewer, notification.
//!
//! Each sink runs independently in a fixed order. A failing sink is logged
//! and reported to the sinks after it, but never stops them and never
//! changes the run's exit status.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pipeline::{OutcomeStatus, PipelineOutcome};
use crate::system::{self, ClipboardError, NotifyError, Urgency, ViewerError};

/// Non-fatal failure of one dispatch sink.
#[derive(Error, Debug)]
pub enum DispatchWarning {
    #[error("clipboard: {0}")]
    Clipboard(#[from] ClipboardError),
    #[error("viewer: {0}")]
    Viewer(#[from] ViewerError),
    #[error("notification: {0}")]
    Notify(#[from] NotifyError),
}

/// One independent dispatch action.
pub trait Sink {
    fn name(&self) -> &'static str;

    /// `earlier` holds warnings from sinks that already ran.
    fn deliver(&self, outcome: &PipelineOutcome, earlier: &[DispatchWarning]) -> Result<(), DispatchWarning>;
}

/// Copies the extracted text, when there is any.
pub struct ClipboardSink;

impl Sink for ClipboardSink {
    fn name(&self) -> &'static str {
        "clipboard"
    }

    fn deliver(&self, outcome: &PipelineOutcome, _earlier: &[DispatchWarning]) -> Result<(), DispatchWarning> {
        match outcome.text.as_deref() {
            Some(text) if !text.is_empty() => Ok(system::set_clipboard_text(text)?),
            _ => {
                debug!("No text to copy");
                Ok(())
            }
        }
    }
}

/// Opens the rendered image, when there is one.
pub struct ViewerSink;

impl Sink for ViewerSink {
    fn name(&self) -> &'static str {
        "viewer"
    }

    fn deliver(&self, outcome: &PipelineOutcome, _earlier: &[DispatchWarning]) -> Result<(), DispatchWarning> {
        if let Some(artifact) = &outcome.artifact {
            system::open_in_viewer(&artifact.output_path)?;
            info!(path = %artifact.output_path.display(), "Rendered LaTeX opened in image viewer");
        }
        Ok(())
    }
}

/// Summarizes the run as a desktop notification.
pub struct NotificationSink;

impl Sink for NotificationSink {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn deliver(&self, outcome: &PipelineOutcome, earlier: &[DispatchWarning]) -> Result<(), DispatchWarning> {
        let note = notification_for(outcome, earlier);
        Ok(system::send_notification(&note.title, &note.body, note.urgency)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

/// Builds the notification text for an outcome.
pub fn notification_for(outcome: &PipelineOutcome, earlier: &[DispatchWarning]) -> Notification {
    let clipboard_failed = earlier
        .iter()
        .any(|w| matches!(w, DispatchWarning::Clipboard(_)));
    let detail = outcome.detail.as_deref().unwrap_or("unknown error");

    let (title, mut body, urgency) = match outcome.status {
        OutcomeStatus::Success if clipboard_failed => (
            "Clipboard Error",
            "Text extracted but couldn't be copied to clipboard".to_string(),
            Urgency::Critical,
        ),
        OutcomeStatus::Success => (
            "OCR Successful",
            "Text extracted and copied to clipboard".to_string(),
            Urgency::Normal,
        ),
        OutcomeStatus::CapturedNoText => (
            "OCR Failed",
            "No text could be extracted from the image".to_string(),
            Urgency::Critical,
        ),
        OutcomeStatus::Cancelled => (
            "Capture Cancelled",
            "No region was selected".to_string(),
            Urgency::Low,
        ),
        OutcomeStatus::CaptureFailed => ("Screenshot Failed", detail.to_string(), Urgency::Critical),
        OutcomeStatus::OcrFailed => ("OCR Failed", detail.to_string(), Urgency::Critical),
        OutcomeStatus::RenderFailed => {
            let copied = if clipboard_failed {
                "Text extracted but couldn't be copied to clipboard"
            } else {
                "Text copied to clipboard"
            };
            (
                "LaTeX Rendering Failed",
                format!("{copied}\n{detail}"),
                Urgency::Critical,
            )
        }
    };

    if let Some(artifact) = &outcome.artifact {
        let name = artifact
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.output_path.display().to_string());
        body.push_str(&format!("\nLaTeX rendered and saved to: {name}"));
    }

    Notification {
        title: title.to_string(),
        body,
        urgency,
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub warnings: Vec<DispatchWarning>,
}

pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    /// Clipboard, then viewer (if enabled), then notification (if enabled).
    pub fn new(config: &Config) -> Self {
        let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(ClipboardSink)];
        if config.open_viewer {
            sinks.push(Box::new(ViewerSink));
        }
        if config.notify {
            sinks.push(Box::new(NotificationSink));
        }
        Self::with_sinks(sinks)
    }

    pub fn with_sinks(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    /// Runs every sink. Failures are collected, never raised.
    pub fn dispatch(&self, outcome: &PipelineOutcome) -> DispatchReport {
        let mut report = DispatchReport::default();
        for sink in &self.sinks {
            if let Err(warning) = sink.deliver(outcome, &report.warnings) {
                warn!(sink = sink.name(), error = %warning, "Dispatch step failed");
                report.warnings.push(warning);
            }
        }
        report
    }
}
