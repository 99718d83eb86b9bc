//! Capture → OCR → classify → render → dispatch, as an explicit state machine.

use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::latex::{Render, RenderArtifact};
use crate::ocr::Recognize;
use crate::system::{Capture, CaptureError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    CapturedNoText,
    OcrFailed,
    RenderFailed,
    Cancelled,
    CaptureFailed,
}

/// Terminal value of one run, handed to dispatch and used for the exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub status: OutcomeStatus,
    pub text: Option<String>,
    pub artifact: Option<RenderArtifact>,
    /// Human-readable failure description, if any.
    pub detail: Option<String>,
}

impl PipelineOutcome {
    fn failed(status: OutcomeStatus, text: Option<String>, detail: String) -> Self {
        Self {
            status,
            text,
            artifact: None,
            detail: Some(detail),
        }
    }

    /// 0 for success and user cancellation, 1 for every other abort.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            OutcomeStatus::Success | OutcomeStatus::Cancelled => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    CaptureToolError,
    NoText,
    OcrServiceError,
    RenderError,
}

impl AbortReason {
    fn status(self) -> OutcomeStatus {
        match self {
            Self::Cancelled => OutcomeStatus::Cancelled,
            Self::CaptureToolError => OutcomeStatus::CaptureFailed,
            Self::NoText => OutcomeStatus::CapturedNoText,
            Self::OcrServiceError => OutcomeStatus::OcrFailed,
            Self::RenderError => OutcomeStatus::RenderFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Recognizing,
    Classifying,
    Rendering,
    Dispatching,
    Done,
    Aborted(AbortReason),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

pub struct Orchestrator {
    capture: Box<dyn Capture>,
    ocr: Box<dyn Recognize>,
    renderer: Box<dyn Render>,
    dispatcher: Dispatcher,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Orchestrator {
    pub fn new(
        capture: Box<dyn Capture>,
        ocr: Box<dyn Recognize>,
        renderer: Box<dyn Render>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            capture,
            ocr,
            renderer,
            dispatcher,
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
        self.history.push(next);
    }

    fn abort(&mut self, reason: AbortReason, text: Option<String>, detail: String) -> PipelineOutcome {
        if reason == AbortReason::Cancelled {
            info!("{detail}");
        } else {
            error!(reason = ?reason, "{detail}");
        }
        self.transition(PipelineState::Aborted(reason));
        PipelineOutcome::failed(reason.status(), text, detail)
    }

    /// Runs the stages up to (not including) dispatch.
    fn execute(&mut self) -> PipelineOutcome {
        self.transition(PipelineState::Capturing);
        let capture = match self.capture.acquire() {
            Ok(capture) => capture,
            Err(CaptureError::Cancelled) => {
                return self.abort(AbortReason::Cancelled, None, CaptureError::Cancelled.to_string())
            }
            Err(e) => return self.abort(AbortReason::CaptureToolError, None, e.to_string()),
        };
        info!(
            path = %capture.image_path.display(),
            width = capture.width,
            height = capture.height,
            "Image captured"
        );

        self.transition(PipelineState::Recognizing);
        let recognized = self.ocr.recognize(&capture.image_path);
        // The temporary capture file is no longer needed either way.
        drop(capture);
        let result = match recognized {
            Ok(result) => result,
            Err(e) => return self.abort(AbortReason::OcrServiceError, None, e.to_string()),
        };
        if result.is_empty() {
            return self.abort(
                AbortReason::NoText,
                None,
                "No text could be extracted from the image".to_string(),
            );
        }

        self.transition(PipelineState::Classifying);
        if !result.contains_math {
            debug!("No LaTeX detected, skipping render");
            return PipelineOutcome {
                status: OutcomeStatus::Success,
                text: Some(result.raw_text),
                artifact: None,
                detail: None,
            };
        }

        self.transition(PipelineState::Rendering);
        match self.renderer.render(&result.raw_text) {
            Ok(artifact) => PipelineOutcome {
                status: OutcomeStatus::Success,
                text: Some(result.raw_text),
                artifact: Some(artifact),
                detail: None,
            },
            Err(e) => self.abort(AbortReason::RenderError, Some(result.raw_text), e.to_string()),
        }
    }

    /// Runs the whole pipeline once. Dispatch always happens, aborted or not.
    pub fn run(&mut self) -> PipelineOutcome {
        let outcome = self.execute();

        let aborted = self.state.is_terminal();
        if !aborted {
            self.transition(PipelineState::Dispatching);
        }
        let report = self.dispatcher.dispatch(&outcome);
        if !report.warnings.is_empty() {
            warn!(count = report.warnings.len(), "Some results could not be delivered");
        }
        if !aborted {
            self.transition(PipelineState::Done);
        }

        info!(status = ?outcome.status, exit_code = outcome.exit_code(), "Pipeline finished");
        outcome
    }
}
