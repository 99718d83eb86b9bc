use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Local;
use tempfile::TempDir;

use latexsnip::dispatch::{DispatchWarning, Dispatcher, Sink};
use latexsnip::latex::{render_file_name, LatexRenderer, Render, RenderArtifact, RenderError};
use latexsnip::ocr::{OcrError, OcrResult, Recognize};
use latexsnip::pipeline::{AbortReason, Orchestrator, OutcomeStatus, PipelineOutcome, PipelineState};
use latexsnip::system::{Capture, CaptureError, CaptureResult};

struct ImageCapture(PathBuf);

impl Capture for ImageCapture {
    fn acquire(&self) -> Result<CaptureResult, CaptureError> {
        CaptureResult::from_existing(&self.0)
    }
}

struct CancelledCapture;

impl Capture for CancelledCapture {
    fn acquire(&self) -> Result<CaptureResult, CaptureError> {
        Err(CaptureError::Cancelled)
    }
}

struct FakeOcr {
    reply: fn() -> Result<OcrResult, OcrError>,
    calls: Rc<Cell<usize>>,
}

impl Recognize for FakeOcr {
    fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        assert!(image_path.exists());
        self.calls.set(self.calls.get() + 1);
        (self.reply)()
    }
}

/// Writes a placeholder PNG the way the real renderer names its output.
struct FakeRenderer {
    output_dir: PathBuf,
    calls: Rc<Cell<usize>>,
}

impl Render for FakeRenderer {
    fn render(&self, latex_source: &str) -> Result<RenderArtifact, RenderError> {
        self.calls.set(self.calls.get() + 1);
        let created_at = Local::now();
        let output_path = self.output_dir.join(render_file_name(&created_at));
        fs::write(&output_path, b"\x89PNG fake")?;
        Ok(RenderArtifact {
            source_latex: latex_source.to_string(),
            output_path,
            created_at,
        })
    }
}

/// Stands in for the clipboard: records the text it would have copied.
struct RecordingSink {
    copied: Rc<RefCell<Vec<String>>>,
    outcomes: Rc<RefCell<Vec<PipelineOutcome>>>,
}

impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn deliver(&self, outcome: &PipelineOutcome, _earlier: &[DispatchWarning]) -> Result<(), DispatchWarning> {
        if let Some(text) = &outcome.text {
            self.copied.borrow_mut().push(text.clone());
        }
        self.outcomes.borrow_mut().push(outcome.clone());
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    ocr_calls: Rc<Cell<usize>>,
    render_calls: Rc<Cell<usize>>,
    copied: Rc<RefCell<Vec<String>>>,
    outcomes: Rc<RefCell<Vec<PipelineOutcome>>>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        image::RgbImage::new(8, 8).save(dir.path().join("shot.png")).unwrap();
        fs::create_dir(dir.path().join("renders")).unwrap();
        Self {
            dir,
            ocr_calls: Rc::new(Cell::new(0)),
            render_calls: Rc::new(Cell::new(0)),
            copied: Rc::new(RefCell::new(Vec::new())),
            outcomes: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn renders_dir(&self) -> PathBuf {
        self.dir.path().join("renders")
    }

    fn capture(&self) -> Box<dyn Capture> {
        Box::new(ImageCapture(self.dir.path().join("shot.png")))
    }

    fn ocr(&self, reply: fn() -> Result<OcrResult, OcrError>) -> Box<dyn Recognize> {
        Box::new(FakeOcr {
            reply,
            calls: self.ocr_calls.clone(),
        })
    }

    fn fake_renderer(&self) -> Box<dyn Render> {
        Box::new(FakeRenderer {
            output_dir: self.renders_dir(),
            calls: self.render_calls.clone(),
        })
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::with_sinks(vec![Box::new(RecordingSink {
            copied: self.copied.clone(),
            outcomes: self.outcomes.clone(),
        })])
    }

    fn render_count(&self) -> usize {
        fs::read_dir(self.renders_dir()).unwrap().count()
    }
}

fn is_render_file_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix("latex_render_")
        .and_then(|rest| rest.strip_suffix(".png"))
    else {
        return false;
    };
    let bytes = stamp.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit())
}

#[test]
fn test_plain_text_is_copied_without_render() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        h.capture(),
        h.ocr(|| Ok(OcrResult::from_text("The sum of angles is 180 degrees."))),
        h.fake_renderer(),
        h.dispatcher(),
    );

    let outcome = orch.run();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.artifact.is_none());
    assert_eq!(*h.copied.borrow(), vec!["The sum of angles is 180 degrees."]);
    assert_eq!(h.render_calls.get(), 0);
    assert_eq!(orch.state(), PipelineState::Done);
}

#[test]
fn test_equation_is_rendered_and_copied() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        h.capture(),
        h.ocr(|| Ok(OcrResult::from_text("Solve: $x^2 + 2x + 1 = 0$"))),
        h.fake_renderer(),
        h.dispatcher(),
    );

    let outcome = orch.run();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    let artifact = outcome.artifact.expect("artifact");
    assert!(artifact.output_path.starts_with(h.renders_dir()));
    assert!(artifact.output_path.exists());
    let name = artifact.output_path.file_name().unwrap().to_str().unwrap();
    assert!(is_render_file_name(name), "unexpected file name {name}");
    assert_eq!(*h.copied.borrow(), vec!["Solve: $x^2 + 2x + 1 = 0$"]);
    assert!(orch.history().contains(&PipelineState::Rendering));
}

#[test]
fn test_unauthorized_ocr_aborts_without_clipboard_write() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        h.capture(),
        h.ocr(|| Err(OcrError::Unauthorized("Unauthorized".to_string()))),
        h.fake_renderer(),
        h.dispatcher(),
    );

    let outcome = orch.run();
    assert_eq!(outcome.status, OutcomeStatus::OcrFailed);
    assert_ne!(outcome.exit_code(), 0);
    assert!(outcome.artifact.is_none());
    assert!(h.copied.borrow().is_empty());
    assert_eq!(orch.state(), PipelineState::Aborted(AbortReason::OcrServiceError));
    // The failure is still dispatched so the user hears about it.
    assert_eq!(h.outcomes.borrow().len(), 1);
    assert_eq!(h.render_count(), 0);
}

#[test]
fn test_unbalanced_brace_still_copies_text() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        h.capture(),
        h.ocr(|| Ok(OcrResult::from_text(r"\frac{1}{2"))),
        Box::new(LatexRenderer::with_output_dir(h.renders_dir(), 300)),
        h.dispatcher(),
    );

    let outcome = orch.run();
    assert_eq!(outcome.status, OutcomeStatus::RenderFailed);
    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.artifact.is_none());
    assert!(outcome.detail.as_deref().unwrap().contains("Unbalanced braces"));
    assert_eq!(*h.copied.borrow(), vec![r"\frac{1}{2"]);
    assert_eq!(orch.state(), PipelineState::Aborted(AbortReason::RenderError));
    assert_eq!(h.render_count(), 0);
}

#[test]
fn test_cancel_exits_cleanly_without_artifact() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        Box::new(CancelledCapture),
        h.ocr(|| Ok(OcrResult::from_text("$x$"))),
        h.fake_renderer(),
        h.dispatcher(),
    );

    let outcome = orch.run();
    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.artifact.is_none());
    assert_eq!(h.ocr_calls.get(), 0);
    assert_eq!(h.render_calls.get(), 0);
    assert_eq!(h.render_count(), 0);
    assert_eq!(h.outcomes.borrow().len(), 1);
}

#[test]
fn test_empty_text_never_renders() {
    for reply in [
        (|| Ok(OcrResult::from_text(""))) as fn() -> Result<OcrResult, OcrError>,
        || Ok(OcrResult::from_text("  \n\t  ")),
    ] {
        let h = Harness::new();
        let mut orch = Orchestrator::new(h.capture(), h.ocr(reply), h.fake_renderer(), h.dispatcher());

        let outcome = orch.run();
        assert_eq!(outcome.status, OutcomeStatus::CapturedNoText);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(h.ocr_calls.get(), 1);
        assert_eq!(h.render_calls.get(), 0);
        assert!(h.copied.borrow().is_empty());
        assert_eq!(orch.state(), PipelineState::Aborted(AbortReason::NoText));
    }
}

#[test]
fn test_existing_image_survives_the_run() {
    let h = Harness::new();
    let mut orch = Orchestrator::new(
        h.capture(),
        h.ocr(|| Ok(OcrResult::from_text("words"))),
        h.fake_renderer(),
        h.dispatcher(),
    );
    orch.run();
    assert!(h.dir.path().join("shot.png").exists());
}
