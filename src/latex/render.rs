//! LaTeX to PNG rendering through the TeX toolchain (`latex` + `dvipng`).
//!
//! Renders are written to the configured output directory as
//! `latex_render_<YYYYMMDD_HHMMSS>.png` and are never overwritten or deleted.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{segments, Segment};
use crate::config::Config;

const LATEX: &str = "latex";
const DVIPNG: &str = "dvipng";
const JOB_NAME: &str = "render";
const FILE_PREFIX: &str = "latex_render_";
/// Attempts at finding a free second-resolution file name.
const MAX_NAME_ATTEMPTS: usize = 3;

const PREAMBLE: &str = r"\documentclass[12pt]{article}
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage{amsmath}
\usepackage{amssymb}
\pagestyle{empty}
\begin{document}
";
const POSTAMBLE: &str = "\n\\end{document}\n";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Nothing to render")]
    EmptySource,
    #[error("Unbalanced braces: {0}")]
    UnbalancedBraces(String),
    #[error("Output directory {path} is not writable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("`{0}` not found; install a TeX distribution (e.g. texlive with dvipng)")]
    BackendMissing(&'static str),
    #[error("LaTeX error: {0}")]
    Latex(String),
    #[error("dvipng failed: {0}")]
    Dvipng(String),
    #[error("No free file name in {0} after repeated attempts")]
    NameCollision(PathBuf),
    #[error("Render I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A rendered PNG. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderArtifact {
    pub source_latex: String,
    pub output_path: PathBuf,
    pub created_at: DateTime<Local>,
}

/// Typesets LaTeX source into a persisted image.
pub trait Render {
    fn render(&self, latex_source: &str) -> Result<RenderArtifact, RenderError>;
}

pub struct LatexRenderer {
    output_dir: PathBuf,
    dpi: u32,
}

impl LatexRenderer {
    pub fn new(config: &Config) -> Self {
        Self::with_output_dir(config.output_dir.clone(), config.dpi)
    }

    pub fn with_output_dir(output_dir: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            dpi,
        }
    }
}

/// `latex_render_20240131_235959.png`
pub fn render_file_name(at: &DateTime<Local>) -> String {
    format!("{FILE_PREFIX}{}.png", at.format("%Y%m%d_%H%M%S"))
}

/// Rejects sources whose unescaped `{`/`}` do not pair up.
fn check_braces(source: &str) -> Result<(), RenderError> {
    let bytes = source.as_bytes();
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => open.push(i),
            b'}' => {
                if open.pop().is_none() {
                    return Err(RenderError::UnbalancedBraces(format!(
                        "unexpected `}}` at byte {i}"
                    )));
                }
            }
            _ => {}
        }
        i += 1;
    }
    match open.last() {
        Some(pos) => Err(RenderError::UnbalancedBraces(format!(
            "`{{` at byte {pos} is never closed"
        ))),
        None => Ok(()),
    }
}

/// Environments that open display math themselves and must not be wrapped.
const DISPLAY_ENVIRONMENTS: &[&str] = &[
    "equation", "equation*", "align", "align*", "gather", "gather*", "multline", "multline*",
];

/// Escapes characters that are special to LaTeX in running text. Backslash
/// and braces are left alone so prose markup still works; a character that
/// is already escaped is copied as is.
fn escape_prose(prose: &str) -> String {
    let mut out = String::with_capacity(prose.len());
    let mut escaped = false;
    for c in prose.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '#' | '$' | '%' | '&' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes unescaped `chars` in a math fragment.
fn escape_in_math(fragment: &str, chars: &[char]) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut escaped = false;
    for c in fragment.chars() {
        if !escaped && chars.contains(&c) {
            out.push('\\');
        }
        escaped = !escaped && c == '\\';
        out.push(c);
    }
    out
}

fn starts_display_environment(fragment: &str) -> bool {
    fragment
        .strip_prefix("\\begin{")
        .and_then(|rest| rest.split_once('}'))
        .is_some_and(|(env, _)| DISPLAY_ENVIRONMENTS.contains(&env))
}

/// Builds the document body. Text that already has math delimiters keeps its
/// structure with prose escaped; a bare fragment is wrapped in display math
/// unless it opens a display environment of its own.
fn document_body(source: &str) -> String {
    let segs = segments(source);
    let has_delimited = segs.iter().any(|s| matches!(s, Segment::Math { .. }));
    if !has_delimited {
        let fragment = source.trim();
        // `&` is an alignment tab inside environments such as cases.
        let specials: &[char] = if fragment.contains("\\begin{") {
            &['%', '#']
        } else {
            &['%', '#', '&']
        };
        let fragment_tex = escape_in_math(fragment, specials);
        return if starts_display_environment(fragment) {
            fragment_tex
        } else {
            format!("\\[ {fragment_tex} \\]")
        };
    }

    segs.iter()
        .map(|segment| match segment {
            Segment::Prose(prose) => escape_prose(prose),
            Segment::Math { delimiter, body, .. } => {
                format!("{}{}{}", delimiter.open(), body, delimiter.close())
            }
        })
        .collect()
}

pub(crate) fn build_document(source: &str) -> String {
    format!("{PREAMBLE}{}{POSTAMBLE}", document_body(source))
}

/// Extracts the first `! ...` error and its `l.N` context line from TeX output.
fn latex_error_summary(log: &str) -> String {
    let mut lines = log.lines();
    while let Some(line) = lines.next() {
        if let Some(message) = line.strip_prefix("! ") {
            let context = lines
                .by_ref()
                .find(|l| l.starts_with("l."))
                .map(|l| format!(" ({})", l.trim()))
                .unwrap_or_default();
            return format!("{}{}", message.trim(), context);
        }
    }
    "latex exited with an error".to_string()
}

fn run_tool(program: &'static str, command: &mut Command) -> Result<std::process::Output, RenderError> {
    command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RenderError::BackendMissing(program)
            } else {
                RenderError::Io(e)
            }
        })
}

/// Makes sure the output directory exists and accepts new files.
fn ensure_output_dir(dir: &Path) -> Result<(), RenderError> {
    let output_error = |source| RenderError::OutputDir {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(output_error)?;
    tempfile::Builder::new()
        .prefix(".latexsnip-write-check-")
        .tempfile_in(dir)
        .map_err(output_error)?;
    Ok(())
}

/// Creates a new, empty file under a timestamped name without clobbering an
/// existing render. On a name clash waits for the next second and retries.
fn claim_output_file(dir: &Path) -> Result<(PathBuf, fs::File, DateTime<Local>), RenderError> {
    let mut last = dir.to_path_buf();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let now = Local::now();
        let path = dir.join(render_file_name(&now));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file, now)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let elapsed_ms = u64::from(now.nanosecond() / 1_000_000).min(999);
                debug!(path = %path.display(), "Render name taken, waiting for the next second");
                std::thread::sleep(Duration::from_millis(1000 - elapsed_ms));
                last = path;
            }
            Err(source) => {
                return Err(RenderError::OutputDir {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }
    Err(RenderError::NameCollision(last))
}

impl LatexRenderer {
    /// Runs latex and dvipng in `work_dir`, returning the PNG bytes.
    fn typeset(&self, work_dir: &Path, source: &str) -> Result<Vec<u8>, RenderError> {
        let tex_path = work_dir.join(format!("{JOB_NAME}.tex"));
        fs::write(&tex_path, build_document(source))?;

        let output = run_tool(
            LATEX,
            Command::new(LATEX)
                .current_dir(work_dir)
                .arg("-interaction=nonstopmode")
                .arg("-halt-on-error")
                .arg("-no-shell-escape")
                .arg(format!("-jobname={JOB_NAME}"))
                .arg(&tex_path),
        )?;
        if !output.status.success() {
            let log = fs::read_to_string(work_dir.join(format!("{JOB_NAME}.log")))
                .unwrap_or_else(|_| String::from_utf8_lossy(&output.stdout).into_owned());
            return Err(RenderError::Latex(latex_error_summary(&log)));
        }

        let png_path = work_dir.join(format!("{JOB_NAME}.png"));
        let output = run_tool(
            DVIPNG,
            Command::new(DVIPNG)
                .current_dir(work_dir)
                .arg("-q")
                .args(["-T", "tight"])
                .arg("-D")
                .arg(self.dpi.to_string())
                .args(["-l", "1"])
                .arg("-o")
                .arg(&png_path)
                .arg(format!("{JOB_NAME}.dvi")),
        )?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Dvipng(stderr.trim().to_string()));
        }

        Ok(fs::read(&png_path)?)
    }
}

impl Render for LatexRenderer {
    fn render(&self, latex_source: &str) -> Result<RenderArtifact, RenderError> {
        let source = latex_source.trim();
        if source.is_empty() {
            return Err(RenderError::EmptySource);
        }
        check_braces(source)?;
        ensure_output_dir(&self.output_dir)?;

        let work_dir = tempfile::Builder::new().prefix("latexsnip-tex-").tempdir()?;
        debug!(dir = %work_dir.path().display(), dpi = self.dpi, "Typesetting LaTeX");
        let png = self.typeset(work_dir.path(), source).inspect_err(|e| {
            warn!(error = %e, "LaTeX rendering failed");
        })?;

        let (output_path, mut file, created_at) = claim_output_file(&self.output_dir)?;
        if let Err(e) = file.write_all(&png).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&output_path);
            return Err(RenderError::Io(e));
        }

        info!(
            path = %output_path.display(),
            bytes = png.len(),
            "LaTeX render saved"
        );
        Ok(RenderArtifact {
            source_latex: source.to_string(),
            output_path,
            created_at,
        })
    }
}
