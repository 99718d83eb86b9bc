//! LaTeX detection and rendering.
//!
//! [`segments`] splits OCR text into prose and delimited math. The classifier
//! uses it to decide whether text is worth typesetting, and the renderer uses
//! it to escape prose around the math.

mod classify;
mod render;

pub use classify::{classify, detect, MathSpan};
pub use render::{render_file_name, LatexRenderer, Render, RenderArtifact, RenderError};

use std::ops::Range;

/// Math-mode delimiter pairs recognized in text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `$...$`
    Dollar,
    /// `$$...$$`
    DoubleDollar,
    /// `\[...\]`
    Bracket,
    /// `\(...\)`
    Paren,
}

impl Delimiter {
    pub fn open(&self) -> &'static str {
        match self {
            Self::Dollar => "$",
            Self::DoubleDollar => "$$",
            Self::Bracket => "\\[",
            Self::Paren => "\\(",
        }
    }

    pub fn close(&self) -> &'static str {
        match self {
            Self::Dollar => "$",
            Self::DoubleDollar => "$$",
            Self::Bracket => "\\]",
            Self::Paren => "\\)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Prose(&'a str),
    Math {
        delimiter: Delimiter,
        body: &'a str,
        /// Byte range of the whole span, delimiters included.
        span: Range<usize>,
    },
}

/// Finds `needle` in `bytes` at or after `from`.
fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Finds the closing `$` of an inline span opened at `open`.
///
/// Follows the pandoc rule: the closing `$` has a non-space character before
/// it and no digit after it. Inline math never crosses a blank line, and the
/// first unescaped `$` ends the search: a body never contains a bare `$`.
fn find_inline_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut k = open + 1;
    while k < bytes.len() {
        match bytes[k] {
            b'\\' => k += 2,
            b'\n' if bytes.get(k + 1) == Some(&b'\n') => return None,
            b'$' => {
                let before_ok = !bytes[k - 1].is_ascii_whitespace();
                let after_ok = bytes.get(k + 1).map_or(true, |b| !b.is_ascii_digit());
                return (k > open + 1 && before_ok && after_ok).then_some(k);
            }
            _ => k += 1,
        }
    }
    None
}

fn push_math<'a>(
    out: &mut Vec<Segment<'a>>,
    text: &'a str,
    prose_start: usize,
    delimiter: Delimiter,
    body: Range<usize>,
    span: Range<usize>,
) {
    if span.start > prose_start {
        out.push(Segment::Prose(&text[prose_start..span.start]));
    }
    out.push(Segment::Math {
        delimiter,
        body: &text[body],
        span,
    });
}

/// Splits `text` into prose and delimited math, in order.
///
/// Escaped `\$` never opens math. Unclosed delimiters stay in prose.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut prose_start = 0;
    let mut i = 0;

    // All delimiters are ASCII, so every index sliced at is a char boundary.
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let (delimiter, close) = match bytes.get(i + 1) {
                    Some(b'[') => (Delimiter::Bracket, b"\\]"),
                    Some(b'(') => (Delimiter::Paren, b"\\)"),
                    _ => {
                        i += 2;
                        continue;
                    }
                };
                match find(bytes, i + 2, close) {
                    Some(j) => {
                        push_math(&mut out, text, prose_start, delimiter, i + 2..j, i..j + 2);
                        i = j + 2;
                        prose_start = i;
                    }
                    None => i += 2,
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => match find(bytes, i + 2, b"$$") {
                Some(j) if j > i + 2 => {
                    push_math(&mut out, text, prose_start, Delimiter::DoubleDollar, i + 2..j, i..j + 2);
                    i = j + 2;
                    prose_start = i;
                }
                _ => i += 2,
            },
            b'$' => {
                let opens = bytes.get(i + 1).is_some_and(|b| !b.is_ascii_whitespace());
                match opens.then(|| find_inline_close(bytes, i)).flatten() {
                    Some(j) => {
                        push_math(&mut out, text, prose_start, Delimiter::Dollar, i + 1..j, i..j + 1);
                        i = j + 1;
                        prose_start = i;
                    }
                    None => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    if prose_start < bytes.len() {
        out.push(Segment::Prose(&text[prose_start..]));
    }
    out
}
