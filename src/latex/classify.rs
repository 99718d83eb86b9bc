//! Heuristic LaTeX math detection.
//!
//! Conservative: text only counts as math when a delimited span
//! carries a math signal, or when a well-known math command appears. Anything
//! doubtful is treated as plain text.

use std::ops::Range;

use super::{segments, Delimiter, Segment};

/// Commands that only make sense in math mode (or are overwhelmingly math).
const MATH_COMMANDS: &[&str] = &[
    "frac", "dfrac", "tfrac", "sqrt", "sum", "prod", "int", "iint", "iiint", "oint", "lim",
    "infty", "partial", "nabla", "cdot", "cdots", "ldots", "times", "div", "pm", "mp", "leq",
    "geq", "neq", "approx", "equiv", "sim", "propto", "subset", "subseteq", "in", "notin",
    "forall", "exists", "rightarrow", "Rightarrow", "mapsto", "alpha", "beta", "gamma", "delta",
    "epsilon", "varepsilon", "zeta", "eta", "theta", "iota", "kappa", "lambda", "mu", "nu", "xi",
    "pi", "rho", "sigma", "tau", "phi", "varphi", "chi", "psi", "omega", "Gamma", "Delta",
    "Theta", "Lambda", "Xi", "Pi", "Sigma", "Phi", "Psi", "Omega", "mathbb", "mathbf",
    "mathrm", "mathcal", "vec", "hat", "bar", "overline", "binom", "left", "right", "log", "ln",
    "sin", "cos", "tan", "exp",
];

/// Environments accepted after `\begin{`.
const MATH_ENVIRONMENTS: &[&str] = &[
    "equation", "equation*", "align", "align*", "gather", "gather*", "multline", "split",
    "cases", "matrix", "pmatrix", "bmatrix", "vmatrix", "array",
];

/// Operators that mark a delimited body as math rather than, say, currency.
const MATH_OPERATORS: &[char] = &['^', '_', '=', '<', '>', '+', '{', '}', '|', '/', '*'];

/// Where math was found. `delimiter` is `None` for bare commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathSpan {
    pub range: Range<usize>,
    pub delimiter: Option<Delimiter>,
}

impl MathSpan {
    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.range.clone()]
    }
}

/// Finds the next control word (`\name`) at or after `from`. Returns its byte range.
fn next_command(text: &str, from: usize) -> Option<Range<usize>> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let start = i + 1;
            let end = start
                + bytes[start..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphabetic())
                    .count();
            if end > start {
                return Some(i..end);
            }
            i = start + 1;
        } else {
            i += 1;
        }
    }
    None
}

fn command_is_math(text: &str, command: &Range<usize>) -> bool {
    let name = &text[command.start + 1..command.end];
    if name == "begin" {
        let rest = &text[command.end..];
        return rest
            .strip_prefix('{')
            .and_then(|r| r.split_once('}'))
            .is_some_and(|(env, _)| MATH_ENVIRONMENTS.contains(&env));
    }
    MATH_COMMANDS.contains(&name)
}

fn has_control_word(body: &str) -> bool {
    next_command(body, 0).is_some()
}

/// Whether a delimited body looks like math.
fn has_math_signal(body: &str) -> bool {
    let body = body.trim();
    if body.is_empty() {
        return false;
    }
    // A lone variable or digit: $x$, $n$, $2$
    let mut chars = body.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_alphanumeric() {
            return true;
        }
    }
    has_control_word(body) || body.contains(MATH_OPERATORS)
}

/// Returns the first span of text that looks like LaTeX math.
pub fn detect(text: &str) -> Option<MathSpan> {
    if text.trim().is_empty() {
        return None;
    }

    for segment in segments(text) {
        if let Segment::Math {
            delimiter,
            body,
            span,
        } = segment
        {
            if has_math_signal(body) {
                return Some(MathSpan {
                    range: span,
                    delimiter: Some(delimiter),
                });
            }
        }
    }

    let mut from = 0;
    while let Some(command) = next_command(text, from) {
        if command_is_math(text, &command) {
            return Some(MathSpan {
                range: command,
                delimiter: None,
            });
        }
        from = command.end;
    }
    None
}

/// Whether `text` contains renderable LaTeX math.
pub fn classify(text: &str) -> bool {
    detect(text).is_some()
}
