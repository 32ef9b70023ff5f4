//! Coverage summary parsing.
//!
//! The text-summary reporter of the unit test runner writes a short table
//! preceded by an empty line. Only one line of it matters here, the
//! statements line at index 2:
//!
//! ```text
//!
//! =============================== Coverage summary ===============================
//! Statements   : 92.5% ( 370/400 )
//! Branches     : 88.1% ( 141/160 )
//! ```

pub mod badge;

use std::fmt::Display;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoverageError;

/// Index of the summary line, counted after splitting on newlines.
pub const SUMMARY_LINE: usize = 2;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-ntqry=><~]))",
    )
    .expect("Error compiling ANSI pattern")
});

static NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\r|\n").expect("Error compiling newline pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Red,
}

impl Color {
    /// Green at or above the threshold, red below it.
    pub fn classify(value: f64, threshold: f64) -> Self {
        if value >= threshold {
            Color::Green
        } else {
            Color::Red
        }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Color::Green => "green",
            Color::Red => "red",
        })
    }
}

/// The percentage pulled out of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    /// As printed, e.g. `92.5%`.
    pub percentage: String,
    pub value: f64,
    pub color: Color,
}

pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI.replace_all(text, "")
}

/// Parses the summary out of a text report.
pub fn parse_summary(text: &str, threshold: f64) -> Result<CoverageSummary, CoverageError> {
    let text = strip_ansi(text);

    let line = NEWLINE
        .split(&text)
        .nth(SUMMARY_LINE)
        .ok_or(CoverageError::MissingLine(SUMMARY_LINE))?;

    // A line without a label is taken whole.
    let segment = line.split(':').nth(1).unwrap_or(line);

    let percentage = segment.split('(').next().unwrap_or(segment).trim();
    if percentage.is_empty() {
        return Err(CoverageError::MissingSegment(line.to_string()));
    }

    let number = numeric_prefix(percentage);
    let value: f64 = number
        .parse()
        .map_err(|_| CoverageError::Percentage(percentage.to_string()))?;

    Ok(CoverageSummary {
        percentage: percentage.to_string(),
        value,
        color: Color::classify(value, threshold),
    })
}

fn numeric_prefix(text: &str) -> &str {
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}
