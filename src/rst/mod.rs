//! A reStructuredText to HTML converter covering the constructs blog posts
//! actually use: sections, paragraphs, lists, literal blocks, block quotes,
//! hyperlinks and the `meta`, `code` and admonition directives.
//!
//! The output is a standalone HTML page shaped the way docutils shapes it: a
//! `<head>` with the title and one `<meta>` per `meta` field, and a
//! `<div class="document">` in which every section is a
//! `<div class="section">`.
//!
//! Problems are reported with a [`Severity`]. Anything at or above
//! [`Settings::halt_level`] aborts the conversion with a [`MarkupError`];
//! anything below is returned next to the HTML.

mod block;
mod inline;
mod writer;

use std::fmt;

use thiserror::Error;

/// Identifies this converter in the generated `<meta name="generator">` tag.
pub const GENERATOR: &str = concat!("pretext ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info = 1,
    Warning = 2,
    Error = 3,
    Severe = 4,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Severe => "SEVERE",
        };
        write!(f, "{}/{}", name, *self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// 1-based source line.
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: ({}) {}", self.line, self.severity, self.message)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{diagnostic}")]
pub struct MarkupError {
    pub diagnostic: Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Inline a default stylesheet into the page head.
    pub embed_stylesheet: bool,

    /// Lowest severity that aborts the conversion.
    pub halt_level: Severity,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            embed_stylesheet: false,
            halt_level: Severity::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub html: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Converts a reStructuredText `source` into a standalone HTML page.
pub fn publish(source: &str, settings: &Settings) -> Result<Published, MarkupError> {
    let mut reporter = Reporter::new(settings.halt_level);
    let document = block::parse(source, &mut reporter)?;
    let html = writer::write(&document, settings, &mut reporter)?;
    Ok(Published {
        html,
        diagnostics: reporter.diagnostics,
    })
}

pub(crate) struct Reporter {
    halt_level: Severity,
    diagnostics: Vec<Diagnostic>,
}

impl Reporter {
    fn new(halt_level: Severity) -> Self {
        Reporter {
            halt_level,
            diagnostics: Vec::new(),
        }
    }

    fn report(
        &mut self,
        severity: Severity,
        line: usize,
        message: impl Into<String>,
    ) -> Result<(), MarkupError> {
        let diagnostic = Diagnostic {
            severity,
            line,
            message: message.into(),
        };
        if severity >= self.halt_level {
            return Err(MarkupError { diagnostic });
        }
        self.diagnostics.push(diagnostic);
        Ok(())
    }

    pub(crate) fn info(&mut self, line: usize, message: impl Into<String>) -> Result<(), MarkupError> {
        self.report(Severity::Info, line, message)
    }

    pub(crate) fn warning(&mut self, line: usize, message: impl Into<String>) -> Result<(), MarkupError> {
        self.report(Severity::Warning, line, message)
    }

    pub(crate) fn error(&mut self, line: usize, message: impl Into<String>) -> Result<(), MarkupError> {
        self.report(Severity::Error, line, message)
    }

    pub(crate) fn severe(&mut self, line: usize, message: impl Into<String>) -> Result<(), MarkupError> {
        self.report(Severity::Severe, line, message)
    }
}
