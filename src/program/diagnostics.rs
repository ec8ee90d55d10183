use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::SourceRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic in the source language's style: a short summary, an
/// optional longer detail, and an optional source range.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{summary}")]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: String::new(),
            subject: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_subject(mut self, subject: SourceRange) -> Self {
        self.subject = Some(subject);
        self
    }

    fn render(&self) -> String {
        let mut line = match self.severity {
            Severity::Error => format!("error: {}", self.summary),
            Severity::Warning => format!("warning: {}", self.summary),
        };
        if !self.detail.is_empty() {
            line.push_str(&format!("; {}", self.detail));
        }
        if let Some(ref subject) = self.subject {
            line.push_str(&format!(
                " ({}:{}:{})",
                subject.file, subject.line, subject.column
            ));
        }
        line
    }
}

/// A collection of diagnostics. Evaluation and binding steps accumulate
/// into one of these and surface it once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Diagnostics(vec![Diagnostic::error(summary)])
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ok(()) when no error-severity diagnostic was recorded.
    pub fn into_result(self) -> Result<(), Diagnostics> {
        if self.has_errors() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(Diagnostic::render).collect();
        write!(f, "{}", rendered.join("\n"))
    }
}

impl std::error::Error for Diagnostics {}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Diagnostics(vec![diagnostic])
    }
}
