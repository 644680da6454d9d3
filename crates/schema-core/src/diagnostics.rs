//! Structured diagnostics collected over a whole compilation run.

use std::fmt;

use schema_xml::Location;
use serde::Serialize;
use tracing::trace;

use crate::error::{ErrorKind, SchemaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Advisory only, never blocks success.
    Warning,
    /// Semantic problem; the run fails but processing continues.
    Error,
    /// Structural problem; the offending subtree is discarded.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(text)
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Diagnostics sink shared by every parsing phase.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
    failed: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error returned by a parse or validation step.
    pub fn report(&mut self, err: SchemaError) {
        self.failed = true;
        if matches!(err.kind(), ErrorKind::AlreadyReported) {
            return;
        }
        trace!(location = %err.location(), error = %err, "diagnostic");
        self.records.push(Diagnostic {
            severity: err.severity(),
            location: err.location().clone(),
            message: err.to_string(),
        });
    }

    pub fn warn(&mut self, location: &Location, message: impl Into<String>) {
        self.records.push(Diagnostic {
            severity: Severity::Warning,
            location: location.clone(),
            message: message.into(),
        });
    }

    /// Forward the outcome of a step, keeping the value on success.
    pub fn check<T>(&mut self, result: Result<T, SchemaError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Treat every warning recorded so far as an error.
    pub fn promote_warnings(&mut self) {
        for record in &mut self.records {
            if record.severity == Severity::Warning {
                record.severity = Severity::Error;
                self.failed = true;
            }
        }
    }

    /// True once any error or fatal diagnostic was recorded.
    pub fn has_failures(&self) -> bool {
        self.failed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    /// Consume the sink, ordering records by document, line and column.
    ///
    /// `file_rank` gives the position of a file in the input order; the sort
    /// is stable so records at the same position keep their emission order.
    pub fn into_sorted(self, file_rank: impl Fn(&str) -> usize) -> Vec<Diagnostic> {
        let mut records = self.records;
        records.sort_by_key(|d| {
            (
                file_rank(&d.location.file),
                d.location.line,
                d.location.column,
            )
        });
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail() {
        let mut diags = Diagnostics::new();
        diags.warn(&Location::new("a.xml", 1, 1), "redundant attribute");
        assert!(!diags.has_failures());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn already_reported_marks_failure_silently() {
        let mut diags = Diagnostics::new();
        diags.report(SchemaError::already_reported(&Location::new("a.xml", 2, 1)));
        assert!(diags.has_failures());
        assert!(diags.is_empty());
    }

    #[test]
    fn sorted_by_file_rank_then_position() {
        let mut diags = Diagnostics::new();
        diags.warn(&Location::new("b.xml", 1, 1), "third");
        diags.warn(&Location::new("a.xml", 9, 2), "second");
        diags.warn(&Location::new("a.xml", 3, 7), "first");
        diags.warn(&Location::new("a.xml", 9, 2), "second-again");
        let order = ["a.xml", "b.xml"];
        let sorted = diags.into_sorted(|file| order.iter().position(|f| *f == file).unwrap_or(usize::MAX));
        let messages: Vec<_> = sorted.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "second-again", "third"]);
        assert_eq!(sorted[0].to_string(), "a.xml:3:7: warning: first");
    }
}
