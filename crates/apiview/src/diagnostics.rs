//! Non-fatal findings accumulated during a run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A translation unit (or one of its files) could not be parsed
    Frontend,
    /// A declaration could not be fully normalized
    Extraction,
    /// Two declarations share a qualified name but differ in signature
    MergeConflict,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticKind::Frontend => "frontend",
            DiagnosticKind::Extraction => "extraction",
            DiagnosticKind::MergeConflict => "merge-conflict",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub qualified_name: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            file: None,
            line: None,
            qualified_name: None,
            message: message.into(),
        }
    }

    /// Per-file front-end failure or warning.
    pub fn frontend(severity: Severity, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(severity, DiagnosticKind::Frontend, message).with_file(file)
    }

    /// A declaration recorded with a placeholder signature.
    pub fn extraction(
        location: &SourceLocation,
        qualified_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, DiagnosticKind::Extraction, message)
            .with_location(location)
            .with_qualified_name(qualified_name)
    }

    pub fn merge_conflict(
        location: &SourceLocation,
        qualified_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, DiagnosticKind::MergeConflict, message)
            .with_location(location)
            .with_qualified_name(qualified_name)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, location: &SourceLocation) -> Self {
        self.file = Some(location.file.clone());
        self.line = Some(location.line);
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_qualified_name(mut self, name: impl Into<String>) -> Self {
        self.qualified_name = Some(name.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.severity, self.kind)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " {file}:{line}:")?,
            (Some(file), None) => write!(f, " {file}:")?,
            _ => {}
        }
        if let Some(name) = &self.qualified_name {
            write!(f, " {name}:")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Drop repeated diagnostics, keeping the first occurrence of each.
///
/// A header shared by several translation units produces the same finding once
/// per unit.
pub fn dedup(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = std::collections::HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let diag = Diagnostic::merge_conflict(
            &SourceLocation::new("inc/c.hpp", 12),
            "N::C",
            "signature differs",
        );
        assert_eq!(
            diag.to_string(),
            "warning[merge-conflict] inc/c.hpp:12: N::C: signature differs"
        );
    }

    #[test]
    fn test_display_file_only() {
        let diag = Diagnostic::frontend(Severity::Error, "src/a.cpp", "file not found");
        assert_eq!(diag.to_string(), "error[frontend] src/a.cpp: file not found");
        assert!(diag.is_error());
    }

    #[test]
    fn test_dedup_preserves_first_order() {
        let a = Diagnostic::frontend(Severity::Warning, "a.hpp", "x");
        let b = Diagnostic::frontend(Severity::Warning, "b.hpp", "y");
        let out = dedup(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(out, vec![a, b]);
    }
}
