//! Rule validator.
//!
//! Phases run in order: structural, schema framing, business rules. Only a
//! document that cannot be read at all stops the run early; every other
//! failure is accumulated so callers see all codes at once.

mod rules;
mod schema;
mod structural;

use serde::Serialize;

use einvoice_invoicing::DocumentKind;

use crate::rendered::RenderedDocument;

pub use rules::{RULES, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding, keyed by a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub(crate) fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_codes(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.code.clone()).collect()
    }

    /// All error lines joined, for failure details.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.push(issue);
        }
    }
}

/// Validate a rendered document against the framing of `kind`.
pub fn validate(document: &RenderedDocument, kind: DocumentKind) -> ValidationResult {
    validate_xml(document.xml(), kind)
}

/// Validate raw XML text. Never mutates its input.
pub fn validate_xml(xml: &str, kind: DocumentKind) -> ValidationResult {
    let mut result = ValidationResult::default();

    let root = match structural::check(xml) {
        Ok((root, issues)) => {
            result.extend(issues);
            root
        }
        Err(fatal) => {
            result.push(fatal);
            return result;
        }
    };

    result.extend(schema::check(&root, kind));
    result.extend(rules::check(&root, kind));
    result
}
