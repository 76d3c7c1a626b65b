//! Document codec and rule validator.
//!
//! `codec::render` turns an invoice snapshot plus the issuer profile into a
//! UBL 2.1 XML document; `validator::validate` checks a rendered document in
//! three phases (structure, schema framing, numbered business rules). Both are
//! pure functions of their inputs.

pub mod codec;
pub mod rendered;
pub mod validator;
mod markup;

#[cfg(test)]
pub(crate) mod fixtures;

pub use codec::{CodecError, NOT_APPLICABLE, render};
pub use rendered::RenderedDocument;
pub use validator::{Severity, ValidationIssue, ValidationResult, validate, validate_xml};
