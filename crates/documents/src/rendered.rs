use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256};

use einvoice_invoicing::DocumentKind;

/// Codec output bound to one invoice snapshot. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    kind: DocumentKind,
    code_number: String,
    xml: String,
}

impl RenderedDocument {
    pub(crate) fn new(kind: DocumentKind, code_number: String, xml: String) -> Self {
        Self {
            kind,
            code_number,
            xml,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// The invoice number carried as the document identifier.
    pub fn code_number(&self) -> &str {
        &self.code_number
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.xml.as_bytes()
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(self.xml.as_bytes())
    }

    /// Lowercase hex SHA-256 of the UTF-8 document.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(self.xml.as_bytes()))
    }
}
