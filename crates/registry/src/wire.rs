//! JSON shapes exchanged with the registry. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use einvoice_invoicing::DocumentKind;

/// One document in a submission batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDocument {
    pub kind: DocumentKind,
    pub format: String,
    /// Base64 of the UTF-8 document.
    pub document: String,
    pub document_hash: String,
    pub code_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitRequest<'a> {
    pub documents: &'a [SubmissionDocument],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub submission_uid: Option<String>,
    #[serde(default)]
    pub valid_documents: Vec<AcceptedDocument>,
    #[serde(default)]
    pub failed_documents: Vec<RejectedDocument>,
}

impl SubmitResponse {
    pub fn is_empty(&self) -> bool {
        self.valid_documents.is_empty() && self.failed_documents.is_empty()
    }

    /// Entry accepted for `code_number`. Falls back to the only entry when the
    /// registry omits code numbers.
    pub fn accepted_for(&self, code_number: &str) -> Option<&AcceptedDocument> {
        find_entry(&self.valid_documents, code_number, |d| d.code_number.as_deref())
    }

    pub fn rejected_for(&self, code_number: &str) -> Option<&RejectedDocument> {
        find_entry(&self.failed_documents, code_number, |d| d.code_number.as_deref())
    }
}

fn find_entry<'a, T>(
    entries: &'a [T],
    code_number: &str,
    code: impl Fn(&T) -> Option<&str>,
) -> Option<&'a T> {
    entries
        .iter()
        .find(|e| code(e) == Some(code_number))
        .or_else(|| match entries {
            [only] if code(only).is_none() => Some(only),
            _ => None,
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedDocument {
    pub document_id: String,
    #[serde(default)]
    pub verification_link: Option<String>,
    #[serde(default)]
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub code_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedDocument {
    #[serde(default)]
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub code_number: Option<String>,
    pub error_message: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireDirection {
    #[serde(rename = "SEND")]
    Send,
    #[serde(rename = "RECEIVE")]
    Receive,
}

/// Full document detail. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    pub document_id: String,
    pub status: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub direction: Option<WireDirection>,
    #[serde(default)]
    pub code_number: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    #[serde(default)]
    pub documents: Vec<DocumentUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub document_id: String,
    pub updated_at: DateTime<Utc>,
    pub direction: WireDirection,
}
