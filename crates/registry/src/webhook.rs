//! Inbound webhook contract.
//!
//! The registry posts one JSON event per delivery. Event types outside the
//! known set deserialize to [`WebhookEventType::Unknown`] and are acknowledged
//! without effect.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Registry-Signature";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WebhookEventType {
    DocumentDelivered,
    DocumentReceived,
    DocumentStatusUpdated,
    EntityRevoked,
    DocumentValidated,
    DocumentValidationFailed,
    DocumentAccepted,
    DocumentRejected,
    Unknown(String),
}

impl WebhookEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::DocumentDelivered => "document.delivered",
            WebhookEventType::DocumentReceived => "document.received",
            WebhookEventType::DocumentStatusUpdated => "document.status_updated",
            WebhookEventType::EntityRevoked => "entity.revoked",
            WebhookEventType::DocumentValidated => "document.validated",
            WebhookEventType::DocumentValidationFailed => "document.validation_failed",
            WebhookEventType::DocumentAccepted => "document.accepted",
            WebhookEventType::DocumentRejected => "document.rejected",
            WebhookEventType::Unknown(other) => other,
        }
    }

    /// Types that report the status of a document we sent.
    pub fn carries_status(&self) -> bool {
        !matches!(
            self,
            WebhookEventType::DocumentReceived
                | WebhookEventType::EntityRevoked
                | WebhookEventType::Unknown(_)
        )
    }

    /// Status implied by the event type when the payload omits `status`.
    pub fn implied_status(&self) -> Option<&'static str> {
        match self {
            WebhookEventType::DocumentDelivered => Some("delivered"),
            WebhookEventType::DocumentValidated => Some("validated"),
            WebhookEventType::DocumentValidationFailed => Some("validation_failed"),
            WebhookEventType::DocumentAccepted => Some("accepted"),
            WebhookEventType::DocumentRejected => Some("rejected"),
            _ => None,
        }
    }
}

impl From<String> for WebhookEventType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document.delivered" => WebhookEventType::DocumentDelivered,
            "document.received" => WebhookEventType::DocumentReceived,
            "document.status_updated" => WebhookEventType::DocumentStatusUpdated,
            "entity.revoked" => WebhookEventType::EntityRevoked,
            "document.validated" => WebhookEventType::DocumentValidated,
            "document.validation_failed" => WebhookEventType::DocumentValidationFailed,
            "document.accepted" => WebhookEventType::DocumentAccepted,
            "document.rejected" => WebhookEventType::DocumentRejected,
            _ => WebhookEventType::Unknown(value),
        }
    }
}

impl From<WebhookEventType> for String {
    fn from(value: WebhookEventType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// Status to reconcile, or `None` when the event is not a status report.
    pub fn effective_status(&self) -> Option<&str> {
        if !self.event_type.carries_status() {
            return None;
        }
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.event_type.implied_status())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// `sha256=<hex>` signature of `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature header against the raw body in constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;
    let hex_part = header.strip_prefix(SIGNATURE_PREFIX).ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_part).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}
