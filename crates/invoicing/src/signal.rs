//! Status signals from the registry's webhook and polling channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::LifecycleStatus;

/// Channel a status signal arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Webhook,
    Poll,
}

impl SignalSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalSource::Webhook => "webhook",
            SignalSource::Poll => "poll",
        }
    }
}

/// One unit of status information. Consumed once, never stored as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSignal {
    pub external_document_id: String,
    pub reported_status: String,
    pub source: SignalSource,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl StatusSignal {
    pub fn new(
        external_document_id: impl Into<String>,
        reported_status: impl Into<String>,
        source: SignalSource,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_document_id: external_document_id.into(),
            reported_status: reported_status.into(),
            source,
            observed_at,
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, raw_payload: serde_json::Value) -> Self {
        self.raw_payload = raw_payload;
        self
    }
}

/// Why a signal left the invoice untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No local invoice carries this registry document id.
    UnknownDocument,
    /// The invoice has a different registry document id (or none yet).
    DocumentMismatch,
    /// Same status string already recorded from this channel.
    Duplicate,
    /// The status string is not in the mapping table.
    Unrecognized { status: String },
    /// Mapped (or not applicable), but not a legal forward move.
    NoTransition {
        current: LifecycleStatus,
        mapped: Option<LifecycleStatus>,
    },
}

/// Outcome of deciding a signal against the current invoice state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalDecision {
    Apply {
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
    Ignore(IgnoreReason),
}
