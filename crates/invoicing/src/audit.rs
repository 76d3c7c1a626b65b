//! Audit vocabulary. Rows are append-only; the sink lives in infra.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use einvoice_core::TenantId;

use crate::invoice::InvoiceId;
use crate::status::LifecycleStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Submitted,
    SubmissionFailed,
    /// Submission attempt that ended without a state change (credential or transport).
    SubmissionDeferred,
    /// Registry accepted the document but the invoice could not be updated.
    AcceptedUnrecorded,
    Validated,
    ValidationFailed,
    Accepted,
    Rejected,
    Delivered,
    StatusReconciled,
    Cancelled,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Submitted => "submitted",
            AuditAction::SubmissionFailed => "submission_failed",
            AuditAction::SubmissionDeferred => "submission_deferred",
            AuditAction::AcceptedUnrecorded => "accepted_unrecorded",
            AuditAction::Validated => "validated",
            AuditAction::ValidationFailed => "validation_failed",
            AuditAction::Accepted => "accepted",
            AuditAction::Rejected => "rejected",
            AuditAction::Delivered => "delivered",
            AuditAction::StatusReconciled => "status_reconciled",
            AuditAction::Cancelled => "cancelled",
        }
    }

    pub fn for_reconciled_status(to: LifecycleStatus) -> Self {
        match to {
            LifecycleStatus::Validated => AuditAction::Validated,
            LifecycleStatus::ValidationFailed => AuditAction::ValidationFailed,
            LifecycleStatus::Accepted => AuditAction::Accepted,
            LifecycleStatus::Rejected => AuditAction::Rejected,
            LifecycleStatus::Sent => AuditAction::Delivered,
            _ => AuditAction::StatusReconciled,
        }
    }

    /// Transitions whose audit rows must never go missing unnoticed.
    pub fn is_high_value(self) -> bool {
        matches!(
            self,
            AuditAction::Submitted
                | AuditAction::SubmissionFailed
                | AuditAction::AcceptedUnrecorded
                | AuditAction::Accepted
                | AuditAction::Rejected
        )
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            AuditAction::Created,
            AuditAction::Submitted,
            AuditAction::SubmissionFailed,
            AuditAction::SubmissionDeferred,
            AuditAction::AcceptedUnrecorded,
            AuditAction::Validated,
            AuditAction::ValidationFailed,
            AuditAction::Accepted,
            AuditAction::Rejected,
            AuditAction::Delivered,
            AuditAction::StatusReconciled,
            AuditAction::Cancelled,
        ];
        all.into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown audit action: {s}"))
    }
}

/// Which path produced the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSource {
    Submission,
    Webhook,
    Poll,
    Api,
}

impl AuditSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditSource::Submission => "submission",
            AuditSource::Webhook => "webhook",
            AuditSource::Poll => "poll",
            AuditSource::Api => "api",
        }
    }
}

impl From<crate::signal::SignalSource> for AuditSource {
    fn from(source: crate::signal::SignalSource) -> Self {
        match source {
            crate::signal::SignalSource::Webhook => AuditSource::Webhook,
            crate::signal::SignalSource::Poll => AuditSource::Poll,
        }
    }
}

impl core::str::FromStr for AuditSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submission" => Ok(AuditSource::Submission),
            "webhook" => Ok(AuditSource::Webhook),
            "poll" => Ok(AuditSource::Poll),
            "api" => Ok(AuditSource::Api),
            other => Err(format!("unknown audit source: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub action: AuditAction,
    pub previous_status: Option<LifecycleStatus>,
    pub new_status: LifecycleStatus,
    pub source: AuditSource,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        action: AuditAction,
        previous_status: Option<LifecycleStatus>,
        new_status: LifecycleStatus,
        source: AuditSource,
        detail: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            invoice_id,
            action,
            previous_status,
            new_status,
            source,
            detail,
            created_at,
        }
    }
}
