//! Lifecycle state machine and the registry status mapping table.
//!
//! Two orderings live here and must stay separate:
//! - [`LifecycleStatus::stage`] drives merge decisions (transition validity);
//! - [`LifecycleStatus::display_priority`] only sorts listings for humans.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use einvoice_core::DomainError;

/// Locally owned, authoritative status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Submitted,
    Received,
    Validated,
    ValidationFailed,
    Accepted,
    Rejected,
    Sent,
    Failed,
    Cancelled,
}

impl LifecycleStatus {
    pub const ALL: [LifecycleStatus; 10] = [
        LifecycleStatus::Draft,
        LifecycleStatus::Submitted,
        LifecycleStatus::Received,
        LifecycleStatus::Validated,
        LifecycleStatus::ValidationFailed,
        LifecycleStatus::Accepted,
        LifecycleStatus::Rejected,
        LifecycleStatus::Sent,
        LifecycleStatus::Failed,
        LifecycleStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Submitted => "submitted",
            LifecycleStatus::Received => "received",
            LifecycleStatus::Validated => "validated",
            LifecycleStatus::ValidationFailed => "validation_failed",
            LifecycleStatus::Accepted => "accepted",
            LifecycleStatus::Rejected => "rejected",
            LifecycleStatus::Sent => "sent",
            LifecycleStatus::Failed => "failed",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }

    /// Position along the registry path. `failed` and `cancelled` sit off the
    /// path and are absorbing.
    pub fn stage(self) -> u8 {
        match self {
            LifecycleStatus::Draft | LifecycleStatus::Failed | LifecycleStatus::Cancelled => 0,
            LifecycleStatus::Submitted | LifecycleStatus::Received => 1,
            LifecycleStatus::Validated | LifecycleStatus::ValidationFailed => 2,
            LifecycleStatus::Accepted | LifecycleStatus::Rejected => 3,
            LifecycleStatus::Sent => 4,
        }
    }

    /// No transition leaves these states.
    pub fn is_absorbing(self) -> bool {
        matches!(
            self,
            LifecycleStatus::Failed
                | LifecycleStatus::Cancelled
                | LifecycleStatus::ValidationFailed
                | LifecycleStatus::Rejected
                | LifecycleStatus::Sent
        )
    }

    /// Statuses the poller keeps asking the registry about.
    ///
    /// `accepted` is excluded: the only mapped move out of it would be
    /// `delivered`, which the mapping applies to `submitted` invoices only.
    pub fn needs_tracking(self) -> bool {
        matches!(
            self,
            LifecycleStatus::Submitted | LifecycleStatus::Received | LifecycleStatus::Validated
        )
    }

    /// Whether a registry-reported move from `self` to `target` is legal.
    ///
    /// Moves are forward-only along [`stage`](Self::stage); same-stage siblings
    /// (e.g. `accepted` vs `rejected`) never replace each other, which makes
    /// merging independent of arrival order.
    pub fn can_transition_to(self, target: LifecycleStatus) -> bool {
        if self == target || self.is_absorbing() {
            return false;
        }
        match target {
            LifecycleStatus::Draft | LifecycleStatus::Received => false,
            LifecycleStatus::Failed | LifecycleStatus::Cancelled => {
                matches!(self, LifecycleStatus::Draft | LifecycleStatus::Submitted)
            }
            _ => self != LifecycleStatus::Draft && target.stage() > self.stage(),
        }
    }

    /// Urgency for a human reader (higher first). Not used for merging.
    pub fn display_priority(self) -> u8 {
        match self {
            LifecycleStatus::Failed
            | LifecycleStatus::Rejected
            | LifecycleStatus::ValidationFailed => 10,
            LifecycleStatus::Received => 9,
            LifecycleStatus::Draft => 8,
            LifecycleStatus::Submitted => 7,
            LifecycleStatus::Validated => 5,
            LifecycleStatus::Sent | LifecycleStatus::Accepted => 2,
            LifecycleStatus::Cancelled => 1,
        }
    }
}

impl core::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_status(s);
        LifecycleStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown lifecycle status: {s}")))
    }
}

/// Result of looking up a raw registry status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedStatus {
    /// The string maps to this lifecycle status.
    Target(LifecycleStatus),
    /// Known string, but it carries no meaning for the current status.
    NotApplicable,
    /// Not in the table.
    Unrecognized,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    To(LifecycleStatus),
    WhileCurrent {
        current: LifecycleStatus,
        target: LifecycleStatus,
    },
}

/// The one place registry status strings are interpreted.
const STATUS_TABLE: &[(&str, Rule)] = &[
    ("validated", Rule::To(LifecycleStatus::Validated)),
    ("valid", Rule::To(LifecycleStatus::Validated)),
    ("validation_failed", Rule::To(LifecycleStatus::ValidationFailed)),
    ("invalid", Rule::To(LifecycleStatus::ValidationFailed)),
    ("rejected", Rule::To(LifecycleStatus::Rejected)),
    ("accepted", Rule::To(LifecycleStatus::Accepted)),
    ("processing", Rule::To(LifecycleStatus::Submitted)),
    ("pending", Rule::To(LifecycleStatus::Submitted)),
    (
        "delivered",
        Rule::WhileCurrent {
            current: LifecycleStatus::Submitted,
            target: LifecycleStatus::Sent,
        },
    ),
];

/// Case-fold and unify separators: `"Validation Failed"` -> `"validation_failed"`.
pub fn normalize_status(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Map a raw registry status to a lifecycle target given the current status.
pub fn map_registry_status(raw: &str, current: LifecycleStatus) -> MappedStatus {
    let key = normalize_status(raw);
    match STATUS_TABLE.iter().find(|(name, _)| *name == key) {
        None => MappedStatus::Unrecognized,
        Some((_, Rule::To(target))) => MappedStatus::Target(*target),
        Some((_, Rule::WhileCurrent { current: when, target })) => {
            if *when == current {
                MappedStatus::Target(*target)
            } else {
                MappedStatus::NotApplicable
            }
        }
    }
}
