//! Domain records shared across the monitoring core.

use chrono::{DateTime, Utc};
use refundwatch_model::{
    CaseId, CheckId, CheckResult, FilingStatus, PaymentMethod, Portal,
    RefundStatus, TriggerSource, UserId,
};
use serde::{Deserialize, Serialize};

use crate::domain::alarm::AlarmSettings;

/// Read model of a tax case, as the monitoring core sees it. The case itself
/// is owned by the case-management collaborator; the core reads these fields
/// and writes back only the per-track status, timestamp, and comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxCaseSnapshot {
    pub id: CaseId,
    pub owner: UserId,
    /// URL/path-safe client name, used for screenshot paths and logs.
    pub client_slug: String,
    pub tax_year: i32,
    pub payment_method: PaymentMethod,
    pub filing_status: FilingStatus,
    /// Two-letter work state; the state portal form requires it.
    pub work_state: Option<String>,
    /// AES-256-GCM sealed identifier (SSN-equivalent), base64.
    pub encrypted_identifier: Option<String>,
    pub federal: TrackState,
    pub state: TrackState,
    pub alarms: AlarmSettings,
}

impl TaxCaseSnapshot {
    pub fn track(&self, portal: Portal) -> &TrackState {
        match portal {
            Portal::Federal => &self.federal,
            Portal::State => &self.state,
        }
    }
}

/// Per-portal slice of a case: stored canonical status plus the refund
/// amounts the lookup forms are filled with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackState {
    pub status: Option<RefundStatus>,
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Refund amount from the filed return, whole dollars.
    pub actual_amount: Option<i64>,
    /// Pre-filing estimate, whole dollars.
    pub estimated_amount: Option<i64>,
}

/// One immutable record per automation attempt, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCheckRecord {
    pub id: CheckId,
    pub case_id: CaseId,
    pub portal: Portal,
    pub raw_status: String,
    pub details: String,
    pub screenshot_path: Option<String>,
    pub mapped_status: Option<RefundStatus>,
    pub previous_status: Option<RefundStatus>,
    pub status_changed: bool,
    pub result: CheckResult,
    pub triggered_by: TriggerSource,
    pub triggered_by_user: Option<UserId>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a refund check. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewRefundCheck {
    pub case_id: CaseId,
    pub portal: Portal,
    pub raw_status: String,
    pub details: String,
    pub screenshot_path: Option<String>,
    pub mapped_status: Option<RefundStatus>,
    pub previous_status: Option<RefundStatus>,
    pub status_changed: bool,
    pub result: CheckResult,
    pub triggered_by: TriggerSource,
    pub triggered_by_user: Option<UserId>,
    pub error_message: Option<String>,
}

/// Append-only audit entry, written in the same transaction as the case
/// status mutation it records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub case_id: CaseId,
    pub portal: Portal,
    pub previous_status: Option<RefundStatus>,
    pub new_status: RefundStatus,
    pub actor: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts surfaced by a batch run. Per-case failures stay inside
/// the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Result of one `run_check` invocation that got past validation.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub check: RefundCheckRecord,
    /// Whether the transactional status update ran (auto-apply portals only).
    pub applied: bool,
}
