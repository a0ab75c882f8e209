//! Storage ports and their PostgreSQL implementations.

pub mod cases;
pub mod checks;

use async_trait::async_trait;
use refundwatch_model::{CaseId, CheckId, Portal, RefundStatus};

use crate::error::Result;
use crate::types::{NewRefundCheck, RefundCheckRecord, TaxCaseSnapshot};

/// One applied status mutation. The store must write the case fields and
/// the history row in the same transaction.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub case_id: CaseId,
    pub portal: Portal,
    pub previous: Option<RefundStatus>,
    pub new_status: RefundStatus,
    pub actor: String,
    pub comment: String,
}

/// Read/update access to tax cases. The case itself belongs to the
/// case-management collaborator; writes are limited to the per-track
/// status, timestamp, and comment fields.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaxCaseStore: Send + Sync {
    /// Cases with an identifier on file and at least one track still worth
    /// checking, ordered stably for sequential batch runs.
    async fn eligible_cases(&self) -> Result<Vec<TaxCaseSnapshot>>;

    async fn get_case(&self, id: CaseId) -> Result<Option<TaxCaseSnapshot>>;

    /// Applies the change and appends the matching history row atomically.
    async fn apply_status_change(&self, change: &StatusChange) -> Result<()>;
}

/// Query filter for the check history surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckHistoryFilter {
    pub case_id: Option<CaseId>,
    pub portal: Option<Portal>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RefundCheckStore: Send + Sync {
    async fn insert(&self, check: NewRefundCheck)
    -> Result<RefundCheckRecord>;

    async fn get(&self, id: CheckId) -> Result<Option<RefundCheckRecord>>;

    async fn history(
        &self,
        filter: CheckHistoryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RefundCheckRecord>>;

    async fn count(&self, filter: CheckHistoryFilter) -> Result<i64>;

    /// Clears (dismiss) or confirms (approve) a state-portal proposal flag.
    async fn resolve_proposal(
        &self,
        id: CheckId,
        status_changed: bool,
    ) -> Result<()>;
}
