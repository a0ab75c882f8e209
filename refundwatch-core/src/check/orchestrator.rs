//! Check orchestration: validation, automation with retry, persistence,
//! and the conditional transactional status update.
//!
//! Per invocation the flow is validate → automate → extract → map →
//! persist → (maybe) apply. Faults never escape `run_check` beyond a
//! classified, persisted record except for precondition failures, which are
//! returned synchronously to the immediate caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use refundwatch_model::{
    CaseId, CheckId, CheckResult, Portal, RefundStatus, TriggerSource, UserId,
};
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::domain::extract::StatusExtractor;
use crate::domain::status_map::map_raw_status;
use crate::error::{CoreError, Result};
use crate::identity::IdentityCipher;
use crate::infra::notify::Notifier;
use crate::persistence::{RefundCheckStore, StatusChange, TaxCaseStore};
use crate::portal::{PortalAutomator, PortalRequest};
use crate::types::{
    BatchSummary, CheckOutcome, NewRefundCheck, RefundCheckRecord,
    TaxCaseSnapshot,
};

/// Actor recorded on machine-applied status changes.
const MONITOR_ACTOR: &str = "portal-monitor";

#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Fixed delay before the single retry of a faulted attempt.
    pub retry_delay: Duration,
    /// Delay between cases in a batch run. Sequential pacing keeps the
    /// session cadence away from anything that looks like a crawler.
    pub inter_case_delay: Duration,
    /// Federal results apply automatically.
    pub auto_apply_federal: bool,
    /// State results go through the human approval gate.
    pub auto_apply_state: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(15),
            inter_case_delay: Duration::from_secs(20),
            auto_apply_federal: true,
            auto_apply_state: false,
        }
    }
}

/// Process-local guard ensuring at most one batch run.
///
/// Not distributed: a multi-instance deployment must replace this with a
/// database lease to keep the at-most-one guarantee.
#[derive(Debug, Default)]
struct BatchGate {
    running: AtomicBool,
}

struct BatchPermit<'a> {
    gate: &'a BatchGate,
}

impl BatchGate {
    fn try_acquire(&self) -> Option<BatchPermit<'_>> {
        self.running
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| BatchPermit { gate: self })
    }
}

impl Drop for BatchPermit<'_> {
    /// Releases on every exit path, panics included, so a wedged run can
    /// never block future batches.
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

/// Result of one automate-and-extract attempt.
struct AttemptOutcome {
    result: CheckResult,
    raw_status: String,
    details: String,
    screenshot_path: Option<String>,
    error_message: Option<String>,
}

pub struct CheckOrchestrator {
    cases: Arc<dyn TaxCaseStore>,
    checks: Arc<dyn RefundCheckStore>,
    federal: Arc<dyn PortalAutomator>,
    state: Arc<dyn PortalAutomator>,
    extractor: StatusExtractor,
    notifier: Arc<dyn Notifier>,
    identity: Arc<IdentityCipher>,
    config: CheckConfig,
    batch_gate: BatchGate,
}

impl std::fmt::Debug for CheckOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CheckOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cases: Arc<dyn TaxCaseStore>,
        checks: Arc<dyn RefundCheckStore>,
        federal: Arc<dyn PortalAutomator>,
        state: Arc<dyn PortalAutomator>,
        extractor: StatusExtractor,
        notifier: Arc<dyn Notifier>,
        identity: Arc<IdentityCipher>,
        config: CheckConfig,
    ) -> Self {
        Self {
            cases,
            checks,
            federal,
            state,
            extractor,
            notifier,
            identity,
            config,
            batch_gate: BatchGate::default(),
        }
    }

    fn automator(&self, portal: Portal) -> &Arc<dyn PortalAutomator> {
        match portal {
            Portal::Federal => &self.federal,
            Portal::State => &self.state,
        }
    }

    fn auto_apply(&self, portal: Portal) -> bool {
        match portal {
            Portal::Federal => self.config.auto_apply_federal,
            Portal::State => self.config.auto_apply_state,
        }
    }

    /// Runs one check for one track of one case.
    #[instrument(skip(self), fields(portal = %portal, trigger = %trigger))]
    pub async fn run_check(
        &self,
        case_id: CaseId,
        portal: Portal,
        trigger: TriggerSource,
        actor: Option<UserId>,
    ) -> Result<CheckOutcome> {
        let case = self
            .cases
            .get_case(case_id)
            .await?
            .ok_or_else(|| CoreError::CaseNotFound(case_id.to_string()))?;

        let previous = case.track(portal).status;

        // Precondition gate: failures persist an error check and return
        // synchronously; the automator is never invoked.
        let request = match self.validate(&case, portal) {
            Ok(request) => request,
            Err(err) => {
                let message = err.to_string();
                self.persist_check(
                    &case,
                    portal,
                    AttemptOutcome {
                        result: CheckResult::Error,
                        raw_status: String::new(),
                        details: String::new(),
                        screenshot_path: None,
                        error_message: Some(message.clone()),
                    },
                    None,
                    previous,
                    false,
                    trigger,
                    actor,
                )
                .await?;
                return Err(CoreError::Precondition(message));
            }
        };

        // One attempt plus exactly one retry on a faulted classification.
        // An explicit not-found is a valid answer and is never retried.
        let mut attempt = self.attempt(portal, &request).await;
        if attempt.result.is_retryable() {
            warn!(
                case = %case_id,
                result = %attempt.result,
                error = ?attempt.error_message,
                "check attempt faulted, retrying once"
            );
            tokio::time::sleep(self.config.retry_delay).await;
            attempt = self.attempt(portal, &request).await;
        }

        let mapped = if attempt.result == CheckResult::Success {
            map_raw_status(&attempt.raw_status, case.payment_method)
        } else {
            None
        };
        // A change is proposed only for a recognized, different status; an
        // unrecognized phrase must never look like a change.
        let proposed = match mapped {
            Some(status) => previous != Some(status),
            None => false,
        };

        let check = self
            .persist_check(
                &case, portal, attempt, mapped, previous, proposed, trigger,
                actor,
            )
            .await?;

        let mut applied = false;
        if proposed
            && self.auto_apply(portal)
            && let Some(status) = mapped
        {
            self.apply_and_notify(&case, portal, previous, status, None)
                .await?;
            applied = true;
        }

        Ok(CheckOutcome { check, applied })
    }

    /// Batch entry point. At most one run at a time; a concurrent call
    /// returns an empty summary immediately instead of queueing.
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn run_all_checks(
        &self,
        trigger: TriggerSource,
    ) -> Result<BatchSummary> {
        let Some(_permit) = self.batch_gate.try_acquire() else {
            info!("batch run already active, skipping");
            return Ok(BatchSummary::default());
        };

        let cases = self.cases.eligible_cases().await?;
        info!(cases = cases.len(), "batch run starting");

        let mut summary = BatchSummary::default();
        let mut first = true;

        // Strictly sequential: concurrent sessions materially increase
        // detection risk on the portals.
        for case in &cases {
            if !first {
                tokio::time::sleep(self.config.inter_case_delay).await;
            }
            first = false;

            for portal in [Portal::Federal, Portal::State] {
                if !track_needs_check(case, portal) {
                    continue;
                }
                summary.total += 1;
                match self
                    .run_check(case.id, portal, trigger, None)
                    .await
                {
                    Ok(outcome)
                        if matches!(
                            outcome.check.result,
                            CheckResult::Success | CheckResult::NotFound
                        ) =>
                    {
                        summary.succeeded += 1;
                    }
                    Ok(_) => summary.failed += 1,
                    Err(err) => {
                        // Failing cases are logged and skipped, never fatal
                        // to the batch.
                        warn!(
                            case = %case.id,
                            portal = %portal,
                            error = %err,
                            "case check failed"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch run finished"
        );
        Ok(summary)
    }

    /// Applies a state-portal proposal: same transactional update the
    /// federal track gets automatically.
    #[instrument(skip(self))]
    pub async fn approve_check(
        &self,
        check_id: CheckId,
        actor: UserId,
    ) -> Result<()> {
        let check = self.load_proposal(check_id).await?;
        let status = check.mapped_status.ok_or_else(|| {
            CoreError::Precondition(format!(
                "check {check_id} has no mapped status to apply"
            ))
        })?;

        let case = self
            .cases
            .get_case(check.case_id)
            .await?
            .ok_or_else(|| {
                CoreError::CaseNotFound(check.case_id.to_string())
            })?;

        self.apply_and_notify(
            &case,
            check.portal,
            case.track(check.portal).status,
            status,
            Some(actor),
        )
        .await?;
        Ok(())
    }

    /// Dismisses a state-portal proposal: clears the flag, case untouched.
    #[instrument(skip(self))]
    pub async fn dismiss_check(
        &self,
        check_id: CheckId,
        actor: UserId,
    ) -> Result<()> {
        let check = self.load_proposal(check_id).await?;
        self.checks.resolve_proposal(check.id, false).await?;
        info!(
            check = %check.id,
            case = %check.case_id,
            actor = %actor,
            "state proposal dismissed"
        );
        Ok(())
    }

    async fn load_proposal(
        &self,
        check_id: CheckId,
    ) -> Result<RefundCheckRecord> {
        let check = self
            .checks
            .get(check_id)
            .await?
            .ok_or_else(|| CoreError::CheckNotFound(check_id.to_string()))?;
        if check.portal != Portal::State {
            return Err(CoreError::Precondition(format!(
                "check {check_id} is not a state-portal check"
            )));
        }
        if !check.status_changed {
            return Err(CoreError::Precondition(format!(
                "check {check_id} has no pending proposal"
            )));
        }
        Ok(check)
    }

    /// Amount resolution is portal-specific: the federal portal accepts the
    /// filed amount or, failing that, the pre-filing estimate; the state
    /// portal requires the filed amount and never falls back.
    fn validate(
        &self,
        case: &TaxCaseSnapshot,
        portal: Portal,
    ) -> Result<PortalRequest> {
        let sealed = case
            .encrypted_identifier
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                CoreError::Precondition(
                    "case has no identifier on file".to_string(),
                )
            })?;
        let identifier: Zeroizing<String> = self.identity.decrypt(sealed)?;
        if identifier.trim().is_empty() {
            return Err(CoreError::Precondition(
                "decrypted identifier is empty".to_string(),
            ));
        }

        let track = case.track(portal);
        let amount = match portal {
            Portal::Federal => {
                track.actual_amount.or(track.estimated_amount).ok_or_else(
                    || {
                        CoreError::Precondition(
                            "federal lookup needs a filed amount or an \
                             estimate"
                                .to_string(),
                        )
                    },
                )?
            }
            Portal::State => track.actual_amount.ok_or_else(|| {
                CoreError::Precondition(
                    "state lookup requires the filed refund amount; an \
                     estimate is not accepted"
                        .to_string(),
                )
            })?,
        };

        let work_state = match portal {
            Portal::State => Some(
                case.work_state
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        CoreError::Precondition(
                            "state lookup requires the work state"
                                .to_string(),
                        )
                    })?,
            ),
            Portal::Federal => case.work_state.clone(),
        };

        Ok(PortalRequest {
            identifier,
            amount,
            tax_year: case.tax_year,
            filing_status: case.filing_status,
            work_state,
            client_slug: case.client_slug.clone(),
        })
    }

    /// One automate-and-extract pass. Classification comes out of the
    /// automator for faults and out of the extractor for captured pages.
    async fn attempt(
        &self,
        portal: Portal,
        request: &PortalRequest,
    ) -> AttemptOutcome {
        let probe = self.automator(portal).lookup(request).await;

        let Some(capture) = probe.capture else {
            return AttemptOutcome {
                result: probe.result,
                raw_status: String::new(),
                details: String::new(),
                screenshot_path: None,
                error_message: probe.error_message,
            };
        };

        let extraction = self
            .extractor
            .extract(portal, capture.screenshot.as_deref(), &capture.page_text)
            .await;

        AttemptOutcome {
            result: extraction.result,
            raw_status: extraction.raw_status,
            details: extraction.details,
            screenshot_path: capture.screenshot_path,
            error_message: extraction.error_message,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_check(
        &self,
        case: &TaxCaseSnapshot,
        portal: Portal,
        attempt: AttemptOutcome,
        mapped: Option<RefundStatus>,
        previous: Option<RefundStatus>,
        status_changed: bool,
        trigger: TriggerSource,
        actor: Option<UserId>,
    ) -> Result<RefundCheckRecord> {
        self.checks
            .insert(NewRefundCheck {
                case_id: case.id,
                portal,
                raw_status: attempt.raw_status,
                details: attempt.details,
                screenshot_path: attempt.screenshot_path,
                mapped_status: mapped,
                previous_status: previous,
                status_changed,
                result: attempt.result,
                triggered_by: trigger,
                triggered_by_user: actor,
                error_message: attempt.error_message,
            })
            .await
    }

    /// The single-sourced transactional apply, shared by auto-apply and the
    /// approval gate. Notification fires after the commit; its failure is
    /// logged and never rolls anything back.
    async fn apply_and_notify(
        &self,
        case: &TaxCaseSnapshot,
        portal: Portal,
        previous: Option<RefundStatus>,
        status: RefundStatus,
        approved_by: Option<UserId>,
    ) -> Result<()> {
        let comment = match previous {
            Some(old) => format!(
                "{} portal reported {} (was {})",
                portal,
                status.label(),
                old.label()
            ),
            None => {
                format!("{} portal reported {}", portal, status.label())
            }
        };
        let actor = match approved_by {
            Some(user) => user.to_string(),
            None => MONITOR_ACTOR.to_string(),
        };

        self.cases
            .apply_status_change(&StatusChange {
                case_id: case.id,
                portal,
                previous,
                new_status: status,
                actor,
                comment: comment.clone(),
            })
            .await?;

        self.notifier
            .notify(
                case.owner,
                "refund_status",
                &format!("{} refund update", portal_title(portal)),
                &comment,
            )
            .await;
        Ok(())
    }
}

fn portal_title(portal: Portal) -> &'static str {
    match portal {
        Portal::Federal => "Federal",
        Portal::State => "State",
    }
}

/// In-transit statuses are terminal for monitoring purposes; everything
/// else (including an unchecked track) is still worth a lookup.
fn track_needs_check(case: &TaxCaseSnapshot, portal: Portal) -> bool {
    !matches!(
        case.track(portal).status,
        Some(RefundStatus::DepositInTransit)
            | Some(RefundStatus::CheckInTransit)
    )
}
