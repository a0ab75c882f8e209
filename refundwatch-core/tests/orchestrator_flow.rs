//! End-to-end orchestrator behavior over in-memory collaborators: portal
//! preconditions, retry policy, the batch mutex, and the auto-apply versus
//! approval-gate split.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use refundwatch_model::{
    CaseId, CheckId, CheckResult, FilingStatus, PaymentMethod, Portal,
    RefundStatus, TriggerSource, UserId,
};
use uuid::Uuid;

use refundwatch_core::check::{CheckConfig, CheckOrchestrator};
use refundwatch_core::domain::alarm::AlarmSettings;
use refundwatch_core::domain::extract::StatusExtractor;
use refundwatch_core::error::{CoreError, Result};
use refundwatch_core::identity::IdentityCipher;
use refundwatch_core::infra::notify::Notifier;
use refundwatch_core::persistence::{
    CheckHistoryFilter, RefundCheckStore, StatusChange, TaxCaseStore,
};
use refundwatch_core::portal::{
    PortalAutomator, PortalCapture, PortalProbe, PortalRequest,
};
use refundwatch_core::types::{
    NewRefundCheck, RefundCheckRecord, TaxCaseSnapshot, TrackState,
};

const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

#[derive(Default)]
struct FakeCaseStore {
    cases: Mutex<HashMap<CaseId, TaxCaseSnapshot>>,
    applied: Mutex<Vec<StatusChange>>,
}

impl FakeCaseStore {
    fn put(&self, case: TaxCaseSnapshot) {
        self.cases.lock().unwrap().insert(case.id, case);
    }

    fn applied(&self) -> Vec<StatusChange> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaxCaseStore for FakeCaseStore {
    async fn eligible_cases(&self) -> Result<Vec<TaxCaseSnapshot>> {
        let mut cases: Vec<_> =
            self.cases.lock().unwrap().values().cloned().collect();
        cases.sort_by_key(|c| c.id);
        Ok(cases)
    }

    async fn get_case(&self, id: CaseId) -> Result<Option<TaxCaseSnapshot>> {
        Ok(self.cases.lock().unwrap().get(&id).cloned())
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<()> {
        let mut cases = self.cases.lock().unwrap();
        let case = cases.get_mut(&change.case_id).ok_or_else(|| {
            CoreError::CaseNotFound(change.case_id.to_string())
        })?;
        let track = match change.portal {
            Portal::Federal => &mut case.federal,
            Portal::State => &mut case.state,
        };
        track.status = Some(change.new_status);
        track.status_changed_at = Some(chrono::Utc::now());
        self.applied.lock().unwrap().push(change.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeCheckStore {
    rows: Mutex<Vec<RefundCheckRecord>>,
}

impl FakeCheckStore {
    fn rows(&self) -> Vec<RefundCheckRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefundCheckStore for FakeCheckStore {
    async fn insert(
        &self,
        check: NewRefundCheck,
    ) -> Result<RefundCheckRecord> {
        let record = RefundCheckRecord {
            id: CheckId::new(),
            case_id: check.case_id,
            portal: check.portal,
            raw_status: check.raw_status,
            details: check.details,
            screenshot_path: check.screenshot_path,
            mapped_status: check.mapped_status,
            previous_status: check.previous_status,
            status_changed: check.status_changed,
            result: check.result,
            triggered_by: check.triggered_by,
            triggered_by_user: check.triggered_by_user,
            error_message: check.error_message,
            created_at: chrono::Utc::now(),
        };
        self.rows.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: CheckId) -> Result<Option<RefundCheckRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn history(
        &self,
        _filter: CheckHistoryFilter,
        limit: i64,
        _offset: i64,
    ) -> Result<Vec<RefundCheckRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, _filter: CheckHistoryFilter) -> Result<i64> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }

    async fn resolve_proposal(
        &self,
        id: CheckId,
        status_changed: bool,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::CheckNotFound(id.to_string()))?;
        row.status_changed = status_changed;
        Ok(())
    }
}

/// What one scripted lookup should produce.
#[derive(Clone)]
enum ProbeScript {
    /// Result page with this rendered text.
    Page(&'static str),
    /// Result page, delivered after a delay (for overlap tests).
    SlowPage(&'static str, Duration),
    Fault(&'static str),
    Timeout,
}

struct ScriptedPortal {
    portal: Portal,
    script: Mutex<Vec<ProbeScript>>,
    calls: AtomicU32,
    last_amount: Mutex<Option<i64>>,
}

impl ScriptedPortal {
    /// Steps are consumed in order; the last one repeats.
    fn new(portal: Portal, steps: Vec<ProbeScript>) -> Self {
        Self {
            portal,
            script: Mutex::new(steps),
            calls: AtomicU32::new(0),
            last_amount: Mutex::new(None),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_amount(&self) -> Option<i64> {
        *self.last_amount.lock().unwrap()
    }
}

#[async_trait]
impl PortalAutomator for ScriptedPortal {
    fn portal(&self) -> Portal {
        self.portal
    }

    async fn lookup(&self, request: &PortalRequest) -> PortalProbe {
        *self.last_amount.lock().unwrap() = Some(request.amount);
        let step = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };
        self.calls.fetch_add(1, Ordering::SeqCst);

        match step {
            ProbeScript::Page(text) => PortalProbe::captured(PortalCapture {
                page_text: text.to_string(),
                screenshot: None,
                screenshot_path: None,
            }),
            ProbeScript::SlowPage(text, delay) => {
                tokio::time::sleep(delay).await;
                PortalProbe::captured(PortalCapture {
                    page_text: text.to_string(),
                    screenshot: None,
                    screenshot_path: None,
                })
            }
            ProbeScript::Fault(message) => PortalProbe::error(message),
            ProbeScript::Timeout => PortalProbe::timeout("attempt timed out"),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(UserId, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        category: &str,
        title: &str,
        _body: &str,
    ) {
        self.sent.lock().unwrap().push((
            user_id,
            category.to_string(),
            title.to_string(),
        ));
    }
}

struct Harness {
    cases: Arc<FakeCaseStore>,
    checks: Arc<FakeCheckStore>,
    federal: Arc<ScriptedPortal>,
    state: Arc<ScriptedPortal>,
    notifier: Arc<RecordingNotifier>,
    orchestrator: Arc<CheckOrchestrator>,
}

fn harness(
    federal_script: Vec<ProbeScript>,
    state_script: Vec<ProbeScript>,
) -> Harness {
    let cases = Arc::new(FakeCaseStore::default());
    let checks = Arc::new(FakeCheckStore::default());
    let federal =
        Arc::new(ScriptedPortal::new(Portal::Federal, federal_script));
    let state = Arc::new(ScriptedPortal::new(Portal::State, state_script));
    let notifier = Arc::new(RecordingNotifier::default());
    let identity = Arc::new(
        IdentityCipher::from_base64_key(TEST_KEY).expect("test key"),
    );

    let orchestrator = Arc::new(CheckOrchestrator::new(
        cases.clone(),
        checks.clone(),
        federal.clone(),
        state.clone(),
        StatusExtractor::new(None),
        notifier.clone(),
        identity,
        CheckConfig {
            retry_delay: Duration::from_millis(5),
            inter_case_delay: Duration::from_millis(1),
            auto_apply_federal: true,
            auto_apply_state: false,
        },
    ));

    Harness {
        cases,
        checks,
        federal,
        state,
        notifier,
        orchestrator,
    }
}

fn sealed_identifier() -> String {
    IdentityCipher::from_base64_key(TEST_KEY)
        .expect("test key")
        .encrypt("123-45-6789")
        .expect("seal identifier")
}

fn case(payment_method: PaymentMethod) -> TaxCaseSnapshot {
    TaxCaseSnapshot {
        id: CaseId::new(),
        owner: UserId(Uuid::now_v7()),
        client_slug: "doe-jane".into(),
        tax_year: 2025,
        payment_method,
        filing_status: FilingStatus::Single,
        work_state: Some("NY".into()),
        encrypted_identifier: Some(sealed_identifier()),
        federal: TrackState {
            status: Some(RefundStatus::InProcess),
            status_changed_at: Some(chrono::Utc::now()),
            actual_amount: Some(2400),
            estimated_amount: None,
        },
        state: TrackState {
            status: Some(RefundStatus::InProcess),
            status_changed_at: Some(chrono::Utc::now()),
            actual_amount: Some(900),
            estimated_amount: None,
        },
        alarms: AlarmSettings::default(),
    }
}

#[tokio::test]
async fn federal_accepts_estimate_when_actual_is_missing() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Processing")],
    );
    let mut c = case(PaymentMethod::DirectDeposit);
    c.federal.actual_amount = None;
    c.federal.estimated_amount = Some(1800);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Manual, None)
        .await
        .expect("validation should pass on the estimate");

    assert_eq!(h.federal.calls(), 1);
    // The form was filled with the estimate.
    assert_eq!(h.federal.last_amount(), Some(1800));
    assert_eq!(outcome.check.result, CheckResult::Success);
}

#[tokio::test]
async fn state_refuses_estimate_and_never_runs_automation() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Processing")],
    );
    let mut c = case(PaymentMethod::DirectDeposit);
    c.state.actual_amount = None;
    c.state.estimated_amount = Some(1800);
    let id = c.id;
    h.cases.put(c);

    let err = h
        .orchestrator
        .run_check(id, Portal::State, TriggerSource::Manual, None)
        .await
        .expect_err("state validation must fail without the filed amount");

    assert!(matches!(err, CoreError::Precondition(_)));
    assert_eq!(h.state.calls(), 0);

    // The failure is still persisted as an error check.
    let rows = h.checks.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].result, CheckResult::Error);
    assert!(rows[0].error_message.as_deref().unwrap_or("").contains("state"));
}

#[tokio::test]
async fn missing_identifier_is_a_precondition_failure() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Processing")],
    );
    let mut c = case(PaymentMethod::DirectDeposit);
    c.encrypted_identifier = None;
    let id = c.id;
    h.cases.put(c);

    let err = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Manual, None)
        .await
        .expect_err("no identifier, no automation");
    assert!(matches!(err, CoreError::Precondition(_)));
    assert_eq!(h.federal.calls(), 0);
}

#[tokio::test]
async fn fault_is_retried_exactly_once() {
    let h = harness(
        vec![
            ProbeScript::Fault("selector timeout"),
            ProbeScript::Page("Refund Approved"),
        ],
        vec![ProbeScript::Page("Processing")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Schedule, None)
        .await
        .expect("retry should recover");

    assert_eq!(h.federal.calls(), 2);
    assert_eq!(outcome.check.result, CheckResult::Success);
    // Exactly one persisted row: the final attempt supersedes.
    assert_eq!(h.checks.rows().len(), 1);
}

#[tokio::test]
async fn timeout_is_retried_then_persisted_as_timeout() {
    let h = harness(
        vec![ProbeScript::Timeout, ProbeScript::Timeout],
        vec![ProbeScript::Page("Processing")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Schedule, None)
        .await
        .expect("a timed-out check is still a persisted outcome");

    assert_eq!(h.federal.calls(), 2);
    assert_eq!(outcome.check.result, CheckResult::Timeout);
    assert!(!outcome.applied);
    assert!(h.cases.applied().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn not_found_is_accepted_without_retry() {
    let h = harness(
        vec![ProbeScript::Page(
            "We cannot provide any information about your refund.",
        )],
        vec![ProbeScript::Page("Processing")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Schedule, None)
        .await
        .expect("not-found is a valid answer");

    assert_eq!(h.federal.calls(), 1);
    assert_eq!(outcome.check.result, CheckResult::NotFound);
    assert!(outcome.check.mapped_status.is_none());
    assert!(!outcome.check.status_changed);
    assert!(h.cases.applied().is_empty());
}

#[tokio::test]
async fn refund_sent_with_check_payment_applies_and_notifies_once() {
    let h = harness(
        vec![ProbeScript::Page("Refund Sent. Your check was mailed.")],
        vec![ProbeScript::Page("Processing")],
    );
    let c = case(PaymentMethod::Check);
    let id = c.id;
    let owner = c.owner;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Schedule, None)
        .await
        .expect("check should succeed");

    assert_eq!(
        outcome.check.mapped_status,
        Some(RefundStatus::CheckInTransit)
    );
    assert_eq!(
        outcome.check.previous_status,
        Some(RefundStatus::InProcess)
    );
    assert!(outcome.check.status_changed);
    assert!(outcome.applied);

    // Exactly one history-producing apply and one notification.
    let applied = h.cases.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].new_status, RefundStatus::CheckInTransit);
    assert_eq!(applied[0].previous, Some(RefundStatus::InProcess));
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, owner);

    // The stored case now carries the new status.
    let updated = h.cases.get_case(id).await.unwrap().unwrap();
    assert_eq!(
        updated.federal.status,
        Some(RefundStatus::CheckInTransit)
    );
}

#[tokio::test]
async fn unchanged_status_is_persisted_without_apply() {
    let h = harness(
        vec![ProbeScript::Page("Your tax return is still being processed.")],
        vec![ProbeScript::Page("Processing")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::Federal, TriggerSource::Schedule, None)
        .await
        .expect("check should succeed");

    assert_eq!(outcome.check.mapped_status, Some(RefundStatus::InProcess));
    assert!(!outcome.check.status_changed);
    assert!(!outcome.applied);
    assert!(h.cases.applied().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn state_change_waits_for_approval() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Your refund has been approved.")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::State, TriggerSource::Schedule, None)
        .await
        .expect("state check should succeed");

    // Proposal recorded, nothing applied, nobody notified.
    assert!(outcome.check.status_changed);
    assert_eq!(
        outcome.check.mapped_status,
        Some(RefundStatus::DepositInTransit)
    );
    assert!(!outcome.applied);
    assert!(h.cases.applied().is_empty());
    assert!(h.notifier.sent().is_empty());

    // Approval applies the same transactional update.
    let admin = UserId(Uuid::now_v7());
    h.orchestrator
        .approve_check(outcome.check.id, admin)
        .await
        .expect("approve");

    let applied = h.cases.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].portal, Portal::State);
    assert_eq!(applied[0].actor, admin.to_string());
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn dismiss_clears_the_proposal_and_leaves_the_case_alone() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Your refund has been approved.")],
    );
    let c = case(PaymentMethod::DirectDeposit);
    let id = c.id;
    h.cases.put(c);

    let outcome = h
        .orchestrator
        .run_check(id, Portal::State, TriggerSource::Schedule, None)
        .await
        .expect("state check should succeed");

    let admin = UserId(Uuid::now_v7());
    h.orchestrator
        .dismiss_check(outcome.check.id, admin)
        .await
        .expect("dismiss");

    let stored = h
        .checks
        .get(outcome.check.id)
        .await
        .unwrap()
        .expect("check still exists");
    assert!(!stored.status_changed);
    assert!(h.cases.applied().is_empty());

    // A dismissed proposal cannot be approved afterwards.
    let err = h
        .orchestrator
        .approve_check(outcome.check.id, admin)
        .await
        .expect_err("no pending proposal after dismissal");
    assert!(matches!(err, CoreError::Precondition(_)));

    // The case keeps its old status.
    let unchanged = h.cases.get_case(id).await.unwrap().unwrap();
    assert_eq!(unchanged.state.status, Some(RefundStatus::InProcess));
}

#[tokio::test]
async fn overlapping_batch_runs_short_circuit() {
    let h = harness(
        vec![ProbeScript::SlowPage(
            "Return Received",
            Duration::from_millis(250),
        )],
        vec![ProbeScript::Page("Processing")],
    );
    h.cases.put(case(PaymentMethod::DirectDeposit));

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run_all_checks(TriggerSource::Schedule).await
        })
    };

    // Let the first run take the gate.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h
        .orchestrator
        .run_all_checks(TriggerSource::Manual)
        .await
        .expect("second call returns immediately");
    assert_eq!(second.total, 0);
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.failed, 0);

    let first = first.await.expect("join").expect("first run");
    assert_eq!(first.total, 2);

    // Gate released: a later run proceeds normally.
    let third = h
        .orchestrator
        .run_all_checks(TriggerSource::Manual)
        .await
        .expect("third run");
    assert!(third.total > 0);
}

#[tokio::test]
async fn batch_skips_failing_cases_and_reports_counts() {
    let h = harness(
        vec![ProbeScript::Page("Return Received")],
        vec![ProbeScript::Page("Processing")],
    );
    let good = case(PaymentMethod::DirectDeposit);
    let mut broken = case(PaymentMethod::DirectDeposit);
    broken.encrypted_identifier = None;
    h.cases.put(good);
    h.cases.put(broken);

    let summary = h
        .orchestrator
        .run_all_checks(TriggerSource::Schedule)
        .await
        .expect("batch completes despite the broken case");

    // Two portals per case: the good case succeeds twice, the broken case
    // fails validation twice.
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
}
