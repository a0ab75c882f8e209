//! Staleness alarms derived from case status and elapsed time.
//!
//! Alarms are transient values recomputed on demand; nothing here touches
//! storage. Thresholds use strict `>` semantics: a status sitting at exactly
//! the threshold raises nothing, one day past it does.

use chrono::{DateTime, Utc};
use refundwatch_model::{Portal, RefundStatus};
use serde::{Deserialize, Serialize};

use crate::types::TaxCaseSnapshot;

pub const DEFAULT_FEDERAL_IN_PROCESS_DAYS: i64 = 25;
pub const DEFAULT_STATE_IN_PROCESS_DAYS: i64 = 50;
pub const DEFAULT_VERIFICATION_DAYS: i64 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    /// "In process" for so long that a silent verification hold is likely.
    PossibleVerificationFederal,
    PossibleVerificationState,
    /// An acknowledged verification hold has outlived the portal's own
    /// published processing window.
    VerificationOverdue,
}

/// Transient alarm value; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_type: AlarmType,
    pub severity: AlarmSeverity,
    pub track: Portal,
    pub message: String,
    pub days_since_status_change: i64,
    pub threshold: i64,
}

/// Per-case alarm configuration: optional threshold overrides plus
/// independent enable flags per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSettings {
    pub federal_enabled: bool,
    pub state_enabled: bool,
    pub federal_in_process_days: i64,
    pub state_in_process_days: i64,
    pub verification_days: i64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            federal_enabled: true,
            state_enabled: true,
            federal_in_process_days: DEFAULT_FEDERAL_IN_PROCESS_DAYS,
            state_in_process_days: DEFAULT_STATE_IN_PROCESS_DAYS,
            verification_days: DEFAULT_VERIFICATION_DAYS,
        }
    }
}

impl AlarmSettings {
    fn enabled(&self, track: Portal) -> bool {
        match track {
            Portal::Federal => self.federal_enabled,
            Portal::State => self.state_enabled,
        }
    }

    fn in_process_days(&self, track: Portal) -> i64 {
        match track {
            Portal::Federal => self.federal_in_process_days,
            Portal::State => self.state_in_process_days,
        }
    }
}

/// Evaluates both tracks of a case at `now` and returns every alarm that
/// fires. Disabling one track never suppresses the other.
pub fn evaluate_case(case: &TaxCaseSnapshot, now: DateTime<Utc>) -> Vec<Alarm> {
    let mut alarms = Vec::new();

    for track in [Portal::Federal, Portal::State] {
        if !case.alarms.enabled(track) {
            continue;
        }
        let state = case.track(track);
        let (Some(status), Some(changed_at)) =
            (state.status, state.status_changed_at)
        else {
            continue;
        };

        let days = days_since(changed_at, now);

        match status {
            RefundStatus::InProcess => {
                let threshold = case.alarms.in_process_days(track);
                if days > threshold {
                    alarms.push(Alarm {
                        alarm_type: match track {
                            Portal::Federal => {
                                AlarmType::PossibleVerificationFederal
                            }
                            Portal::State => {
                                AlarmType::PossibleVerificationState
                            }
                        },
                        severity: AlarmSeverity::Warning,
                        track,
                        message: format!(
                            "{} refund has been in process for {} days \
                             (threshold {})",
                            track, days, threshold
                        ),
                        days_since_status_change: days,
                        threshold,
                    });
                }
            }
            RefundStatus::InVerification => {
                let threshold = case.alarms.verification_days;
                if days > threshold {
                    alarms.push(Alarm {
                        alarm_type: AlarmType::VerificationOverdue,
                        severity: AlarmSeverity::Critical,
                        track,
                        message: format!(
                            "{} refund has been in verification for {} days \
                             (threshold {})",
                            track, days, threshold
                        ),
                        days_since_status_change: days,
                        threshold,
                    });
                }
            }
            _ => {}
        }
    }

    alarms
}

/// Aggregate severity for a case: critical beats warning beats none.
pub fn aggregate_severity(alarms: &[Alarm]) -> Option<AlarmSeverity> {
    if alarms
        .iter()
        .any(|a| a.severity == AlarmSeverity::Critical)
    {
        Some(AlarmSeverity::Critical)
    } else if alarms.is_empty() {
        None
    } else {
        Some(AlarmSeverity::Warning)
    }
}

/// Whole days elapsed, clamped at zero. A future `changed_at` (clock skew,
/// manual edits) must not produce a negative count.
fn days_since(changed_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - changed_at).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use refundwatch_model::{CaseId, FilingStatus, PaymentMethod, UserId};
    use uuid::Uuid;

    use crate::types::TrackState;

    fn case() -> TaxCaseSnapshot {
        TaxCaseSnapshot {
            id: CaseId::new(),
            owner: UserId(Uuid::now_v7()),
            client_slug: "doe-jane".into(),
            tax_year: 2025,
            payment_method: PaymentMethod::DirectDeposit,
            filing_status: FilingStatus::Single,
            work_state: Some("NY".into()),
            encrypted_identifier: None,
            federal: TrackState::default(),
            state: TrackState::default(),
            alarms: AlarmSettings::default(),
        }
    }

    fn stale(status: RefundStatus, days_ago: i64, now: DateTime<Utc>) -> TrackState {
        TrackState {
            status: Some(status),
            status_changed_at: Some(now - Duration::days(days_ago)),
            actual_amount: Some(2400),
            estimated_amount: None,
        }
    }

    #[test]
    fn exactly_at_threshold_is_quiet() {
        let now = Utc::now();
        let mut c = case();
        c.federal = stale(RefundStatus::InProcess, 25, now);
        assert!(evaluate_case(&c, now).is_empty());
    }

    #[test]
    fn one_day_past_threshold_fires_one_warning() {
        let now = Utc::now();
        let mut c = case();
        c.federal = stale(RefundStatus::InProcess, 26, now);

        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].severity, AlarmSeverity::Warning);
        assert_eq!(alarms[0].track, Portal::Federal);
        assert_eq!(alarms[0].days_since_status_change, 26);
        assert_eq!(alarms[0].threshold, 25);
    }

    #[test]
    fn federal_thirty_days_with_threshold_twenty_five() {
        let now = Utc::now();
        let mut c = case();
        c.federal = stale(RefundStatus::InProcess, 30, now);

        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 1);
        assert_eq!(
            alarms[0].alarm_type,
            AlarmType::PossibleVerificationFederal
        );
        assert_eq!(alarms[0].severity, AlarmSeverity::Warning);
        assert_eq!(alarms[0].track, Portal::Federal);
        assert_eq!(alarms[0].days_since_status_change, 30);
        assert_eq!(alarms[0].threshold, 25);
    }

    #[test]
    fn state_track_uses_its_own_threshold() {
        let now = Utc::now();
        let mut c = case();
        c.state = stale(RefundStatus::InProcess, 45, now);
        assert!(evaluate_case(&c, now).is_empty());

        c.state = stale(RefundStatus::InProcess, 51, now);
        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_type, AlarmType::PossibleVerificationState);
    }

    #[test]
    fn verification_overdue_is_critical_on_either_track() {
        let now = Utc::now();
        let mut c = case();
        c.federal = stale(RefundStatus::InVerification, 64, now);
        c.state = stale(RefundStatus::InVerification, 70, now);

        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 2);
        assert!(
            alarms
                .iter()
                .all(|a| a.severity == AlarmSeverity::Critical)
        );
        assert_eq!(aggregate_severity(&alarms), Some(AlarmSeverity::Critical));
    }

    #[test]
    fn disabling_federal_leaves_state_alarms_alone() {
        let now = Utc::now();
        let mut c = case();
        c.alarms.federal_enabled = false;
        c.federal = stale(RefundStatus::InProcess, 40, now);
        c.state = stale(RefundStatus::InProcess, 60, now);

        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].track, Portal::State);
    }

    #[test]
    fn per_case_override_moves_the_boundary() {
        let now = Utc::now();
        let mut c = case();
        c.alarms.federal_in_process_days = 10;
        c.federal = stale(RefundStatus::InProcess, 11, now);

        let alarms = evaluate_case(&c, now);
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].threshold, 10);
    }

    #[test]
    fn future_timestamp_clamps_to_zero_days() {
        // Clock skew regression: a changed-at in the future must read as
        // zero days old, not a negative count that can never alarm again.
        let now = Utc::now();
        let mut c = case();
        c.federal = TrackState {
            status: Some(RefundStatus::InProcess),
            status_changed_at: Some(now + Duration::days(3)),
            actual_amount: None,
            estimated_amount: None,
        };

        assert!(evaluate_case(&c, now).is_empty());
        assert_eq!(days_since(now + Duration::days(3), now), 0);
    }

    #[test]
    fn terminal_statuses_never_alarm() {
        let now = Utc::now();
        let mut c = case();
        c.federal = stale(RefundStatus::DepositInTransit, 400, now);
        c.state = stale(RefundStatus::CheckInTransit, 400, now);
        assert!(evaluate_case(&c, now).is_empty());
    }

    #[test]
    fn aggregate_severity_prefers_critical() {
        assert_eq!(aggregate_severity(&[]), None);

        let warning = Alarm {
            alarm_type: AlarmType::PossibleVerificationFederal,
            severity: AlarmSeverity::Warning,
            track: Portal::Federal,
            message: String::new(),
            days_since_status_change: 30,
            threshold: 25,
        };
        let critical = Alarm {
            alarm_type: AlarmType::VerificationOverdue,
            severity: AlarmSeverity::Critical,
            track: Portal::State,
            message: String::new(),
            days_since_status_change: 70,
            threshold: 63,
        };

        assert_eq!(
            aggregate_severity(&[warning.clone()]),
            Some(AlarmSeverity::Warning)
        );
        assert_eq!(
            aggregate_severity(&[warning, critical]),
            Some(AlarmSeverity::Critical)
        );
    }
}
