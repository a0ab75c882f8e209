//! Shared data models for the Refundwatch platform.
//!
//! Everything here is plain data: typed ids and the enumerations shared
//! between the monitoring core and the admin surface. Behavior lives in
//! `refundwatch-core`.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a tax case (one client filing for one tax year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one persisted refund-check attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CheckId(pub Uuid);

impl CheckId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a platform user (case owner or admin actor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One of the two independent monitoring lanes. Each portal has its own
/// stored status, status-changed timestamp, and alarm thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Portal {
    Federal,
    State,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::Federal => "federal",
            Portal::State => "state",
        }
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Portal {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "federal" => Ok(Portal::Federal),
            "state" => Ok(Portal::State),
            other => Err(ParseEnumError::new("portal", other)),
        }
    }
}

/// Canonical refund-progress taxonomy. All portal-specific raw text maps
/// into one of these values (or into nothing at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RefundStatus {
    /// Return received, refund still being worked.
    InProcess,
    /// Identity or return verification is holding the refund.
    InVerification,
    /// Refund approved/sent and travelling by direct deposit.
    DepositInTransit,
    /// Refund approved/sent and travelling as a mailed check.
    CheckInTransit,
    /// The portal asked the filer to act (contact, more information).
    Issues,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::InProcess => "in_process",
            RefundStatus::InVerification => "in_verification",
            RefundStatus::DepositInTransit => "deposit_in_transit",
            RefundStatus::CheckInTransit => "check_in_transit",
            RefundStatus::Issues => "issues",
        }
    }

    /// Human label used in machine-generated comments and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            RefundStatus::InProcess => "In process",
            RefundStatus::InVerification => "In verification",
            RefundStatus::DepositInTransit => "Deposit in transit",
            RefundStatus::CheckInTransit => "Check in transit",
            RefundStatus::Issues => "Needs attention",
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_process" => Ok(RefundStatus::InProcess),
            "in_verification" => Ok(RefundStatus::InVerification),
            "deposit_in_transit" => Ok(RefundStatus::DepositInTransit),
            "check_in_transit" => Ok(RefundStatus::CheckInTransit),
            "issues" => Ok(RefundStatus::Issues),
            other => Err(ParseEnumError::new("refund status", other)),
        }
    }
}

/// How the client receives the refund. Resolves the ambiguous
/// "approved/sent" portal wording into the right in-transit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PaymentMethod {
    DirectDeposit,
    Check,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::DirectDeposit => "direct_deposit",
            PaymentMethod::Check => "check",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_deposit" => Ok(PaymentMethod::DirectDeposit),
            "check" => Ok(PaymentMethod::Check),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}

/// Filing status as submitted on the federal return; the federal lookup
/// form requires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FilingStatus {
    Single,
    MarriedJoint,
    MarriedSeparate,
    HeadOfHousehold,
}

impl FilingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingStatus::Single => "single",
            FilingStatus::MarriedJoint => "married_joint",
            FilingStatus::MarriedSeparate => "married_separate",
            FilingStatus::HeadOfHousehold => "head_of_household",
        }
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(FilingStatus::Single),
            "married_joint" => Ok(FilingStatus::MarriedJoint),
            "married_separate" => Ok(FilingStatus::MarriedSeparate),
            "head_of_household" => Ok(FilingStatus::HeadOfHousehold),
            other => Err(ParseEnumError::new("filing status", other)),
        }
    }
}

/// Outcome category of one automation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CheckResult {
    /// A status was extracted from the result page.
    Success,
    /// The portal explicitly reported no matching record.
    NotFound,
    /// Unexpected fault: selector timeout, navigation failure,
    /// structural mismatch, precondition failure.
    Error,
    /// The attempt exceeded its wall-clock bound.
    Timeout,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Success => "success",
            CheckResult::NotFound => "not_found",
            CheckResult::Error => "error",
            CheckResult::Timeout => "timeout",
        }
    }

    /// Faults worth one retry. An explicit negative answer is not a fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckResult::Error | CheckResult::Timeout)
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckResult {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckResult::Success),
            "not_found" => Ok(CheckResult::NotFound),
            "error" => Ok(CheckResult::Error),
            "timeout" => Ok(CheckResult::Timeout),
            other => Err(ParseEnumError::new("check result", other)),
        }
    }
}

/// What started a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TriggerSource {
    Manual,
    Schedule,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Schedule => "schedule",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "schedule" => Ok(TriggerSource::Schedule),
            other => Err(ParseEnumError::new("trigger source", other)),
        }
    }
}

/// Error returned when a persisted enum value no longer parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value `{}`", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_status_round_trips_through_str() {
        for status in [
            RefundStatus::InProcess,
            RefundStatus::InVerification,
            RefundStatus::DepositInTransit,
            RefundStatus::CheckInTransit,
            RefundStatus::Issues,
        ] {
            assert_eq!(status.as_str().parse::<RefundStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_persisted_value_is_an_error() {
        let err = "refund_pending".parse::<RefundStatus>().unwrap_err();
        assert!(err.to_string().contains("refund_pending"));
    }

    #[test]
    fn only_faults_are_retryable() {
        assert!(CheckResult::Error.is_retryable());
        assert!(CheckResult::Timeout.is_retryable());
        assert!(!CheckResult::Success.is_retryable());
        assert!(!CheckResult::NotFound.is_retryable());
    }
}
