//! Browser-driven automation against the public refund-lookup portals.
//!
//! Layering: [`engine`] resolves which launch profile works on this host,
//! [`session`] wraps one humanized CDP session, and the per-portal drivers
//! ([`federal`], [`state`]) fill the lookup forms and capture result pages.
//! Drivers never panic and never leak a browser: every exit path closes the
//! session and every fault comes back as a classified [`PortalProbe`].

pub mod engine;
pub mod federal;
pub mod session;
pub mod state;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use refundwatch_model::{CheckResult, FilingStatus, Portal};
use zeroize::Zeroizing;

/// Everything a portal driver needs to run one lookup.
pub struct PortalRequest {
    /// Decrypted identifier (SSN-equivalent).
    pub identifier: Zeroizing<String>,
    /// Whole-dollar refund amount the form is filled with.
    pub amount: i64,
    pub tax_year: i32,
    pub filing_status: FilingStatus,
    /// Required by the state portal only.
    pub work_state: Option<String>,
    /// Used for the screenshot path.
    pub client_slug: String,
}

impl fmt::Debug for PortalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalRequest")
            .field("identifier", &"<redacted>")
            .field("amount", &self.amount)
            .field("tax_year", &self.tax_year)
            .field("filing_status", &self.filing_status)
            .field("work_state", &self.work_state)
            .field("client_slug", &self.client_slug)
            .finish()
    }
}

/// Raw result page, handed to the extractor.
#[derive(Debug, Clone, Default)]
pub struct PortalCapture {
    pub page_text: String,
    pub screenshot: Option<Vec<u8>>,
    /// Set when the screenshot upload succeeded.
    pub screenshot_path: Option<String>,
}

/// Classified outcome of one automation attempt. `result` here is either
/// `Success` (a result page was captured; the extractor decides between
/// success and not-found) or `Error`/`Timeout`.
#[derive(Debug)]
pub struct PortalProbe {
    pub capture: Option<PortalCapture>,
    pub result: CheckResult,
    pub error_message: Option<String>,
}

impl PortalProbe {
    pub fn captured(capture: PortalCapture) -> Self {
        Self {
            capture: Some(capture),
            result: CheckResult::Success,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            capture: None,
            result: CheckResult::Error,
            error_message: Some(message.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            capture: None,
            result: CheckResult::Timeout,
            error_message: Some(message.into()),
        }
    }
}

/// Wall-clock bounds and the target URL for one portal driver.
#[derive(Debug, Clone)]
pub struct PortalTuning {
    pub lookup_url: String,
    /// Bound on one full attempt (navigation through capture).
    pub attempt_timeout: Duration,
    /// Bound on waiting for any single element.
    pub element_timeout: Duration,
    /// Bound on the screenshot upload; overruns are non-fatal.
    pub upload_timeout: Duration,
}

impl PortalTuning {
    pub fn new(lookup_url: impl Into<String>) -> Self {
        Self {
            lookup_url: lookup_url.into(),
            attempt_timeout: Duration::from_secs(90),
            element_timeout: Duration::from_secs(20),
            upload_timeout: Duration::from_secs(10),
        }
    }
}

/// Port the orchestrator drives. One implementation per portal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortalAutomator: Send + Sync {
    fn portal(&self) -> Portal;

    /// Runs one lookup. Infallible by contract: every internal fault is
    /// converted into a classified probe.
    async fn lookup(&self, request: &PortalRequest) -> PortalProbe;
}
