//! Driver for the federal refund-lookup form.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use refundwatch_model::{FilingStatus, Portal};
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::infra::storage::{ObjectStore, screenshot_path};
use crate::portal::engine::BrowserLauncher;
use crate::portal::session::{FieldKind, FormField, PortalSession};
use crate::portal::{
    PortalAutomator, PortalCapture, PortalProbe, PortalRequest, PortalTuning,
};

const IDENTIFIER: &str = "input[name='ssn']";
const TAX_YEAR: &str = "select[name='taxYear']";
const FILING_STATUS: &str = "select[name='filingStatus']";
const AMOUNT: &str = "input[name='refundAmount']";
const SUBMIT: &str = "button[type='submit']";
/// Either panel counts as a result page; the extractor reads the wording.
const RESULT_PANELS: [&str; 3] = [
    "#refund-status",
    ".refund-status-panel",
    ".alert-error",
];

/// The federal form encodes filing status as a 1-based option value.
fn filing_status_option(status: FilingStatus) -> &'static str {
    match status {
        FilingStatus::Single => "1",
        FilingStatus::MarriedJoint => "2",
        FilingStatus::MarriedSeparate => "3",
        FilingStatus::HeadOfHousehold => "4",
    }
}

pub struct FederalPortal {
    launcher: Arc<BrowserLauncher>,
    store: Arc<dyn ObjectStore>,
    tuning: PortalTuning,
}

impl std::fmt::Debug for FederalPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederalPortal")
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl FederalPortal {
    pub fn new(
        launcher: Arc<BrowserLauncher>,
        store: Arc<dyn ObjectStore>,
        tuning: PortalTuning,
    ) -> Self {
        Self {
            launcher,
            store,
            tuning,
        }
    }

    fn fields(request: &PortalRequest) -> Vec<FormField> {
        vec![
            FormField {
                selector: IDENTIFIER,
                label: "identifier",
                value: request.identifier.to_string(),
                kind: FieldKind::Text,
            },
            FormField {
                selector: TAX_YEAR,
                label: "tax year",
                value: request.tax_year.to_string(),
                kind: FieldKind::Select,
            },
            FormField {
                selector: FILING_STATUS,
                label: "filing status",
                value: filing_status_option(request.filing_status)
                    .to_string(),
                kind: FieldKind::Select,
            },
            FormField {
                selector: AMOUNT,
                label: "refund amount",
                value: request.amount.to_string(),
                kind: FieldKind::Text,
            },
        ]
    }

    async fn drive(
        &self,
        session: &PortalSession,
        request: &PortalRequest,
    ) -> Result<PortalCapture> {
        session.warm_up().await?;

        let fields = Self::fields(request);
        for field in &fields {
            session.fill(field).await?;
        }
        session.verify_filled(&fields).await?;

        session.humanized_click(SUBMIT).await?;
        let panel = session.wait_for_any(&RESULT_PANELS).await?;
        debug!(panel, "federal result panel rendered");

        let page_text = session.page_text().await?;
        let (screenshot, screenshot_ref) = capture_screenshot(
            session,
            self.store.as_ref(),
            &request.client_slug,
            self.tuning.upload_timeout,
        )
        .await;

        Ok(PortalCapture {
            page_text,
            screenshot,
            screenshot_path: screenshot_ref,
        })
    }
}

#[async_trait]
impl PortalAutomator for FederalPortal {
    fn portal(&self) -> Portal {
        Portal::Federal
    }

    #[instrument(skip_all, fields(client = %request.client_slug))]
    async fn lookup(&self, request: &PortalRequest) -> PortalProbe {
        let session = match PortalSession::open(
            &self.launcher,
            &self.tuning.lookup_url,
            self.tuning.element_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => {
                return PortalProbe::error(format!(
                    "federal portal session failed to open: {err}"
                ));
            }
        };

        let outcome = tokio::time::timeout(
            self.tuning.attempt_timeout,
            self.drive(&session, request),
        )
        .await;

        // The session dies on every path, however far automation got.
        session.close().await;

        match outcome {
            Ok(Ok(capture)) => PortalProbe::captured(capture),
            Ok(Err(err)) => PortalProbe::error(err.to_string()),
            Err(_) => PortalProbe::timeout(format!(
                "federal lookup exceeded {}s",
                self.tuning.attempt_timeout.as_secs()
            )),
        }
    }
}

/// Captures and uploads the result screenshot. Upload failure (or overrun
/// of its own timeout) is logged and degrades to a check without a
/// screenshot reference.
pub(crate) async fn capture_screenshot(
    session: &PortalSession,
    store: &dyn ObjectStore,
    client_slug: &str,
    upload_timeout: Duration,
) -> (Option<Vec<u8>>, Option<String>) {
    let png = match session.screenshot_png().await {
        Ok(png) => png,
        Err(err) => {
            warn!(error = %err, "result screenshot capture failed");
            return (None, None);
        }
    };

    let path = screenshot_path(client_slug, Utc::now());
    let uploaded = tokio::time::timeout(
        upload_timeout,
        store.upload(&path, &png, "image/png"),
    )
    .await;

    match uploaded {
        Ok(Ok(())) => (Some(png), Some(path)),
        Ok(Err(err)) => {
            warn!(error = %err, path, "screenshot upload failed");
            (Some(png), None)
        }
        Err(_) => {
            warn!(path, "screenshot upload timed out");
            (Some(png), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filing_status_maps_to_form_options() {
        assert_eq!(filing_status_option(FilingStatus::Single), "1");
        assert_eq!(filing_status_option(FilingStatus::MarriedJoint), "2");
        assert_eq!(filing_status_option(FilingStatus::MarriedSeparate), "3");
        assert_eq!(filing_status_option(FilingStatus::HeadOfHousehold), "4");
    }
}
