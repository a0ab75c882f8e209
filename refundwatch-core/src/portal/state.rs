//! Driver for the state refund-lookup form.
//!
//! The state gateway is the more hostile of the two targets; its drivers
//! share the humanized session layer but keep their own selectors and a
//! work-state field the federal form does not have.

use std::sync::Arc;

use async_trait::async_trait;
use refundwatch_model::Portal;
use tracing::{debug, instrument};

use crate::error::{CoreError, Result};
use crate::infra::storage::ObjectStore;
use crate::portal::engine::BrowserLauncher;
use crate::portal::federal::capture_screenshot;
use crate::portal::session::{FieldKind, FormField, PortalSession};
use crate::portal::{
    PortalAutomator, PortalCapture, PortalProbe, PortalRequest, PortalTuning,
};

const WORK_STATE: &str = "select[name='state']";
const IDENTIFIER: &str = "input[name='taxpayerId']";
const TAX_YEAR: &str = "select[name='filingYear']";
const AMOUNT: &str = "input[name='claimedRefund']";
const SUBMIT: &str = "button#check-refund";
const RESULT_PANELS: [&str; 3] = [
    "#refund-result",
    ".lookup-outcome",
    ".lookup-error",
];

pub struct StatePortal {
    launcher: Arc<BrowserLauncher>,
    store: Arc<dyn ObjectStore>,
    tuning: PortalTuning,
}

impl std::fmt::Debug for StatePortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePortal")
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl StatePortal {
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

    fn fields(request: &PortalRequest) -> Result<Vec<FormField>> {
        let work_state = request.work_state.clone().ok_or_else(|| {
            CoreError::Internal(
                "state lookup reached the driver without a work state"
                    .to_string(),
            )
        })?;

        Ok(vec![
            FormField {
                selector: WORK_STATE,
                label: "work state",
                value: work_state,
                kind: FieldKind::Select,
            },
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
                selector: AMOUNT,
                label: "refund amount",
                value: request.amount.to_string(),
                kind: FieldKind::Text,
            },
        ])
    }

    async fn drive(
        &self,
        session: &PortalSession,
        request: &PortalRequest,
    ) -> Result<PortalCapture> {
        session.warm_up().await?;

        let fields = Self::fields(request)?;
        for field in &fields {
            session.fill(field).await?;
        }
        session.verify_filled(&fields).await?;

        session.humanized_click(SUBMIT).await?;
        let panel = session.wait_for_any(&RESULT_PANELS).await?;
        debug!(panel, "state result panel rendered");

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
impl PortalAutomator for StatePortal {
    fn portal(&self) -> Portal {
        Portal::State
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
                    "state portal session failed to open: {err}"
                ));
            }
        };

        let outcome = tokio::time::timeout(
            self.tuning.attempt_timeout,
            self.drive(&session, request),
        )
        .await;

        session.close().await;

        match outcome {
            Ok(Ok(capture)) => PortalProbe::captured(capture),
            Ok(Err(err)) => PortalProbe::error(err.to_string()),
            Err(_) => PortalProbe::timeout(format!(
                "state lookup exceeded {}s",
                self.tuning.attempt_timeout.as_secs()
            )),
        }
    }
}
