use std::sync::Arc;

use refundwatch_core::CheckOrchestrator;
use refundwatch_core::infra::storage::FsObjectStore;
use refundwatch_core::persistence::{RefundCheckStore, TaxCaseStore};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckOrchestrator>,
    pub cases: Arc<dyn TaxCaseStore>,
    pub checks: Arc<dyn RefundCheckStore>,
    pub storage: Arc<FsObjectStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
