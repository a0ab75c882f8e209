//! Scheduled batch runs.

use std::sync::Arc;
use std::time::Duration;

use refundwatch_core::CheckOrchestrator;
use refundwatch_model::TriggerSource;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

/// Spawns the interval task driving scheduled batch runs. Returns `None`
/// when scheduling is disabled.
pub fn spawn(
    orchestrator: Arc<CheckOrchestrator>,
    interval_minutes: u64,
) -> Option<JoinHandle<()>> {
    if interval_minutes == 0 {
        info!("scheduled batch runs disabled");
        return None;
    }

    let period = Duration::from_secs(interval_minutes * 60);
    Some(tokio::spawn(async move {
        let mut tick = interval(period);
        // The first tick fires immediately; skip it so startup stays quiet.
        tick.tick().await;
        loop {
            tick.tick().await;
            match orchestrator.run_all_checks(TriggerSource::Schedule).await {
                Ok(summary) => {
                    info!(
                        total = summary.total,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        "scheduled batch run finished"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "scheduled batch run failed");
                }
            }
        }
    }))
}
