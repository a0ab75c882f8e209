mod errors;
mod handlers;
mod infra;
mod routes;
mod scheduler;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use refundwatch_core::check::{CheckConfig, CheckOrchestrator};
use refundwatch_core::domain::extract::{StatusExtractor, VisionModel};
use refundwatch_core::identity::IdentityCipher;
use refundwatch_core::infra::notify::{
    Notifier, TracingNotifier, WebhookNotifier,
};
use refundwatch_core::infra::storage::FsObjectStore;
use refundwatch_core::infra::vision::{HttpVisionModel, VisionClientConfig};
use refundwatch_core::persistence::cases::PostgresTaxCaseStore;
use refundwatch_core::persistence::checks::PostgresRefundCheckStore;
use refundwatch_core::portal::engine::{BrowserLauncher, EngineProfile};
use refundwatch_core::portal::federal::FederalPortal;
use refundwatch_core::portal::state::StatePortal;
use refundwatch_core::portal::PortalTuning;

use crate::infra::config::{Config, ConfigLoader};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let load = ConfigLoader::new()
        .load()
        .context("configuration failed to load")?;
    for warning in &load.warnings.0 {
        warn!("config: {warning}");
    }
    let config = load.config;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await
        .context("database connection failed")?;
    sqlx::migrate!("../refundwatch-core/migrations")
        .run(&pool)
        .await
        .context("database migration failed")?;

    let state = build_state(&config, pool).await?;
    let app = routes::router(state.clone());

    scheduler::spawn(
        state.orchestrator.clone(),
        config.schedule.interval_minutes,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "refundwatch server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn build_state(config: &Config, pool: sqlx::PgPool) -> Result<AppState> {
    let cases = Arc::new(PostgresTaxCaseStore::new(pool.clone()));
    let checks = Arc::new(PostgresRefundCheckStore::new(pool));

    let identity = Arc::new(
        IdentityCipher::from_base64_key(&config.security.identifier_key)
            .context("identifier key rejected")?,
    );

    let storage = Arc::new(FsObjectStore::new(
        config.storage.root.clone(),
        config.storage.signing_key.as_bytes().to_vec(),
        config.server.public_base.clone(),
    ));

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(TracingNotifier),
    };

    let vision: Option<Arc<dyn VisionModel>> = match &config.vision {
        Some(v) => Some(Arc::new(
            HttpVisionModel::new(VisionClientConfig {
                endpoint: v.endpoint.clone(),
                api_key: v.api_key.clone(),
                model: v.model.clone(),
            })
            .context("vision client failed to build")?,
        )),
        None => None,
    };

    // Resolve the stealth/plain engine fallback once; sessions reuse it.
    let launcher = Arc::new(
        BrowserLauncher::resolve(EngineProfile::default_order())
            .await
            .context("no usable browser engine")?,
    );

    let federal_tuning = portal_tuning(config, &config.portals.federal_url);
    let state_tuning = portal_tuning(config, &config.portals.state_url);
    let federal = Arc::new(FederalPortal::new(
        launcher.clone(),
        storage.clone(),
        federal_tuning,
    ));
    let state_portal = Arc::new(StatePortal::new(
        launcher,
        storage.clone(),
        state_tuning,
    ));

    let orchestrator = Arc::new(CheckOrchestrator::new(
        cases.clone(),
        checks.clone(),
        federal,
        state_portal,
        StatusExtractor::new(vision),
        notifier,
        identity,
        CheckConfig {
            retry_delay: config.portals.retry_delay,
            inter_case_delay: config.portals.inter_case_delay,
            auto_apply_federal: true,
            auto_apply_state: config.portals.auto_apply_state,
        },
    ));

    Ok(AppState {
        orchestrator,
        cases,
        checks,
        storage,
    })
}

fn portal_tuning(config: &Config, url: &str) -> PortalTuning {
    let mut tuning = PortalTuning::new(url);
    tuning.attempt_timeout = config.portals.attempt_timeout;
    tuning.element_timeout = config.portals.element_timeout;
    tuning
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
