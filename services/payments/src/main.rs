use std::sync::Arc;

use anyhow::Context as _;
use sea_orm::Database;
use tracing::info;

use payflow_core::clock::{Clock, SystemClock};
use payflow_core::config::Config;
use payflow_core::tracing::init_tracing;

use payflow_payments::config::PaymentsConfig;
use payflow_payments::infra::provider::ProviderRegistry;
use payflow_payments::infra::provider::reference::ReferenceProvider;
use payflow_payments::router::build_router;
use payflow_payments::state::AppState;
use payflow_payments::worker::spawn_jobs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = PaymentsConfig::try_from_env().context("failed to load configuration")?;

    let db = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reference = ReferenceProvider::new(config.reference_provider(), clock.clone());
    if !reference.is_configured() {
        info!("REFERENCE_WEBHOOK_SECRET unset; reference provider calls will fail with NOT_CONFIGURED");
    }

    let state = AppState {
        db,
        providers: ProviderRegistry::new(reference),
        clock,
        settings: Arc::new(config.engine_settings()),
    };

    let _jobs = spawn_jobs(state.clone(), config.job_intervals());

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.payments_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("payments service listening on {addr}");
    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
