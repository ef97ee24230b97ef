//! Background jobs sharing the process with the HTTP server.
//!
//! A single runner is assumed; there is no cross-process coordination.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::JobIntervals;
use crate::domain::provider::PaymentProvider;
use crate::error::PaymentServiceError;
use crate::state::AppState;
use crate::usecase::reconcile::{
    ExpireIntentsUseCase, JobReport, ReconcilePaymentsUseCase, ReplayEventsUseCase,
};
use crate::usecase::webhook::{ReceiveWebhookInput, ReceiveWebhookUseCase};

/// Reports of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationRun {
    pub replayed: JobReport,
    pub reconciled: JobReport,
    pub expired: JobReport,
}

/// Replay, reconcile and expiry in that order. A failing job is logged and
/// does not stop the others.
pub async fn run_reconciliation(state: &AppState) -> ReconciliationRun {
    let settings = &state.settings;

    let replay = ReplayEventsUseCase {
        store: state.event_store(),
        clock: state.clock.clone(),
        max_retries: settings.webhook_max_retries,
        stale_after: settings.stale_received_after,
        batch_size: settings.batch_size,
    };
    let reconcile = ReconcilePaymentsUseCase {
        payments: state.payment_repo(),
        intents: state.intent_repo(),
        store: state.event_store(),
        clock: state.clock.clone(),
        batch_size: settings.batch_size,
    };
    let expire = ExpireIntentsUseCase {
        intents: state.intent_repo(),
        providers: state.providers.clone(),
        clock: state.clock.clone(),
        expiry: settings.intent_expiry,
        batch_size: settings.batch_size,
    };

    ReconciliationRun {
        replayed: report_or_log("replay_events", replay.execute().await),
        reconciled: report_or_log("reconcile_payments", reconcile.execute().await),
        expired: report_or_log("expire_intents", expire.execute().await),
    }
}

fn report_or_log(job: &str, result: Result<JobReport, PaymentServiceError>) -> JobReport {
    result.unwrap_or_else(|e| {
        error!(job, error = %e.summary(), "reconciliation job failed");
        JobReport::default()
    })
}

/// Feed due reference-provider webhooks through the regular webhook path.
/// Returns how many were delivered.
pub async fn deliver_reference_webhooks(state: &AppState) -> Result<usize, PaymentServiceError> {
    let reference = state.providers.reference();
    let deliveries = reference.take_due();
    let usecase = ReceiveWebhookUseCase {
        providers: state.providers.clone(),
        store: state.event_store(),
        clock: state.clock.clone(),
    };

    let mut delivered = 0;
    for delivery in deliveries {
        match usecase
            .execute(ReceiveWebhookInput {
                provider: delivery.provider.as_str().to_owned(),
                payload: delivery.payload,
                signature: Some(delivery.signature),
            })
            .await
        {
            Ok(_) => delivered += 1,
            Err(e) => warn!(
                provider = %reference.kind(),
                error = %e.summary(),
                "reference webhook delivery failed"
            ),
        }
    }
    Ok(delivered)
}

/// Start the reconciliation and webhook delivery timers.
pub fn spawn_jobs(state: AppState, intervals: JobIntervals) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);

    let reconcile_state = state.clone();
    handles.push(spawn_every(intervals.reconcile, move || {
        let state = reconcile_state.clone();
        async move {
            run_reconciliation(&state).await;
        }
    }));

    if state.providers.reference().is_configured() {
        let delivery_state = state;
        handles.push(spawn_every(intervals.webhook_delivery, move || {
            let state = delivery_state.clone();
            async move {
                if let Err(e) = deliver_reference_webhooks(&state).await {
                    error!(error = %e.summary(), "reference webhook delivery aborted");
                }
            }
        }));
    } else {
        info!("reference provider not configured; webhook delivery job disabled");
    }

    handles
}

fn spawn_every<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}
