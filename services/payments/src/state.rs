use std::sync::Arc;

use sea_orm::DatabaseConnection;

use payflow_core::clock::Clock;

use crate::config::EngineSettings;
use crate::infra::db::{
    DbAttemptRepository, DbIntentRepository, DbOrderRepository, DbPaymentRepository,
    DbRefundRepository, DbWebhookEventRepository,
};
use crate::infra::ledger::DbEventProcessor;
use crate::infra::provider::ProviderRegistry;
use crate::usecase::event_store::EventStore;

/// Shared service state, built once at startup and handed to every handler
/// via axum `State` and to every background job.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub providers: ProviderRegistry,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<EngineSettings>,
}

impl AppState {
    pub fn order_repo(&self) -> DbOrderRepository {
        DbOrderRepository {
            db: self.db.clone(),
        }
    }

    pub fn intent_repo(&self) -> DbIntentRepository {
        DbIntentRepository {
            db: self.db.clone(),
        }
    }

    pub fn payment_repo(&self) -> DbPaymentRepository {
        DbPaymentRepository {
            db: self.db.clone(),
        }
    }

    pub fn refund_repo(&self) -> DbRefundRepository {
        DbRefundRepository {
            db: self.db.clone(),
        }
    }

    pub fn attempt_repo(&self) -> DbAttemptRepository {
        DbAttemptRepository {
            db: self.db.clone(),
        }
    }

    pub fn webhook_event_repo(&self) -> DbWebhookEventRepository {
        DbWebhookEventRepository {
            db: self.db.clone(),
        }
    }

    pub fn event_processor(&self) -> DbEventProcessor {
        DbEventProcessor {
            db: self.db.clone(),
        }
    }

    pub fn event_store(&self) -> EventStore<DbWebhookEventRepository, DbEventProcessor> {
        EventStore {
            events: self.webhook_event_repo(),
            processor: self.event_processor(),
        }
    }
}
