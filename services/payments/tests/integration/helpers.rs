use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    PaginatorTrait,
};

use payflow_core::clock::{Clock, ManualClock};
use payflow_domain::id::OrderId;
use payflow_domain::status::{OrderPaymentStatus, OrderStatus};
use payflow_payments::config::{EngineSettings, ReferenceProviderConfig};
use payflow_payments::domain::provider::{ProviderKind, Simulation};
use payflow_payments::domain::types::PaymentIntent;
use payflow_payments::infra::db::{
    DbAttemptRepository, DbIntentRepository, DbOrderRepository, DbPaymentRepository,
    DbRefundRepository, DbWebhookEventRepository,
};
use payflow_payments::infra::ledger::DbEventProcessor;
use payflow_payments::infra::provider::ProviderRegistry;
use payflow_payments::infra::provider::reference::ReferenceProvider;
use payflow_payments::state::AppState;
use payflow_payments::usecase::intent::{
    ConfirmIntentInput, ConfirmIntentUseCase, CreateIntentInput, CreateIntentUseCase,
};
use payflow_payments::usecase::reconcile::{
    ExpireIntentsUseCase, ReconcilePaymentsUseCase, ReplayEventsUseCase,
};
use payflow_payments::usecase::refund::RefundUseCase;
use payflow_payments::usecase::webhook::ReceiveWebhookUseCase;
use payflow_payments_migration::{Migrator, MigratorTrait};
use payflow_payments_schema::orders;

pub const SECRET: &str = "whsec_integration";
pub const WEBHOOK_DELAY_SECS: i64 = 2;

/// Engine wired to a fresh in-memory database and a manual clock.
pub struct TestEnv {
    pub state: AppState,
    pub clock: ManualClock,
}

pub async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_secret(Some(SECRET)).await
    }

    pub async fn with_secret(secret: Option<&str>) -> Self {
        let db = test_db().await;
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let reference = ReferenceProvider::new(
            ReferenceProviderConfig {
                webhook_secret: secret.map(str::to_owned),
                webhook_delay: chrono::Duration::seconds(WEBHOOK_DELAY_SECS),
                signature_tolerance: chrono::Duration::seconds(300),
            },
            Arc::new(clock.clone()),
        );
        let state = AppState {
            db,
            providers: ProviderRegistry::new(reference),
            clock: Arc::new(clock.clone()),
            settings: Arc::new(EngineSettings::default()),
        };
        Self { state, clock }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn reference(&self) -> &ReferenceProvider {
        self.state.providers.reference()
    }

    pub fn create_intent_uc(
        &self,
    ) -> CreateIntentUseCase<DbOrderRepository, DbIntentRepository, ProviderRegistry> {
        CreateIntentUseCase {
            orders: self.state.order_repo(),
            intents: self.state.intent_repo(),
            providers: self.state.providers.clone(),
            clock: self.state.clock.clone(),
        }
    }

    pub fn confirm_intent_uc(
        &self,
    ) -> ConfirmIntentUseCase<
        DbIntentRepository,
        DbAttemptRepository,
        ProviderRegistry,
        DbWebhookEventRepository,
        DbEventProcessor,
    > {
        ConfirmIntentUseCase {
            intents: self.state.intent_repo(),
            attempts: self.state.attempt_repo(),
            providers: self.state.providers.clone(),
            store: self.state.event_store(),
            clock: self.state.clock.clone(),
        }
    }

    pub fn refund_uc(
        &self,
    ) -> RefundUseCase<
        DbOrderRepository,
        DbPaymentRepository,
        DbRefundRepository,
        DbAttemptRepository,
        ProviderRegistry,
        DbWebhookEventRepository,
        DbEventProcessor,
    > {
        RefundUseCase {
            orders: self.state.order_repo(),
            payments: self.state.payment_repo(),
            refunds: self.state.refund_repo(),
            attempts: self.state.attempt_repo(),
            providers: self.state.providers.clone(),
            store: self.state.event_store(),
            clock: self.state.clock.clone(),
        }
    }

    pub fn receive_webhook_uc(
        &self,
    ) -> ReceiveWebhookUseCase<ProviderRegistry, DbWebhookEventRepository, DbEventProcessor> {
        ReceiveWebhookUseCase {
            providers: self.state.providers.clone(),
            store: self.state.event_store(),
            clock: self.state.clock.clone(),
        }
    }

    pub fn replay_uc(
        &self,
        max_retries: i32,
    ) -> ReplayEventsUseCase<DbWebhookEventRepository, DbEventProcessor> {
        ReplayEventsUseCase {
            store: self.state.event_store(),
            clock: self.state.clock.clone(),
            max_retries,
            stale_after: self.state.settings.stale_received_after,
            batch_size: 100,
        }
    }

    pub fn reconcile_uc(
        &self,
    ) -> ReconcilePaymentsUseCase<
        DbPaymentRepository,
        DbIntentRepository,
        DbWebhookEventRepository,
        DbEventProcessor,
    > {
        ReconcilePaymentsUseCase {
            payments: self.state.payment_repo(),
            intents: self.state.intent_repo(),
            store: self.state.event_store(),
            clock: self.state.clock.clone(),
            batch_size: 100,
        }
    }

    pub fn expire_uc(&self) -> ExpireIntentsUseCase<DbIntentRepository, ProviderRegistry> {
        ExpireIntentsUseCase {
            intents: self.state.intent_repo(),
            providers: self.state.providers.clone(),
            clock: self.state.clock.clone(),
            expiry: chrono::Duration::minutes(60),
            batch_size: 100,
        }
    }

    /// Insert an order awaiting payment.
    pub async fn seed_order(&self, amount: Decimal) -> OrderId {
        let id = OrderId::new();
        let now = self.clock.now();
        orders::ActiveModel {
            id: Set(id.0),
            amount: Set(amount),
            currency: Set("CNY".to_owned()),
            status: Set(OrderStatus::PendingPayment.as_str().to_owned()),
            payment_status: Set(OrderPaymentStatus::Unpaid.as_str().to_owned()),
            refund_status: Set(None),
            refund_amount: Set(None),
            refunded_at: Set(None),
            last_payment_status: Set(None),
            last_payment_error: Set(None),
            last_payment_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .unwrap();
        id
    }

    pub async fn order(&self, id: OrderId) -> orders::Model {
        orders::Entity::find_by_id(id.0)
            .one(self.db())
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn create_intent(&self, order_id: OrderId, amount: Decimal) -> PaymentIntent {
        self.create_intent_uc()
            .execute(CreateIntentInput {
                order_id,
                provider: ProviderKind::Reference,
                amount,
                currency: "CNY".to_owned(),
            })
            .await
            .unwrap()
    }

    pub async fn confirm(&self, intent: &PaymentIntent, simulate: Simulation) -> PaymentIntent {
        self.confirm_intent_uc()
            .execute(ConfirmIntentInput {
                intent_id: intent.id,
                payment_method: Some("pm_card_visa".to_owned()),
                simulate: Some(simulate),
            })
            .await
            .unwrap()
            .intent
    }

    /// Order paid through a synchronous success; returns the settled intent.
    pub async fn paid_order(&self, amount: Decimal) -> (OrderId, PaymentIntent) {
        let order_id = self.seed_order(amount).await;
        let intent = self.create_intent(order_id, amount).await;
        let intent = self.confirm(&intent, Simulation::Succeed).await;
        (order_id, intent)
    }

    /// Let every scheduled reference webhook fall due and deliver it.
    pub async fn flush_webhooks(&self) -> usize {
        self.clock.advance(chrono::Duration::seconds(WEBHOOK_DELAY_SECS));
        payflow_payments::worker::deliver_reference_webhooks(&self.state)
            .await
            .unwrap()
    }
}

pub async fn count<E>(db: &DatabaseConnection) -> u64
where
    E: EntityTrait,
    E::Model: Sync,
{
    E::find().count(db).await.unwrap()
}
