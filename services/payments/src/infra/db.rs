use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};

use payflow_domain::id::{IntentId, OrderId, PaymentId, RefundId, WebhookEventId};
use payflow_domain::status::{
    IntentStatus, OrderPaymentStatus, PaymentStatus, RefundStatus, WebhookEventStatus,
};
use payflow_payments_schema::{
    orders, payment_attempts, payment_intents, payments, refunds, webhook_events,
};

use crate::domain::provider::ProviderKind;
use crate::domain::repository::{
    AttemptRepository, IntentRepository, OrderRepository, PaymentRepository, RefundRepository,
    WebhookEventRepository,
};
use crate::domain::types::{
    EventLinks, INTENT_EXPIRED, InsertOutcome, NewWebhookEvent, Order, Payment, PaymentAttempt,
    PaymentIntent, Refund, WebhookEvent,
};
use crate::error::PaymentServiceError;

fn open_intent_statuses() -> [&'static str; 3] {
    IntentStatus::OPEN.map(IntentStatus::as_str)
}

// ── Orders ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOrderRepository {
    pub db: DatabaseConnection,
}

impl OrderRepository for DbOrderRepository {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, PaymentServiceError> {
        let model = orders::Entity::find_by_id(id.0)
            .one(&self.db)
            .await
            .context("find order by id")?;
        Ok(model.map(order_from_model).transpose()?)
    }
}

// ── Intents ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbIntentRepository {
    pub db: DatabaseConnection,
}

impl IntentRepository for DbIntentRepository {
    async fn find_by_id(&self, id: IntentId) -> Result<Option<PaymentIntent>, PaymentServiceError> {
        let model = payment_intents::Entity::find_by_id(id.0)
            .one(&self.db)
            .await
            .context("find intent by id")?;
        Ok(model.map(intent_from_model).transpose()?)
    }

    async fn find_open_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<PaymentIntent>, PaymentServiceError> {
        let model = payment_intents::Entity::find()
            .filter(payment_intents::Column::OrderId.eq(order_id.0))
            .filter(payment_intents::Column::Status.is_in(open_intent_statuses()))
            .order_by_desc(payment_intents::Column::CreatedAt)
            .one(&self.db)
            .await
            .context("find open intent for order")?;
        Ok(model.map(intent_from_model).transpose()?)
    }

    async fn create(&self, intent: &PaymentIntent) -> Result<(), PaymentServiceError> {
        payment_intents::ActiveModel {
            id: Set(intent.id.0),
            order_id: Set(intent.order_id.0),
            provider: Set(intent.provider.as_str().to_owned()),
            provider_intent_id: Set(intent.provider_intent_id.clone()),
            amount: Set(intent.amount),
            currency: Set(intent.currency.clone()),
            status: Set(intent.status.as_str().to_owned()),
            idempotency_key: Set(intent.idempotency_key.clone()),
            client_secret: Set(intent.client_secret.clone()),
            last_error: Set(intent.last_error.clone()),
            created_at: Set(intent.created_at),
            updated_at: Set(intent.updated_at),
        }
        .insert(&self.db)
        .await
        .context("create payment intent")?;
        Ok(())
    }

    async fn mark_processing(
        &self,
        id: IntentId,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError> {
        let result = payment_intents::Entity::update_many()
            .col_expr(
                payment_intents::Column::Status,
                Expr::value(IntentStatus::Processing.as_str()),
            )
            .col_expr(payment_intents::Column::UpdatedAt, Expr::value(now))
            .filter(payment_intents::Column::Id.eq(id.0))
            .filter(payment_intents::Column::Status.is_in([
                IntentStatus::RequiresConfirmation.as_str(),
                IntentStatus::RequiresAction.as_str(),
            ]))
            .exec(&self.db)
            .await
            .context("mark intent processing")?;
        Ok(result.rows_affected == 1)
    }

    async fn list_expired(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<PaymentIntent>, PaymentServiceError> {
        let models = payment_intents::Entity::find()
            .inner_join(orders::Entity)
            .filter(payment_intents::Column::Status.is_in(open_intent_statuses()))
            .filter(payment_intents::Column::UpdatedAt.lt(cutoff))
            .filter(orders::Column::PaymentStatus.eq(OrderPaymentStatus::Unpaid.as_str()))
            .order_by_asc(payment_intents::Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list expired intents")?;
        Ok(models
            .into_iter()
            .map(intent_from_model)
            .collect::<anyhow::Result<_>>()?)
    }

    async fn expire(
        &self,
        intent: &PaymentIntent,
        attempt: &PaymentAttempt,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError> {
        let intent_id = intent.id.0;
        let order_id = intent.order_id.0;
        let attempt = attempt.clone();
        let expired = self
            .db
            .transaction::<_, bool, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let result = payment_intents::Entity::update_many()
                        .col_expr(
                            payment_intents::Column::Status,
                            Expr::value(IntentStatus::Failed.as_str()),
                        )
                        .col_expr(payment_intents::Column::LastError, Expr::value(INTENT_EXPIRED))
                        .col_expr(payment_intents::Column::UpdatedAt, Expr::value(now))
                        .filter(payment_intents::Column::Id.eq(intent_id))
                        .filter(payment_intents::Column::Status.is_in(open_intent_statuses()))
                        .filter(payment_intents::Column::UpdatedAt.lt(cutoff))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Ok(false);
                    }
                    insert_attempt(txn, &attempt).await?;
                    orders::Entity::update_many()
                        .col_expr(
                            orders::Column::LastPaymentStatus,
                            Expr::value(IntentStatus::Failed.as_str()),
                        )
                        .col_expr(orders::Column::LastPaymentError, Expr::value(INTENT_EXPIRED))
                        .col_expr(orders::Column::LastPaymentAt, Expr::value(now))
                        .col_expr(orders::Column::UpdatedAt, Expr::value(now))
                        .filter(orders::Column::Id.eq(order_id))
                        .filter(orders::Column::PaymentStatus.eq(OrderPaymentStatus::Unpaid.as_str()))
                        .exec(txn)
                        .await?;
                    Ok(true)
                })
            })
            .await
            .context("expire payment intent")?;
        Ok(expired)
    }
}

// ── Payments ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbPaymentRepository {
    pub db: DatabaseConnection,
}

impl PaymentRepository for DbPaymentRepository {
    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentServiceError> {
        let model = payments::Entity::find_by_id(id.0)
            .one(&self.db)
            .await
            .context("find payment by id")?;
        Ok(model.map(payment_from_model).transpose()?)
    }

    async fn find_refundable_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, PaymentServiceError> {
        let model = payments::Entity::find()
            .filter(payments::Column::OrderId.eq(order_id.0))
            .filter(payments::Column::Status.is_in([
                PaymentStatus::Succeeded.as_str(),
                PaymentStatus::PartiallyRefunded.as_str(),
            ]))
            .order_by_desc(payments::Column::CreatedAt)
            .one(&self.db)
            .await
            .context("find refundable payment")?;
        Ok(model.map(payment_from_model).transpose()?)
    }

    async fn list_unsettled(&self, limit: u64) -> Result<Vec<Payment>, PaymentServiceError> {
        let models = payments::Entity::find()
            .inner_join(orders::Entity)
            .filter(payments::Column::Status.eq(PaymentStatus::Succeeded.as_str()))
            .filter(orders::Column::PaymentStatus.is_not_in([
                OrderPaymentStatus::Paid.as_str(),
                OrderPaymentStatus::Refunded.as_str(),
            ]))
            .order_by_asc(payments::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list unsettled payments")?;
        Ok(models
            .into_iter()
            .map(payment_from_model)
            .collect::<anyhow::Result<_>>()?)
    }
}

// ── Refunds ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbRefundRepository {
    pub db: DatabaseConnection,
}

impl RefundRepository for DbRefundRepository {
    async fn create(&self, refund: &Refund) -> Result<(), PaymentServiceError> {
        let refund = refund.clone();
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    refunds::ActiveModel {
                        id: Set(refund.id.0),
                        order_id: Set(refund.order_id.0),
                        payment_id: Set(refund.payment_id.0),
                        intent_id: Set(refund.intent_id.0),
                        provider: Set(refund.provider.as_str().to_owned()),
                        provider_refund_id: Set(refund.provider_refund_id.clone()),
                        amount: Set(refund.amount),
                        currency: Set(refund.currency.clone()),
                        status: Set(refund.status.as_str().to_owned()),
                        reason: Set(refund.reason.clone()),
                        idempotency_key: Set(refund.idempotency_key.clone()),
                        last_error: Set(None),
                        created_at: Set(refund.created_at),
                        updated_at: Set(refund.updated_at),
                    }
                    .insert(txn)
                    .await?;
                    set_order_refund_status(txn, refund.order_id, RefundStatus::Requested, refund.created_at)
                        .await
                })
            })
            .await
            .context("create refund")?;
        Ok(())
    }

    async fn find_by_id(&self, id: RefundId) -> Result<Option<Refund>, PaymentServiceError> {
        let model = refunds::Entity::find_by_id(id.0)
            .one(&self.db)
            .await
            .context("find refund by id")?;
        Ok(model.map(refund_from_model).transpose()?)
    }

    async fn find_active_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Refund>, PaymentServiceError> {
        let model = refunds::Entity::find()
            .filter(refunds::Column::OrderId.eq(order_id.0))
            .filter(refunds::Column::Status.is_in([
                RefundStatus::Requested.as_str(),
                RefundStatus::Processing.as_str(),
            ]))
            .order_by_desc(refunds::Column::CreatedAt)
            .one(&self.db)
            .await
            .context("find active refund")?;
        Ok(model.map(refund_from_model).transpose()?)
    }

    async fn mark_submitted(
        &self,
        id: RefundId,
        provider_refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError> {
        let result = refunds::Entity::update_many()
            .col_expr(
                refunds::Column::Status,
                Expr::value(RefundStatus::Processing.as_str()),
            )
            .col_expr(refunds::Column::ProviderRefundId, Expr::value(provider_refund_id))
            .col_expr(refunds::Column::UpdatedAt, Expr::value(now))
            .filter(refunds::Column::Id.eq(id.0))
            .filter(refunds::Column::Status.eq(RefundStatus::Requested.as_str()))
            .exec(&self.db)
            .await
            .context("mark refund submitted")?;
        Ok(result.rows_affected == 1)
    }

    async fn mark_rejected(
        &self,
        id: RefundId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError> {
        let error = error.to_owned();
        let rejected = self
            .db
            .transaction::<_, bool, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let Some(model) = refunds::Entity::find_by_id(id.0)
                        .filter(refunds::Column::Status.eq(RefundStatus::Requested.as_str()))
                        .one(txn)
                        .await?
                    else {
                        return Ok(false);
                    };
                    let order_id = OrderId(model.order_id);
                    let mut active: refunds::ActiveModel = model.into();
                    active.status = Set(RefundStatus::Failed.as_str().to_owned());
                    active.last_error = Set(Some(error));
                    active.updated_at = Set(now);
                    active.update(txn).await?;
                    set_order_refund_status(txn, order_id, RefundStatus::Failed, now).await?;
                    Ok(true)
                })
            })
            .await
            .context("mark refund rejected")?;
        Ok(rejected)
    }

    async fn reset_for_retry(
        &self,
        id: RefundId,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentServiceError> {
        let idempotency_key = idempotency_key.to_owned();
        let reset = self
            .db
            .transaction::<_, bool, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let Some(model) = refunds::Entity::find_by_id(id.0)
                        .filter(refunds::Column::Status.eq(RefundStatus::Failed.as_str()))
                        .lock_exclusive()
                        .one(txn)
                        .await?
                    else {
                        return Ok(false);
                    };
                    let order_id = OrderId(model.order_id);
                    let mut active: refunds::ActiveModel = model.into();
                    active.status = Set(RefundStatus::Requested.as_str().to_owned());
                    active.idempotency_key = Set(idempotency_key);
                    active.provider_refund_id = Set(None);
                    active.last_error = Set(None);
                    active.updated_at = Set(now);
                    active.update(txn).await?;
                    set_order_refund_status(txn, order_id, RefundStatus::Requested, now).await?;
                    Ok(true)
                })
            })
            .await
            .context("reset refund for retry")?;
        Ok(reset)
    }
}

async fn set_order_refund_status<C: ConnectionTrait>(
    conn: &C,
    order_id: OrderId,
    status: RefundStatus,
    now: DateTime<Utc>,
) -> Result<(), sea_orm::DbErr> {
    orders::Entity::update_many()
        .col_expr(orders::Column::RefundStatus, Expr::value(status.as_str()))
        .col_expr(orders::Column::UpdatedAt, Expr::value(now))
        .filter(orders::Column::Id.eq(order_id.0))
        .exec(conn)
        .await?;
    Ok(())
}

// ── Attempts ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbAttemptRepository {
    pub db: DatabaseConnection,
}

impl AttemptRepository for DbAttemptRepository {
    async fn record(&self, attempt: &PaymentAttempt) -> Result<(), PaymentServiceError> {
        insert_attempt(&self.db, attempt)
            .await
            .context("record payment attempt")?;
        Ok(())
    }
}

pub(crate) async fn insert_attempt<C: ConnectionTrait>(
    conn: &C,
    attempt: &PaymentAttempt,
) -> Result<(), sea_orm::DbErr> {
    payment_attempts::ActiveModel {
        id: Set(attempt.id.0),
        order_id: Set(attempt.order_id.0),
        intent_id: Set(attempt.intent_id.map(|id| id.0)),
        refund_id: Set(attempt.refund_id.map(|id| id.0)),
        provider: Set(attempt.provider.as_str().to_owned()),
        kind: Set(attempt.kind.as_str().to_owned()),
        status: Set(attempt.status.clone()),
        error_code: Set(attempt.error_code.clone()),
        error_message: Set(attempt.error_message.clone()),
        created_at: Set(attempt.created_at),
    }
    .insert(conn)
    .await?;
    Ok(())
}

// ── Webhook events ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbWebhookEventRepository {
    pub db: DatabaseConnection,
}

impl WebhookEventRepository for DbWebhookEventRepository {
    async fn insert_if_absent(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<InsertOutcome, PaymentServiceError> {
        let row = webhook_events::ActiveModel {
            id: Set(WebhookEventId::new().0),
            provider: Set(event.provider.as_str().to_owned()),
            event_id: Set(event.event_id.clone()),
            event_type: Set(event.event_type.clone()),
            payload: Set(event.payload.clone()),
            signature: Set(event.signature.clone()),
            status: Set(WebhookEventStatus::Received.as_str().to_owned()),
            retry_count: Set(0),
            last_error: Set(None),
            order_id: Set(None),
            intent_id: Set(None),
            payment_id: Set(None),
            refund_id: Set(None),
            received_at: Set(event.received_at),
            processed_at: Set(None),
            updated_at: Set(event.received_at),
        };
        let inserted = webhook_events::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    webhook_events::Column::Provider,
                    webhook_events::Column::EventId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("insert webhook event")?;

        let stored = self
            .find_by_event_id(event.provider, &event.event_id)
            .await?
            .ok_or_else(|| anyhow!("webhook event {} missing after insert", event.event_id))?;
        Ok(if inserted == 0 {
            InsertOutcome::Existing(stored)
        } else {
            InsertOutcome::Inserted(stored)
        })
    }

    async fn find_by_event_id(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, PaymentServiceError> {
        let model = webhook_events::Entity::find()
            .filter(webhook_events::Column::Provider.eq(provider.as_str()))
            .filter(webhook_events::Column::EventId.eq(event_id))
            .one(&self.db)
            .await
            .context("find webhook event")?;
        Ok(model.map(webhook_event_from_model).transpose()?)
    }

    async fn mark_processed(
        &self,
        id: WebhookEventId,
        links: &EventLinks,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentServiceError> {
        webhook_events::ActiveModel {
            id: Set(id.0),
            status: Set(WebhookEventStatus::Processed.as_str().to_owned()),
            last_error: Set(None),
            order_id: Set(links.order_id.map(|id| id.0)),
            intent_id: Set(links.intent_id.map(|id| id.0)),
            payment_id: Set(links.payment_id.map(|id| id.0)),
            refund_id: Set(links.refund_id.map(|id| id.0)),
            processed_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        }
        .update(&self.db)
        .await
        .context("mark webhook event processed")?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: WebhookEventId,
        error: &str,
        bump_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentServiceError> {
        let mut update = webhook_events::Entity::update_many()
            .col_expr(
                webhook_events::Column::Status,
                Expr::value(WebhookEventStatus::Failed.as_str()),
            )
            .col_expr(webhook_events::Column::LastError, Expr::value(error))
            .col_expr(webhook_events::Column::UpdatedAt, Expr::value(now));
        if bump_retry {
            update = update.col_expr(
                webhook_events::Column::RetryCount,
                Expr::col(webhook_events::Column::RetryCount).add(1),
            );
        }
        update
            .filter(webhook_events::Column::Id.eq(id.0))
            .exec(&self.db)
            .await
            .context("mark webhook event failed")?;
        Ok(())
    }

    async fn list_replayable(
        &self,
        max_retries: i32,
        stale_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<WebhookEvent>, PaymentServiceError> {
        let models = webhook_events::Entity::find()
            .filter(webhook_events::Column::RetryCount.lt(max_retries))
            .filter(
                Condition::any()
                    .add(webhook_events::Column::Status.eq(WebhookEventStatus::Failed.as_str()))
                    .add(
                        Condition::all()
                            .add(
                                webhook_events::Column::Status
                                    .eq(WebhookEventStatus::Received.as_str()),
                            )
                            .add(webhook_events::Column::ReceivedAt.lt(stale_before)),
                    ),
            )
            .order_by_asc(webhook_events::Column::ReceivedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list replayable webhook events")?;
        Ok(models
            .into_iter()
            .map(webhook_event_from_model)
            .collect::<anyhow::Result<_>>()?)
    }
}

// ── Model mapping ─────────────────────────────────────────────────────────────

fn provider_kind(value: &str) -> anyhow::Result<ProviderKind> {
    value
        .parse()
        .map_err(|_| anyhow!("unknown provider {value:?} in storage"))
}

pub(crate) fn order_from_model(model: orders::Model) -> anyhow::Result<Order> {
    Ok(Order {
        id: OrderId(model.id),
        amount: model.amount,
        currency: model.currency,
        status: model.status.parse().context("order status")?,
        payment_status: model
            .payment_status
            .parse()
            .context("order payment status")?,
        refund_status: model
            .refund_status
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("order refund status")?,
        refund_amount: model.refund_amount,
        refunded_at: model.refunded_at,
        last_payment_status: model.last_payment_status,
        last_payment_error: model.last_payment_error,
        last_payment_at: model.last_payment_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

pub(crate) fn intent_from_model(model: payment_intents::Model) -> anyhow::Result<PaymentIntent> {
    Ok(PaymentIntent {
        id: IntentId(model.id),
        order_id: OrderId(model.order_id),
        provider: provider_kind(&model.provider)?,
        provider_intent_id: model.provider_intent_id,
        amount: model.amount,
        currency: model.currency,
        status: model.status.parse().context("intent status")?,
        idempotency_key: model.idempotency_key,
        client_secret: model.client_secret,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

pub(crate) fn payment_from_model(model: payments::Model) -> anyhow::Result<Payment> {
    Ok(Payment {
        id: PaymentId(model.id),
        order_id: OrderId(model.order_id),
        intent_id: IntentId(model.intent_id),
        provider: provider_kind(&model.provider)?,
        provider_txn_id: model.provider_txn_id,
        amount: model.amount,
        currency: model.currency,
        status: model.status.parse().context("payment status")?,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

pub(crate) fn refund_from_model(model: refunds::Model) -> anyhow::Result<Refund> {
    Ok(Refund {
        id: RefundId(model.id),
        order_id: OrderId(model.order_id),
        payment_id: PaymentId(model.payment_id),
        intent_id: IntentId(model.intent_id),
        provider: provider_kind(&model.provider)?,
        provider_refund_id: model.provider_refund_id,
        amount: model.amount,
        currency: model.currency,
        status: model.status.parse().context("refund status")?,
        reason: model.reason,
        idempotency_key: model.idempotency_key,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn webhook_event_from_model(model: webhook_events::Model) -> anyhow::Result<WebhookEvent> {
    Ok(WebhookEvent {
        id: WebhookEventId(model.id),
        provider: provider_kind(&model.provider)?,
        event_id: model.event_id,
        event_type: model.event_type,
        payload: model.payload,
        signature: model.signature,
        status: model.status.parse().context("webhook event status")?,
        retry_count: model.retry_count,
        last_error: model.last_error,
        links: EventLinks {
            order_id: model.order_id.map(OrderId),
            intent_id: model.intent_id.map(IntentId),
            payment_id: model.payment_id.map(PaymentId),
            refund_id: model.refund_id.map(RefundId),
        },
        received_at: model.received_at,
        processed_at: model.processed_at,
        updated_at: model.updated_at,
    })
}
