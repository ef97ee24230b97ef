//! Event processor: applies one normalized event to intents, payments,
//! refunds and the order inside a single database transaction.
//!
//! Rows are read with `SELECT ... FOR UPDATE` so concurrent deliveries of
//! events for the same intent serialize; events for different intents do
//! not contend. Any error drops the transaction and rolls everything back.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use payflow_domain::event::{EventType, NormalizedEvent};
use payflow_domain::id::{AttemptId, IntentId, OrderId, PaymentId, RefundId};
use payflow_domain::status::{
    AttemptKind, IntentStatus, OrderPaymentStatus, OrderStatus, PaymentStatus, RefundStatus,
};
use payflow_payments_schema::{order_status_logs, orders, payment_intents, payments, refunds};

use crate::domain::provider::ProviderKind;
use crate::domain::repository::EventProcessor;
use crate::domain::types::{EventLinks, PaymentAttempt};
use crate::error::PaymentServiceError;
use crate::infra::db::insert_attempt;

#[derive(Clone)]
pub struct DbEventProcessor {
    pub db: DatabaseConnection,
}

impl EventProcessor for DbEventProcessor {
    async fn process(
        &self,
        event: &NormalizedEvent,
        now: DateTime<Utc>,
    ) -> Result<EventLinks, PaymentServiceError> {
        let provider: ProviderKind = event.provider.parse()?;
        let txn = self.db.begin().await.context("begin event transaction")?;
        let links = match event.event_type {
            EventType::PaymentSucceeded => payment_succeeded(&txn, provider, event, now).await?,
            EventType::PaymentFailed => payment_failed(&txn, provider, event, now).await?,
            EventType::PaymentRequiresAction => requires_action(&txn, provider, event, now).await?,
            EventType::RefundSucceeded => refund_succeeded(&txn, provider, event, now).await?,
            EventType::RefundFailed => refund_failed(&txn, provider, event, now).await?,
        };
        txn.commit().await.context("commit event transaction")?;
        Ok(links)
    }
}

// ── Payment events ────────────────────────────────────────────────────────────

async fn payment_succeeded(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<EventLinks, PaymentServiceError> {
    let intent = lock_intent(txn, provider, event).await?;
    if event.data.amount != intent.amount {
        return Err(PaymentServiceError::AmountMismatch {
            expected: intent.amount,
            actual: event.data.amount,
        });
    }
    let status: IntentStatus = intent.status.parse().context("intent status")?;
    let mut links = intent_links(&intent);

    if status != IntentStatus::Succeeded {
        let mut active: payment_intents::ActiveModel = intent.clone().into();
        active.status = Set(IntentStatus::Succeeded.as_str().to_owned());
        active.last_error = Set(None);
        active.updated_at = Set(now);
        active.update(txn).await.context("mark intent succeeded")?;
        info!(
            event_id = %event.event_id,
            intent_id = %intent.id,
            from = %status,
            "intent succeeded"
        );
    }

    let payment = settle_payment(txn, provider, &intent, event, now).await?;
    links.payment_id = Some(PaymentId(payment.id));

    let order = lock_order(txn, intent.order_id).await?;
    let payment_status: OrderPaymentStatus = order
        .payment_status
        .parse()
        .context("order payment status")?;
    if payment_status.accepts_settlement() {
        let order_status: OrderStatus = order.status.parse().context("order status")?;
        let order_id = order.id;
        let mut active: orders::ActiveModel = order.into();
        active.payment_status = Set(OrderPaymentStatus::Paid.as_str().to_owned());
        active.last_payment_status = Set(Some(IntentStatus::Succeeded.as_str().to_owned()));
        active.last_payment_error = Set(None);
        active.last_payment_at = Set(Some(now));
        active.updated_at = Set(now);
        if let Some(next) = order_status.after_payment() {
            active.status = Set(next.as_str().to_owned());
        }
        active.update(txn).await.context("mark order paid")?;

        if let Some(next) = order_status.after_payment() {
            order_status_logs::ActiveModel {
                id: Set(Uuid::now_v7()),
                order_id: Set(order_id),
                from_status: Set(order_status.as_str().to_owned()),
                to_status: Set(next.as_str().to_owned()),
                reason: Set(format!("payment succeeded ({})", event.event_id)),
                created_at: Set(now),
            }
            .insert(txn)
            .await
            .context("insert order status log")?;
        }
        info!(event_id = %event.event_id, order_id = %order_id, "order paid");
    } else {
        debug!(
            event_id = %event.event_id,
            order_id = %order.id,
            payment_status = %payment_status,
            "order already settled"
        );
    }
    Ok(links)
}

/// Payment row for the intent, created on first settlement only.
async fn settle_payment(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    intent: &payment_intents::Model,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<payments::Model, PaymentServiceError> {
    if let Some(existing) = payments::Entity::find()
        .filter(payments::Column::IntentId.eq(intent.id))
        .one(txn)
        .await
        .context("find payment for intent")?
    {
        return Ok(existing);
    }

    let txn_id = event.data.provider_txn_id.clone();
    let row = payments::ActiveModel {
        id: Set(PaymentId::new().0),
        order_id: Set(intent.order_id),
        intent_id: Set(intent.id),
        provider: Set(provider.as_str().to_owned()),
        provider_txn_id: Set(txn_id.clone()),
        amount: Set(intent.amount),
        currency: Set(intent.currency.clone()),
        status: Set(PaymentStatus::Succeeded.as_str().to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let inserted = payments::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([payments::Column::Provider, payments::Column::ProviderTxnId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await
        .context("insert payment")?;
    if inserted == 0 {
        warn!(
            event_id = %event.event_id,
            provider_txn_id = ?txn_id,
            "provider transaction already recorded for another intent"
        );
    }

    let mut query = payments::Entity::find().filter(payments::Column::Provider.eq(provider.as_str()));
    query = match &txn_id {
        Some(txn_id) if inserted == 0 => query.filter(payments::Column::ProviderTxnId.eq(txn_id.as_str())),
        _ => query.filter(payments::Column::IntentId.eq(intent.id)),
    };
    let payment = query
        .one(txn)
        .await
        .context("reload payment")?
        .ok_or_else(|| anyhow::anyhow!("payment for intent {} missing after insert", intent.id))?;
    if inserted == 1 {
        info!(event_id = %event.event_id, payment_id = %payment.id, intent_id = %intent.id, "payment recorded");
    }
    Ok(payment)
}

async fn payment_failed(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<EventLinks, PaymentServiceError> {
    let intent = lock_intent(txn, provider, event).await?;
    let status: IntentStatus = intent.status.parse().context("intent status")?;
    let links = intent_links(&intent);
    let error = event
        .data
        .error_summary()
        .unwrap_or_else(|| "payment_failed".to_owned());

    if !status.can_transition_to(IntentStatus::Failed)
        || (status == IntentStatus::Failed && intent.last_error.as_deref() == Some(error.as_str()))
    {
        debug!(event_id = %event.event_id, intent_id = %intent.id, status = %status, "failure ignored");
        return Ok(links);
    }

    let intent_id = intent.id;
    let order_id = intent.order_id;
    let mut active: payment_intents::ActiveModel = intent.into();
    active.status = Set(IntentStatus::Failed.as_str().to_owned());
    active.last_error = Set(Some(error.clone()));
    active.updated_at = Set(now);
    active.update(txn).await.context("mark intent failed")?;

    insert_attempt(
        txn,
        &PaymentAttempt {
            id: AttemptId::new(),
            order_id: OrderId(order_id),
            intent_id: Some(IntentId(intent_id)),
            refund_id: None,
            provider,
            kind: AttemptKind::Webhook,
            status: IntentStatus::Failed.as_str().to_owned(),
            error_code: event.data.error_code.clone(),
            error_message: event.data.error_message.clone(),
            created_at: now,
        },
    )
    .await
    .context("record failed attempt")?;

    record_last_attempt(txn, order_id, IntentStatus::Failed, Some(error), now).await?;
    warn!(event_id = %event.event_id, intent_id = %intent_id, "intent failed");
    Ok(links)
}

async fn requires_action(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<EventLinks, PaymentServiceError> {
    let intent = lock_intent(txn, provider, event).await?;
    let status: IntentStatus = intent.status.parse().context("intent status")?;
    let links = intent_links(&intent);
    if !status.can_transition_to(IntentStatus::RequiresAction) {
        debug!(event_id = %event.event_id, intent_id = %intent.id, status = %status, "action request ignored");
        return Ok(links);
    }

    let order_id = intent.order_id;
    let mut active: payment_intents::ActiveModel = intent.into();
    active.status = Set(IntentStatus::RequiresAction.as_str().to_owned());
    active.updated_at = Set(now);
    active.update(txn).await.context("mark intent requires_action")?;
    record_last_attempt(txn, order_id, IntentStatus::RequiresAction, None, now).await?;
    Ok(links)
}

/// Last-attempt bookkeeping on an order that is still waiting for money.
async fn record_last_attempt(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    status: IntentStatus,
    error: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), PaymentServiceError> {
    let order = lock_order(txn, order_id).await?;
    if order.payment_status != OrderPaymentStatus::Unpaid.as_str() {
        return Ok(());
    }
    let mut active: orders::ActiveModel = order.into();
    active.last_payment_status = Set(Some(status.as_str().to_owned()));
    active.last_payment_error = Set(error);
    active.last_payment_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(txn).await.context("update order last attempt")?;
    Ok(())
}

// ── Refund events ─────────────────────────────────────────────────────────────

async fn refund_succeeded(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<EventLinks, PaymentServiceError> {
    let refund = lock_refund(txn, provider, event).await?;
    let status: RefundStatus = refund.status.parse().context("refund status")?;
    let links = refund_links(&refund);
    if status == RefundStatus::Succeeded {
        debug!(event_id = %event.event_id, refund_id = %refund.id, "refund already succeeded");
        return Ok(links);
    }

    let refund_id = refund.id;
    let payment_id = refund.payment_id;
    let order_id = refund.order_id;
    let provider_refund_id = refund
        .provider_refund_id
        .clone()
        .or_else(|| event.data.provider_refund_id.clone());
    let mut active: refunds::ActiveModel = refund.into();
    active.status = Set(RefundStatus::Succeeded.as_str().to_owned());
    active.provider_refund_id = Set(provider_refund_id);
    active.last_error = Set(None);
    active.updated_at = Set(now);
    active.update(txn).await.context("mark refund succeeded")?;

    let payment = payments::Entity::find_by_id(payment_id)
        .lock_exclusive()
        .one(txn)
        .await
        .context("lock payment")?
        .ok_or(PaymentServiceError::PaymentNotFound)?;
    let refunded: Decimal = refunds::Entity::find()
        .filter(refunds::Column::PaymentId.eq(payment_id))
        .filter(refunds::Column::Status.eq(RefundStatus::Succeeded.as_str()))
        .all(txn)
        .await
        .context("sum succeeded refunds")?
        .iter()
        .map(|r| r.amount)
        .sum();
    let payment_status = if refunded >= payment.amount {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    };
    let mut active: payments::ActiveModel = payment.into();
    active.status = Set(payment_status.as_str().to_owned());
    active.updated_at = Set(now);
    active.update(txn).await.context("update refunded payment")?;

    let order = lock_order(txn, order_id).await?;
    let mut active: orders::ActiveModel = order.into();
    active.payment_status = Set(OrderPaymentStatus::Refunded.as_str().to_owned());
    active.refund_status = Set(Some(RefundStatus::Succeeded.as_str().to_owned()));
    active.refund_amount = Set(Some(refunded));
    active.refunded_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(txn).await.context("mark order refunded")?;

    info!(
        event_id = %event.event_id,
        refund_id = %refund_id,
        order_id = %order_id,
        amount = %refunded,
        "refund succeeded"
    );
    Ok(links)
}

async fn refund_failed(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<EventLinks, PaymentServiceError> {
    let refund = lock_refund(txn, provider, event).await?;
    let status: RefundStatus = refund.status.parse().context("refund status")?;
    let links = refund_links(&refund);
    let error = event
        .data
        .error_summary()
        .unwrap_or_else(|| "refund_failed".to_owned());
    if status == RefundStatus::Succeeded
        || (status == RefundStatus::Failed && refund.last_error.as_deref() == Some(error.as_str()))
    {
        debug!(event_id = %event.event_id, refund_id = %refund.id, status = %status, "refund failure ignored");
        return Ok(links);
    }

    let refund_id = refund.id;
    let order_id = refund.order_id;
    let mut active: refunds::ActiveModel = refund.into();
    active.status = Set(RefundStatus::Failed.as_str().to_owned());
    active.last_error = Set(Some(error));
    active.updated_at = Set(now);
    active.update(txn).await.context("mark refund failed")?;

    let order = lock_order(txn, order_id).await?;
    let mut active: orders::ActiveModel = order.into();
    active.refund_status = Set(Some(RefundStatus::Failed.as_str().to_owned()));
    active.updated_at = Set(now);
    active.update(txn).await.context("mark order refund failed")?;

    warn!(event_id = %event.event_id, refund_id = %refund_id, "refund failed");
    Ok(links)
}

// ── Lookups ───────────────────────────────────────────────────────────────────

/// Intent named by the event. When the event carries no provider intent id,
/// or one this engine never issued, the provider's most recently updated
/// `processing` intent is used instead.
async fn lock_intent(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
) -> Result<payment_intents::Model, PaymentServiceError> {
    if let Some(provider_intent_id) = &event.data.provider_intent_id {
        let found = payment_intents::Entity::find()
            .filter(payment_intents::Column::Provider.eq(provider.as_str()))
            .filter(payment_intents::Column::ProviderIntentId.eq(provider_intent_id.as_str()))
            .lock_exclusive()
            .one(txn)
            .await
            .context("lock intent")?;
        if let Some(intent) = found {
            return Ok(intent);
        }
    }

    let fallback = payment_intents::Entity::find()
        .filter(payment_intents::Column::Provider.eq(provider.as_str()))
        .filter(payment_intents::Column::Status.eq(IntentStatus::Processing.as_str()))
        .order_by_desc(payment_intents::Column::UpdatedAt)
        .lock_exclusive()
        .one(txn)
        .await
        .context("lock fallback intent")?
        .ok_or(PaymentServiceError::IntentNotFound)?;
    warn!(
        event_id = %event.event_id,
        provider_intent_id = ?event.data.provider_intent_id,
        intent_id = %fallback.id,
        "no intent for provider intent id; matched latest processing intent"
    );
    Ok(fallback)
}

/// Refund named by the event, with the same fallback rule as intents.
async fn lock_refund(
    txn: &DatabaseTransaction,
    provider: ProviderKind,
    event: &NormalizedEvent,
) -> Result<refunds::Model, PaymentServiceError> {
    if let Some(provider_refund_id) = &event.data.provider_refund_id {
        let found = refunds::Entity::find()
            .filter(refunds::Column::Provider.eq(provider.as_str()))
            .filter(refunds::Column::ProviderRefundId.eq(provider_refund_id.as_str()))
            .lock_exclusive()
            .one(txn)
            .await
            .context("lock refund")?;
        if let Some(refund) = found {
            return Ok(refund);
        }
    }

    let fallback = refunds::Entity::find()
        .filter(refunds::Column::Provider.eq(provider.as_str()))
        .filter(refunds::Column::Status.eq(RefundStatus::Processing.as_str()))
        .order_by_desc(refunds::Column::UpdatedAt)
        .lock_exclusive()
        .one(txn)
        .await
        .context("lock fallback refund")?
        .ok_or(PaymentServiceError::RefundNotFound)?;
    warn!(
        event_id = %event.event_id,
        provider_refund_id = ?event.data.provider_refund_id,
        refund_id = %fallback.id,
        "no refund for provider refund id; matched latest processing refund"
    );
    Ok(fallback)
}

async fn lock_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<orders::Model, PaymentServiceError> {
    orders::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await
        .context("lock order")?
        .ok_or(PaymentServiceError::OrderNotFound)
}

fn intent_links(intent: &payment_intents::Model) -> EventLinks {
    EventLinks {
        order_id: Some(OrderId(intent.order_id)),
        intent_id: Some(IntentId(intent.id)),
        ..Default::default()
    }
}

fn refund_links(refund: &refunds::Model) -> EventLinks {
    EventLinks {
        order_id: Some(OrderId(refund.order_id)),
        intent_id: Some(IntentId(refund.intent_id)),
        payment_id: Some(PaymentId(refund.payment_id)),
        refund_id: Some(RefundId(refund.id)),
    }
}
