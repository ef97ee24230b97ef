use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::id::RefundId;
use payflow_domain::status::{RefundStatus, WebhookEventStatus};
use payflow_payments::error::PaymentServiceError;
use payflow_payments::usecase::refund::RequestRefundInput;
use payflow_payments_schema::{payment_attempts, payments, refunds};

use crate::helpers::{TestEnv, count};

fn refund_event(
    event_id: &str,
    provider_refund_id: Option<&str>,
    amount: Decimal,
    env: &TestEnv,
) -> NormalizedEvent {
    NormalizedEvent {
        event_id: event_id.to_owned(),
        event_type: EventType::RefundSucceeded,
        provider: "reference".to_owned(),
        created_at: env.clock.now(),
        data: EventData {
            provider_intent_id: None,
            provider_txn_id: None,
            provider_refund_id: provider_refund_id.map(str::to_owned),
            amount,
            currency: "CNY".to_owned(),
            status: "succeeded".to_owned(),
            error_code: None,
            error_message: None,
            metadata: None,
        },
    }
}

#[tokio::test]
async fn should_refund_paid_order() {
    let env = TestEnv::new().await;
    let (order_id, intent) = env.paid_order(dec!(88.00)).await;

    let refund = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(88.00),
            reason: Some("guest cancelled".to_owned()),
        })
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Processing);
    assert_eq!(refund.intent_id, intent.id);
    assert!(refund.provider_refund_id.as_deref().unwrap().starts_with("re_"));
    assert_eq!(env.order(order_id).await.refund_status.as_deref(), Some("requested"));

    env.flush_webhooks().await;

    let stored = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "succeeded");

    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "REFUNDED");
    assert_eq!(order.refund_status.as_deref(), Some("succeeded"));
    assert_eq!(order.refund_amount, Some(dec!(88.00)));
    assert!(order.refunded_at.is_some());

    let payment = payments::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(payment.status, "refunded");
    assert_eq!(count::<refunds::Entity>(env.db()).await, 1);
}

#[tokio::test]
async fn partial_refund_marks_payment_partially_refunded() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;

    env.refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(30.00),
            reason: None,
        })
        .await
        .unwrap();
    env.flush_webhooks().await;

    let payment = payments::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(payment.status, "partially_refunded");
    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "REFUNDED");
    assert_eq!(order.refund_amount, Some(dec!(30.00)));
}

#[tokio::test]
async fn failed_refund_is_retried_on_the_same_row() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;

    env.reference().set_refund_failure(true);
    let refund = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(88.00),
            reason: None,
        })
        .await
        .unwrap();
    let first_key = refund.idempotency_key.clone();
    env.flush_webhooks().await;

    let failed = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.last_error.as_deref(), Some("insufficient_funds"));
    let order = env.order(order_id).await;
    assert_eq!(order.refund_status.as_deref(), Some("failed"));
    assert_eq!(order.payment_status, "PAID");

    env.reference().set_refund_failure(false);
    let retried = env.refund_uc().retry(refund.id).await.unwrap();
    assert_eq!(retried.id, refund.id);
    assert_eq!(retried.status, RefundStatus::Processing);
    assert_ne!(retried.idempotency_key, first_key);
    assert!(retried.idempotency_key.starts_with(&format!("refund_{}_", refund.id)));
    assert_ne!(retried.provider_refund_id, failed.provider_refund_id);

    env.flush_webhooks().await;

    assert_eq!(count::<refunds::Entity>(env.db()).await, 1, "retry reuses the row");
    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "REFUNDED");
    assert_eq!(order.refund_status.as_deref(), Some("succeeded"));

    let refund_attempts = payment_attempts::Entity::find()
        .filter(payment_attempts::Column::RefundId.eq(refund.id.0))
        .count(env.db())
        .await
        .unwrap();
    assert_eq!(refund_attempts, 2);
}

#[tokio::test]
async fn should_reject_refund_of_unpaid_order() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;

    let result = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(88.00),
            reason: None,
        })
        .await;
    assert!(
        matches!(result, Err(PaymentServiceError::InvalidState(_))),
        "expected InvalidState, got {result:?}"
    );
}

#[tokio::test]
async fn should_reject_refund_above_payment_amount() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;

    let result = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(100.00),
            reason: None,
        })
        .await;
    assert!(matches!(result, Err(PaymentServiceError::Validation(_))));
    assert_eq!(count::<refunds::Entity>(env.db()).await, 0);
}

#[tokio::test]
async fn should_reject_second_refund_while_one_is_active() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;
    let input = || RequestRefundInput {
        order_id,
        amount: dec!(10.00),
        reason: None,
    };

    let refund = env.refund_uc().request(input()).await.unwrap();
    let second = env.refund_uc().request(input()).await;
    assert!(matches!(second, Err(PaymentServiceError::RefundInProgress)));

    let retry = env.refund_uc().retry(refund.id).await;
    assert!(
        matches!(retry, Err(PaymentServiceError::InvalidState(_))),
        "only failed refunds can be retried, got {retry:?}"
    );
}

#[tokio::test]
async fn retry_of_unknown_refund_is_not_found() {
    let env = TestEnv::new().await;
    let result = env.refund_uc().retry(RefundId::new()).await;
    assert!(matches!(result, Err(PaymentServiceError::RefundNotFound)));
}

#[tokio::test]
async fn refund_event_without_refund_id_matches_processing_refund() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;
    let refund = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(88.00),
            reason: None,
        })
        .await
        .unwrap();

    let outcome = env
        .state
        .event_store()
        .record(&refund_event("evt_anon_refund", None, dec!(88.00), &env), None, env.clock.now())
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Processed);

    let stored = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "succeeded");
    assert_eq!(stored.provider_refund_id, refund.provider_refund_id);
    assert_eq!(env.order(order_id).await.payment_status, "REFUNDED");
}

#[tokio::test]
async fn refund_event_with_unknown_refund_id_matches_processing_refund() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;
    let refund = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(88.00),
            reason: None,
        })
        .await
        .unwrap();

    let outcome = env
        .state
        .event_store()
        .record(
            &refund_event("evt_foreign_refund", Some("re_not_ours"), dec!(88.00), &env),
            None,
            env.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Processed);
    let stored = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "succeeded");
}

#[tokio::test]
async fn refund_event_without_any_processing_refund_fails() {
    let env = TestEnv::new().await;
    env.paid_order(dec!(88.00)).await;

    let outcome = env
        .state
        .event_store()
        .record(&refund_event("evt_stray_refund", None, dec!(88.00), &env), None, env.clock.now())
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("REFUND_NOT_FOUND"));
}

#[tokio::test]
async fn repeated_refund_success_leaves_ledger_unchanged() {
    let env = TestEnv::new().await;
    let (order_id, _) = env.paid_order(dec!(88.00)).await;
    let refund = env
        .refund_uc()
        .request(RequestRefundInput {
            order_id,
            amount: dec!(30.00),
            reason: None,
        })
        .await
        .unwrap();
    let provider_refund_id = refund.provider_refund_id.clone().unwrap();
    let store = env.state.event_store();

    let event = refund_event("evt_refund_once", Some(&provider_refund_id), dec!(30.00), &env);
    let first = store.record(&event, None, env.clock.now()).await.unwrap();
    assert_eq!(first.status, WebhookEventStatus::Processed);
    let refund_before = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    let payment_before = payments::Entity::find().one(env.db()).await.unwrap().unwrap();
    let order_before = env.order(order_id).await;

    env.clock.advance(Duration::minutes(5));
    let duplicate = store.record(&event, None, env.clock.now()).await.unwrap();
    assert!(!duplicate.is_new);
    let redelivered = refund_event("evt_refund_again", Some(&provider_refund_id), dec!(30.00), &env);
    let again = store.record(&redelivered, None, env.clock.now()).await.unwrap();
    assert!(again.is_new);
    assert_eq!(again.status, WebhookEventStatus::Processed);

    let refund_after = refunds::Entity::find_by_id(refund.id.0)
        .one(env.db())
        .await
        .unwrap()
        .unwrap();
    let payment_after = payments::Entity::find().one(env.db()).await.unwrap().unwrap();
    let order_after = env.order(order_id).await;
    assert_eq!(refund_after.status, "succeeded");
    assert_eq!(refund_after.updated_at, refund_before.updated_at);
    assert_eq!(payment_after.status, "partially_refunded");
    assert_eq!(payment_after.updated_at, payment_before.updated_at);
    assert_eq!(order_after.refund_amount, Some(dec!(30.00)));
    assert_eq!(order_after.refunded_at, order_before.refunded_at);
    assert_eq!(order_after.updated_at, order_before.updated_at);
    assert_eq!(count::<refunds::Entity>(env.db()).await, 1);
}
