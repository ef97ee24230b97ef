use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use serde_json::json;

use payflow_core::clock::Clock;
use payflow_domain::event::{EventData, EventType, NormalizedEvent};
use payflow_domain::id::{IntentId, OrderId};
use payflow_domain::status::{IntentStatus, WebhookEventStatus};
use payflow_payments::domain::provider::{ProviderKind, Simulation};
use payflow_payments::domain::repository::{IntentRepository, WebhookEventRepository};
use payflow_payments::domain::types::{NewWebhookEvent, PaymentIntent};
use payflow_payments::error::PaymentServiceError;
use payflow_payments::infra::provider::signature;
use payflow_payments::router::{SIGNATURE_HEADER, build_router};
use payflow_payments::usecase::webhook::ReceiveWebhookInput;
use payflow_payments_schema::{payments, webhook_events};

use crate::helpers::{SECRET, TestEnv, count};

fn succeeded_event(event_id: &str, provider_intent_id: &str, amount: Decimal) -> NormalizedEvent {
    NormalizedEvent {
        event_id: event_id.to_owned(),
        event_type: EventType::PaymentSucceeded,
        provider: "reference".to_owned(),
        created_at: Utc::now(),
        data: EventData {
            provider_intent_id: Some(provider_intent_id.to_owned()),
            provider_txn_id: Some(format!("ch_{event_id}")),
            provider_refund_id: None,
            amount,
            currency: "CNY".to_owned(),
            status: "succeeded".to_owned(),
            error_code: None,
            error_message: None,
            metadata: None,
        },
    }
}

/// Intent row written straight to storage, as if created before the event arrived.
async fn insert_intent(env: &TestEnv, order_id: OrderId, provider_intent_id: &str) -> PaymentIntent {
    let now = env.clock.now();
    let intent = PaymentIntent {
        id: IntentId::new(),
        order_id,
        provider: ProviderKind::Reference,
        provider_intent_id: provider_intent_id.to_owned(),
        amount: dec!(88.00),
        currency: "CNY".to_owned(),
        status: IntentStatus::Processing,
        idempotency_key: format!("intent_{order_id}_{provider_intent_id}"),
        client_secret: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    };
    env.state.intent_repo().create(&intent).await.unwrap();
    intent
}

fn reference_payload(event_id: &str, kind: &str, object: serde_json::Value) -> String {
    json!({
        "id": event_id,
        "type": kind,
        "created": 1_772_366_400,
        "data": { "object": object },
    })
    .to_string()
}

#[tokio::test]
async fn duplicate_event_is_a_no_op() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    let event = succeeded_event("evt_dup", &intent.provider_intent_id, dec!(88.00));
    let store = env.state.event_store();

    let first = store.record(&event, None, env.clock.now()).await.unwrap();
    assert!(first.is_new);
    assert_eq!(first.status, WebhookEventStatus::Processed);

    let second = store.record(&event, None, env.clock.now()).await.unwrap();
    assert!(!second.is_new, "re-ingest must report isNew=false");
    assert_eq!(second.webhook_event_id, first.webhook_event_id);
    assert_eq!(second.status, WebhookEventStatus::Processed);

    assert_eq!(count::<payments::Entity>(env.db()).await, 1);
    assert_eq!(count::<webhook_events::Entity>(env.db()).await, 1);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn failed_event_is_replayed_exactly_once() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let event = succeeded_event("evt_early", "pi_early", dec!(88.00));

    let outcome = env
        .state
        .event_store()
        .record(&event, None, env.clock.now())
        .await
        .unwrap();
    assert!(outcome.is_new);
    assert_eq!(outcome.status, WebhookEventStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().starts_with("INTENT_NOT_FOUND"));

    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.retry_count, 0);

    insert_intent(&env, order_id, "pi_early").await;

    for _ in 0..3 {
        env.replay_uc(5).execute().await.unwrap();
    }

    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.status, "processed");
    assert!(row.last_error.is_none());
    assert!(row.processed_at.is_some());
    assert_eq!(count::<payments::Entity>(env.db()).await, 1);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn replay_stops_after_max_retries() {
    let env = TestEnv::new().await;
    env.state
        .event_store()
        .record(&succeeded_event("evt_orphan", "pi_missing", dec!(10.00)), None, env.clock.now())
        .await
        .unwrap();

    let first = env.replay_uc(2).execute().await.unwrap();
    assert_eq!((first.scanned, first.failed), (1, 1));
    let second = env.replay_uc(2).execute().await.unwrap();
    assert_eq!((second.scanned, second.failed), (1, 1));
    let third = env.replay_uc(2).execute().await.unwrap();
    assert_eq!(third.scanned, 0, "retry budget exhausted");

    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.retry_count, 2);
    assert!(row.last_error.unwrap().starts_with("INTENT_NOT_FOUND"));
}

#[tokio::test]
async fn amount_mismatch_fails_the_event() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;

    let outcome = env
        .state
        .event_store()
        .record(
            &succeeded_event("evt_short", &intent.provider_intent_id, dec!(8.80)),
            None,
            env.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("AMOUNT_MISMATCH"));
    assert_eq!(count::<payments::Entity>(env.db()).await, 0);
    assert_eq!(env.order(order_id).await.payment_status, "UNPAID");
}

#[tokio::test]
async fn stale_received_event_is_picked_up() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = insert_intent(&env, order_id, "pi_stuck").await;
    let event = succeeded_event("evt_stuck", "pi_stuck", dec!(88.00));

    // Row stored but never processed, as after a crash between insert and mark.
    env.state
        .webhook_event_repo()
        .insert_if_absent(&NewWebhookEvent {
            provider: ProviderKind::Reference,
            event_id: event.event_id.clone(),
            event_type: event.event_type.as_str().to_owned(),
            payload: serde_json::to_value(&event).unwrap(),
            signature: None,
            received_at: env.clock.now(),
        })
        .await
        .unwrap();

    let early = env.replay_uc(5).execute().await.unwrap();
    assert_eq!(early.scanned, 0, "fresh received rows are left alone");

    env.clock.advance(Duration::minutes(11));
    let report = env.replay_uc(5).execute().await.unwrap();
    assert_eq!((report.scanned, report.succeeded), (1, 1));

    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.status, "processed");
    assert_eq!(row.intent_id, Some(intent.id.0));
}

#[tokio::test]
async fn unreadable_stored_payload_counts_as_failure() {
    let env = TestEnv::new().await;
    env.state
        .event_store()
        .record(&succeeded_event("evt_bad", "pi_none", dec!(1.00)), None, env.clock.now())
        .await
        .unwrap();
    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    let mut active: webhook_events::ActiveModel = row.into();
    active.payload = Set(json!({ "garbage": true }));
    active.update(env.db()).await.unwrap();

    let report = env.replay_uc(5).execute().await.unwrap();
    assert_eq!(report.failed, 1);
    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.retry_count, 1);
    assert!(row.last_error.unwrap().starts_with("MALFORMED_EVENT"));
}

#[tokio::test]
async fn event_without_intent_id_matches_latest_processing_intent() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    env.confirm(&intent, Simulation::SucceedLater).await;

    let mut event = succeeded_event("evt_anon", "unused", dec!(88.00));
    event.data.provider_intent_id = None;
    let outcome = env
        .state
        .event_store()
        .record(&event, None, env.clock.now())
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Processed);

    let stored = env.state.intent_repo().find_by_id(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Succeeded);
    let row = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert_eq!(row.intent_id, Some(intent.id.0));
    assert_eq!(count::<payments::Entity>(env.db()).await, 1);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn event_with_unknown_intent_id_matches_latest_processing_intent() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    env.confirm(&intent, Simulation::SucceedLater).await;

    let outcome = env
        .state
        .event_store()
        .record(
            &succeeded_event("evt_foreign", "pi_not_ours", dec!(88.00)),
            None,
            env.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Processed, "{:?}", outcome.error);

    let stored = env.state.intent_repo().find_by_id(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Succeeded);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn fallback_ignores_intents_that_are_not_processing() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;

    let outcome = env
        .state
        .event_store()
        .record(
            &succeeded_event("evt_early_foreign", "pi_not_ours", dec!(88.00)),
            None,
            env.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookEventStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("INTENT_NOT_FOUND"));
    let stored = env.state.intent_repo().find_by_id(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::RequiresConfirmation);
}

#[tokio::test]
async fn invalid_signature_is_never_stored() {
    let env = TestEnv::new().await;
    let payload = reference_payload("evt_forged", "refund.succeeded", json!({}));
    let forged = signature::sign("whsec_attacker", env.clock.now().timestamp(), &payload).unwrap();

    let result = env
        .receive_webhook_uc()
        .execute(ReceiveWebhookInput {
            provider: "reference".to_owned(),
            payload,
            signature: Some(forged),
        })
        .await;
    assert!(
        matches!(result, Err(PaymentServiceError::InvalidSignature(_))),
        "expected InvalidSignature, got {result:?}"
    );
    assert_eq!(count::<webhook_events::Entity>(env.db()).await, 0);
}

#[tokio::test]
async fn expired_signature_timestamp_is_rejected() {
    let env = TestEnv::new().await;
    let payload = reference_payload("evt_old", "customer.created", json!({ "id": "cus_1" }));
    let header = signature::sign(SECRET, env.clock.now().timestamp() - 301, &payload).unwrap();

    let result = env
        .receive_webhook_uc()
        .execute(ReceiveWebhookInput {
            provider: "reference".to_owned(),
            payload,
            signature: Some(header),
        })
        .await;
    assert!(matches!(result, Err(PaymentServiceError::InvalidSignature(_))));
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let env = TestEnv::new().await;
    let result = env
        .receive_webhook_uc()
        .execute(ReceiveWebhookInput {
            provider: "acme".to_owned(),
            payload: "{}".to_owned(),
            signature: None,
        })
        .await;
    assert!(matches!(result, Err(PaymentServiceError::UnknownProvider(_))));
}

#[tokio::test]
async fn webhook_endpoint_acknowledges_signed_delivery() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    env.confirm(&intent, Simulation::SucceedLater).await;
    env.clock.advance(Duration::seconds(2));
    let delivery = env.reference().take_due().pop().unwrap();

    let server = TestServer::new(build_router(env.state.clone())).unwrap();
    let header = HeaderName::from_static(SIGNATURE_HEADER);

    let response = server
        .post("/webhooks/reference")
        .add_header(header.clone(), HeaderValue::from_str(&delivery.signature).unwrap())
        .text(delivery.payload.clone())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
    let event_id = body["eventId"].as_str().unwrap().to_owned();
    assert!(event_id.starts_with("evt_"));

    // Redelivery is acknowledged with the same id and changes nothing.
    let again = server
        .post("/webhooks/reference")
        .add_header(header.clone(), HeaderValue::from_str(&delivery.signature).unwrap())
        .text(delivery.payload.clone())
        .await;
    again.assert_status_ok();
    assert_eq!(again.json::<serde_json::Value>()["eventId"], event_id.as_str());
    assert_eq!(count::<payments::Entity>(env.db()).await, 1);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");

    let rejected = server
        .post("/webhooks/reference")
        .add_header(header.clone(), HeaderValue::from_static("t=1,v1=00"))
        .text(delivery.payload.clone())
        .await;
    rejected.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        rejected.json::<serde_json::Value>(),
        json!({ "error": "INVALID_SIGNATURE" })
    );

    let unknown = server
        .post("/webhooks/acme")
        .text(delivery.payload)
        .await;
    unknown.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(
        unknown.json::<serde_json::Value>(),
        json!({ "error": "UNKNOWN_PROVIDER" })
    );
}

#[tokio::test]
async fn webhook_endpoint_ignores_unhandled_event_types() {
    let env = TestEnv::new().await;
    let payload = reference_payload("evt_cus", "customer.created", json!({ "id": "cus_1" }));
    let header = signature::sign(SECRET, env.clock.now().timestamp(), &payload).unwrap();

    let server = TestServer::new(build_router(env.state.clone())).unwrap();
    let response = server
        .post("/webhooks/reference")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&header).unwrap(),
        )
        .text(payload)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>(), json!({ "received": true }));
    assert_eq!(count::<webhook_events::Entity>(env.db()).await, 0);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let env = TestEnv::new().await;
    let server = TestServer::new(build_router(env.state.clone())).unwrap();
    server.get("/healthz").await.assert_status_ok();
    server.get("/readyz").await.assert_status_ok();
}
