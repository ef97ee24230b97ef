use axum::http::StatusCode;
use axum_test::TestServer;
use rust_decimal_macros::dec;
use serde_json::{Value, json};

use payflow_payments::router::build_router;

use crate::helpers::TestEnv;

#[tokio::test]
async fn checkout_and_refund_over_http() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let server = TestServer::new(build_router(env.state.clone())).unwrap();

    let created = server
        .post("/payments/intents")
        .json(&json!({ "orderId": order_id, "amount": 88.0, "currency": "cny" }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let intent: Value = created.json();
    assert_eq!(intent["status"], "requires_confirmation");
    assert_eq!(intent["provider"], "reference");
    assert_eq!(intent["amount"], 88.0);
    assert!(intent["createdAt"].as_str().unwrap().ends_with('Z'));
    let intent_id = intent["id"].as_str().unwrap().to_owned();

    let confirmed = server
        .post(&format!("/payments/intents/{intent_id}/confirm"))
        .json(&json!({ "paymentMethod": "pm_card_visa", "simulate": "succeed" }))
        .await;
    confirmed.assert_status_ok();
    assert_eq!(confirmed.json::<Value>()["status"], "succeeded");

    let fetched = server.get(&format!("/payments/intents/{intent_id}")).await;
    fetched.assert_status_ok();
    let fetched: Value = fetched.json();
    assert_eq!(fetched["status"], "succeeded");
    assert_eq!(fetched["providerStatus"], "succeeded");

    let refund = server
        .post(&format!("/orders/{order_id}/refunds"))
        .json(&json!({ "amount": 88.0, "reason": "changed plans" }))
        .await;
    refund.assert_status(StatusCode::CREATED);
    let refund: Value = refund.json();
    assert_eq!(refund["status"], "processing");
    assert_eq!(refund["orderId"], order_id.to_string());
}

#[tokio::test]
async fn errors_carry_kind_and_status() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let server = TestServer::new(build_router(env.state.clone())).unwrap();

    let mismatch = server
        .post("/payments/intents")
        .json(&json!({ "orderId": order_id, "amount": 1.0, "currency": "CNY" }))
        .await;
    mismatch.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(mismatch.json::<Value>()["kind"], "PRICE_MISMATCH");

    let missing = server
        .get("/payments/intents/0195f0c4-6a4e-7000-8000-000000000000")
        .await;
    missing.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(missing.json::<Value>()["kind"], "INTENT_NOT_FOUND");

    let retry = server
        .post("/refunds/0195f0c4-6a4e-7000-8000-000000000000/retry")
        .await;
    retry.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(retry.json::<Value>()["kind"], "REFUND_NOT_FOUND");
}

#[tokio::test]
async fn confirm_accepts_empty_body() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(42.00)).await;
    let intent = env.create_intent(order_id, dec!(42.00)).await;
    let server = TestServer::new(build_router(env.state.clone())).unwrap();

    let response = server
        .post(&format!("/payments/intents/{}/confirm", intent.id))
        .await;
    response.assert_status_ok();
    // Default simulation settles later through a webhook.
    assert_eq!(response.json::<Value>()["status"], "processing");
}
