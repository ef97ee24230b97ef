use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use payflow_domain::id::OrderId;
use payflow_domain::status::IntentStatus;
use payflow_payments::domain::provider::{ProviderKind, Simulation};
use payflow_payments::domain::repository::IntentRepository;
use payflow_payments::error::PaymentServiceError;
use payflow_payments::usecase::intent::{
    ConfirmIntentInput, CreateIntentInput, QueryIntentStatusUseCase,
};
use payflow_payments_schema::{order_status_logs, payment_attempts, payments, webhook_events};

use crate::helpers::{TestEnv, count};

#[tokio::test]
async fn should_settle_order_on_synchronous_success() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;

    let intent = env.create_intent(order_id, dec!(88.00)).await;
    assert_eq!(intent.status, IntentStatus::RequiresConfirmation);
    assert!(intent.provider_intent_id.starts_with("pi_"));
    assert!(intent.client_secret.is_some());

    let intent = env.confirm(&intent, Simulation::Succeed).await;
    assert_eq!(intent.status, IntentStatus::Succeeded);

    let all_payments = payments::Entity::find().all(env.db()).await.unwrap();
    assert_eq!(all_payments.len(), 1, "exactly one payment row");
    assert_eq!(all_payments[0].amount, dec!(88.00));
    assert_eq!(all_payments[0].intent_id, intent.id.0);
    assert!(all_payments[0].provider_txn_id.is_some());

    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "PAID");
    assert_eq!(order.status, "PENDING_HOST_CONFIRM");
    assert_eq!(order.last_payment_status.as_deref(), Some("succeeded"));

    let logs = order_status_logs::Entity::find().all(env.db()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].from_status, "PENDING_PAYMENT");
    assert_eq!(logs[0].to_status, "PENDING_HOST_CONFIRM");

    let synced = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert!(synced.event_id.starts_with(&format!("sync_{}_", intent.id)));
    assert_eq!(synced.status, "processed");
    assert_eq!(synced.payment_id, Some(all_payments[0].id));
    assert_eq!(synced.order_id, Some(order_id.0));
}

#[tokio::test]
async fn sync_result_and_real_webhook_converge() {
    let env = TestEnv::new().await;
    let (order_id, intent) = env.paid_order(dec!(88.00)).await;
    assert_eq!(env.reference().pending_webhooks(), 1);

    assert_eq!(env.flush_webhooks().await, 1);

    assert_eq!(count::<payments::Entity>(env.db()).await, 1);
    assert_eq!(count::<order_status_logs::Entity>(env.db()).await, 1);
    let events = webhook_events::Entity::find().all(env.db()).await.unwrap();
    assert_eq!(events.len(), 2, "sync event and provider webhook are distinct rows");
    assert!(events.iter().all(|e| e.status == "processed"));

    let stored = env
        .state
        .intent_repo()
        .find_by_id(intent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, IntentStatus::Succeeded);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn should_settle_through_delayed_webhook() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(120.50)).await;
    let intent = env.create_intent(order_id, dec!(120.50)).await;

    let intent = env.confirm(&intent, Simulation::SucceedLater).await;
    assert_eq!(intent.status, IntentStatus::Processing);
    assert_eq!(env.order(order_id).await.payment_status, "UNPAID");
    assert_eq!(count::<webhook_events::Entity>(env.db()).await, 0);

    assert_eq!(env.flush_webhooks().await, 1);

    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "PAID");
    assert_eq!(order.status, "PENDING_HOST_CONFIRM");
    let event = webhook_events::Entity::find().one(env.db()).await.unwrap().unwrap();
    assert!(event.event_id.starts_with("evt_"));
    assert!(event.signature.is_some());
    assert_eq!(event.intent_id, Some(intent.id.0));
}

#[tokio::test]
async fn should_record_synchronous_failure() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;

    let intent = env.confirm(&intent, Simulation::Fail).await;
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(
        intent.last_error.as_deref(),
        Some("card_declined: Your card was declined.")
    );

    let order = env.order(order_id).await;
    assert_eq!(order.payment_status, "UNPAID");
    assert_eq!(order.status, "PENDING_PAYMENT");
    assert_eq!(order.last_payment_status.as_deref(), Some("failed"));
    assert_eq!(count::<payments::Entity>(env.db()).await, 0);

    let attempts = payment_attempts::Entity::find().all(env.db()).await.unwrap();
    assert_eq!(attempts.len(), 2, "confirm call plus processed failure");
    assert!(attempts.iter().any(|a| a.kind == "confirm" && a.status == "failed"));
    assert!(
        attempts
            .iter()
            .any(|a| a.kind == "webhook" && a.error_code.as_deref() == Some("card_declined"))
    );

    // The provider's own failure webhook repeats the same error and changes nothing.
    assert_eq!(env.flush_webhooks().await, 1);
    assert_eq!(count::<payment_attempts::Entity>(env.db()).await, 2);
}

#[tokio::test]
async fn should_surface_required_action() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;

    let confirmed = env
        .confirm_intent_uc()
        .execute(ConfirmIntentInput {
            intent_id: intent.id,
            payment_method: None,
            simulate: Some(Simulation::RequireAction),
        })
        .await
        .unwrap();
    assert_eq!(confirmed.intent.status, IntentStatus::RequiresAction);
    assert!(confirmed.action_data.is_some());
    assert_eq!(
        env.order(order_id).await.last_payment_status.as_deref(),
        Some("requires_action")
    );

    // The payer completes the challenge and confirms again.
    env.clock.advance(chrono::Duration::seconds(1));
    let intent = env.confirm(&confirmed.intent, Simulation::Succeed).await;
    assert_eq!(intent.status, IntentStatus::Succeeded);
    assert_eq!(env.order(order_id).await.payment_status, "PAID");
}

#[tokio::test]
async fn confirming_succeeded_intent_returns_it_unchanged() {
    let env = TestEnv::new().await;
    let (_, intent) = env.paid_order(dec!(88.00)).await;

    let again = env.confirm(&intent, Simulation::Fail).await;
    assert_eq!(again.status, IntentStatus::Succeeded);
    assert_eq!(again.updated_at, intent.updated_at);
    assert_eq!(count::<payment_attempts::Entity>(env.db()).await, 1);
}

#[tokio::test]
async fn should_reject_price_mismatch() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;

    let result = env
        .create_intent_uc()
        .execute(CreateIntentInput {
            order_id,
            provider: ProviderKind::Reference,
            amount: dec!(80.00),
            currency: "CNY".to_owned(),
        })
        .await;

    match result {
        Err(PaymentServiceError::PriceMismatch { expected, actual }) => {
            assert_eq!(expected, dec!(88.00));
            assert_eq!(actual, dec!(80.00));
        }
        other => panic!("expected PriceMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn should_reject_invalid_amount_and_currency() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;

    for (amount, currency) in [(dec!(0), "CNY"), (dec!(88.001), "CNY"), (dec!(88.00), "yuan")] {
        let result = env
            .create_intent_uc()
            .execute(CreateIntentInput {
                order_id,
                provider: ProviderKind::Reference,
                amount,
                currency: currency.to_owned(),
            })
            .await;
        assert!(
            matches!(result, Err(PaymentServiceError::Validation(_))),
            "expected Validation for {amount} {currency}, got {result:?}"
        );
    }
}

#[tokio::test]
async fn should_reuse_intent_awaiting_confirmation() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;

    let first = env.create_intent(order_id, dec!(88.00)).await;
    let second = env.create_intent(order_id, dec!(88.00)).await;
    assert_eq!(first.id, second.id);
    assert_eq!(first.provider_intent_id, second.provider_intent_id);
}

#[tokio::test]
async fn should_reject_new_intent_while_one_is_processing() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    env.confirm(&intent, Simulation::SucceedLater).await;

    let result = env
        .create_intent_uc()
        .execute(CreateIntentInput {
            order_id,
            provider: ProviderKind::Reference,
            amount: dec!(88.00),
            currency: "CNY".to_owned(),
        })
        .await;
    assert!(
        matches!(result, Err(PaymentServiceError::IntentInProgress)),
        "expected IntentInProgress, got {result:?}"
    );
}

#[tokio::test]
async fn should_reject_intent_for_unknown_or_paid_order() {
    let env = TestEnv::new().await;

    let missing = env
        .create_intent_uc()
        .execute(CreateIntentInput {
            order_id: OrderId::new(),
            provider: ProviderKind::Reference,
            amount: dec!(88.00),
            currency: "CNY".to_owned(),
        })
        .await;
    assert!(matches!(missing, Err(PaymentServiceError::OrderNotFound)));

    let (order_id, _) = env.paid_order(dec!(88.00)).await;
    let paid = env
        .create_intent_uc()
        .execute(CreateIntentInput {
            order_id,
            provider: ProviderKind::Reference,
            amount: dec!(88.00),
            currency: "CNY".to_owned(),
        })
        .await;
    assert!(matches!(paid, Err(PaymentServiceError::InvalidState(_))));
}

#[tokio::test]
async fn unconfigured_provider_reports_not_configured() {
    let env = TestEnv::with_secret(None).await;
    let order_id = env.seed_order(dec!(88.00)).await;

    let result = env
        .create_intent_uc()
        .execute(CreateIntentInput {
            order_id,
            provider: ProviderKind::Reference,
            amount: dec!(88.00),
            currency: "CNY".to_owned(),
        })
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), "NOT_CONFIGURED");
}

#[tokio::test]
async fn status_query_reports_provider_view() {
    let env = TestEnv::new().await;
    let order_id = env.seed_order(dec!(88.00)).await;
    let intent = env.create_intent(order_id, dec!(88.00)).await;
    env.confirm(&intent, Simulation::SucceedLater).await;

    let usecase = QueryIntentStatusUseCase {
        intents: env.state.intent_repo(),
        providers: env.state.providers.clone(),
    };
    let view = usecase.execute(intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Processing);
    assert_eq!(
        view.provider_status.as_ref().map(|p| p.status),
        Some(IntentStatus::Processing)
    );
    assert!(!view.diverged());

    // Provider settles; the engine has not heard yet.
    env.clock.advance(chrono::Duration::seconds(5));
    let due = env.reference().take_due();
    assert_eq!(due.len(), 1);
    let view = usecase.execute(intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Processing);
    assert!(view.diverged());

    let filtered = webhook_events::Entity::find()
        .filter(webhook_events::Column::IntentId.eq(intent.id.0))
        .all(env.db())
        .await
        .unwrap();
    assert!(filtered.is_empty(), "query never writes events");
}
