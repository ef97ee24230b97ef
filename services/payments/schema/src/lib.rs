pub mod order_status_logs;
pub mod orders;
pub mod payment_attempts;
pub mod payment_intents;
pub mod payments;
pub mod refunds;
pub mod webhook_events;
