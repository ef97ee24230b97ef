pub mod event_store;
pub mod intent;
pub mod reconcile;
pub mod refund;
pub mod webhook;
