pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_orders;
mod m20260301_000002_create_payment_intents;
mod m20260301_000003_create_payments_and_refunds;
mod m20260301_000004_create_webhook_events;
mod m20260301_000005_create_payment_attempts;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_orders::Migration),
            Box::new(m20260301_000002_create_payment_intents::Migration),
            Box::new(m20260301_000003_create_payments_and_refunds::Migration),
            Box::new(m20260301_000004_create_webhook_events::Migration),
            Box::new(m20260301_000005_create_payment_attempts::Migration),
        ]
    }
}
