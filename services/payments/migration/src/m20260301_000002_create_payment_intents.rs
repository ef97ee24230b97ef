use sea_orm_migration::prelude::*;

use crate::m20260301_000001_create_orders::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PaymentIntents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentIntents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentIntents::OrderId).uuid().not_null())
                    .col(ColumnDef::new(PaymentIntents::Provider).string().not_null())
                    .col(
                        ColumnDef::new(PaymentIntents::ProviderIntentId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentIntents::Amount)
                            .decimal_len(12, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentIntents::Currency)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PaymentIntents::Status).string().not_null())
                    .col(
                        ColumnDef::new(PaymentIntents::IdempotencyKey)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(PaymentIntents::ClientSecret).string())
                    .col(ColumnDef::new(PaymentIntents::LastError).text())
                    .col(
                        ColumnDef::new(PaymentIntents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentIntents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(PaymentIntents::Table, PaymentIntents::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(PaymentIntents::Table)
                    .col(PaymentIntents::Provider)
                    .col(PaymentIntents::ProviderIntentId)
                    .unique()
                    .name("uq_payment_intents_provider_intent")
                    .to_owned(),
            )
            .await?;

        // expiry sweep and open-intent lookups
        manager
            .create_index(
                Index::create()
                    .table(PaymentIntents::Table)
                    .col(PaymentIntents::OrderId)
                    .col(PaymentIntents::Status)
                    .name("idx_payment_intents_order_status")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(PaymentIntents::Table)
                    .col(PaymentIntents::Status)
                    .col(PaymentIntents::UpdatedAt)
                    .name("idx_payment_intents_status_updated_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub(crate) enum PaymentIntents {
    Table,
    Id,
    OrderId,
    Provider,
    ProviderIntentId,
    Amount,
    Currency,
    Status,
    IdempotencyKey,
    ClientSecret,
    LastError,
    CreatedAt,
    UpdatedAt,
}
