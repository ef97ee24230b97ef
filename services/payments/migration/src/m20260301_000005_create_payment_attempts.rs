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
                    .table(PaymentAttempts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentAttempts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentAttempts::OrderId).uuid().not_null())
                    .col(ColumnDef::new(PaymentAttempts::IntentId).uuid())
                    .col(ColumnDef::new(PaymentAttempts::RefundId).uuid())
                    .col(ColumnDef::new(PaymentAttempts::Provider).string().not_null())
                    .col(ColumnDef::new(PaymentAttempts::Kind).string().not_null())
                    .col(ColumnDef::new(PaymentAttempts::Status).string().not_null())
                    .col(ColumnDef::new(PaymentAttempts::ErrorCode).string())
                    .col(ColumnDef::new(PaymentAttempts::ErrorMessage).text())
                    .col(
                        ColumnDef::new(PaymentAttempts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(PaymentAttempts::Table, PaymentAttempts::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(PaymentAttempts::Table)
                    .col(PaymentAttempts::OrderId)
                    .name("idx_payment_attempts_order_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PaymentAttempts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PaymentAttempts {
    Table,
    Id,
    OrderId,
    IntentId,
    RefundId,
    Provider,
    Kind,
    Status,
    ErrorCode,
    ErrorMessage,
    CreatedAt,
}
