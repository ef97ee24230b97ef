use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Orders::Amount).decimal_len(12, 2).not_null())
                    .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                    .col(ColumnDef::new(Orders::Status).string().not_null())
                    .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                    .col(ColumnDef::new(Orders::RefundStatus).string())
                    .col(ColumnDef::new(Orders::RefundAmount).decimal_len(12, 2))
                    .col(ColumnDef::new(Orders::RefundedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Orders::LastPaymentStatus).string())
                    .col(ColumnDef::new(Orders::LastPaymentError).text())
                    .col(ColumnDef::new(Orders::LastPaymentAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderStatusLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderStatusLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OrderStatusLogs::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderStatusLogs::FromStatus).string().not_null())
                    .col(ColumnDef::new(OrderStatusLogs::ToStatus).string().not_null())
                    .col(ColumnDef::new(OrderStatusLogs::Reason).string().not_null())
                    .col(
                        ColumnDef::new(OrderStatusLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(OrderStatusLogs::Table, OrderStatusLogs::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(OrderStatusLogs::Table)
                    .col(OrderStatusLogs::OrderId)
                    .name("idx_order_status_logs_order_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderStatusLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub(crate) enum Orders {
    Table,
    Id,
    Amount,
    Currency,
    Status,
    PaymentStatus,
    RefundStatus,
    RefundAmount,
    RefundedAt,
    LastPaymentStatus,
    LastPaymentError,
    LastPaymentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum OrderStatusLogs {
    Table,
    Id,
    OrderId,
    FromStatus,
    ToStatus,
    Reason,
    CreatedAt,
}
