use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookEvents::Provider).string().not_null())
                    .col(ColumnDef::new(WebhookEvents::EventId).string().not_null())
                    .col(ColumnDef::new(WebhookEvents::EventType).string().not_null())
                    .col(ColumnDef::new(WebhookEvents::Payload).json_binary().not_null())
                    .col(ColumnDef::new(WebhookEvents::Signature).text())
                    .col(ColumnDef::new(WebhookEvents::Status).string().not_null())
                    .col(
                        ColumnDef::new(WebhookEvents::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WebhookEvents::LastError).text())
                    .col(ColumnDef::new(WebhookEvents::OrderId).uuid())
                    .col(ColumnDef::new(WebhookEvents::IntentId).uuid())
                    .col(ColumnDef::new(WebhookEvents::PaymentId).uuid())
                    .col(ColumnDef::new(WebhookEvents::RefundId).uuid())
                    .col(
                        ColumnDef::new(WebhookEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookEvents::ProcessedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(WebhookEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // dedup key for insert-if-absent
        manager
            .create_index(
                Index::create()
                    .table(WebhookEvents::Table)
                    .col(WebhookEvents::Provider)
                    .col(WebhookEvents::EventId)
                    .unique()
                    .name("uq_webhook_events_provider_event")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(WebhookEvents::Table)
                    .col(WebhookEvents::Status)
                    .col(WebhookEvents::RetryCount)
                    .name("idx_webhook_events_status_retry")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WebhookEvents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum WebhookEvents {
    Table,
    Id,
    Provider,
    EventId,
    EventType,
    Payload,
    Signature,
    Status,
    RetryCount,
    LastError,
    OrderId,
    IntentId,
    PaymentId,
    RefundId,
    ReceivedAt,
    ProcessedAt,
    UpdatedAt,
}
