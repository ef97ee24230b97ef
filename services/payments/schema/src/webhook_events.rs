use sea_orm::entity::prelude::*;

/// Every inbound or synthesized event, deduplicated on `(provider, event_id)`.
/// Rows are never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    /// Normalized event as JSON; replay rebuilds the event from here.
    pub payload: Json,
    pub signature: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub order_id: Option<Uuid>,
    pub intent_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub refund_id: Option<Uuid>,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
