use sea_orm::entity::prelude::*;

/// Order as seen by the payment engine. Owned by the booking side; the engine
/// writes only the payment/refund bookkeeping columns and the
/// `PENDING_PAYMENT -> PENDING_HOST_CONFIRM` transition.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    pub refund_status: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_payment_status: Option<String>,
    pub last_payment_error: Option<String>,
    pub last_payment_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_status_logs::Entity")]
    StatusLogs,
    #[sea_orm(has_many = "super::payment_intents::Entity")]
    PaymentIntents,
    #[sea_orm(has_many = "super::payments::Entity")]
    Payments,
    #[sea_orm(has_many = "super::refunds::Entity")]
    Refunds,
}

impl Related<super::order_status_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusLogs.def()
    }
}

impl Related<super::payment_intents::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentIntents.def()
    }
}

impl Related<super::payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::refunds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Refunds.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
