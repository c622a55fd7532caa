use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

use super::{meter_reading, user};

/// A bill derived from one verified reading.
///
/// `consumption` and `rate` are frozen copies of the values that produced
/// `amount`; a later rate change never touches an existing row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    /// At most one invoice per reading, backed by a unique index.
    #[sea_orm(unique)]
    pub meter_reading_id: i32,
    #[sea_orm(unique)]
    pub invoice_number: String,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub consumption: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub rate: Decimal,
    pub issue_date: DateTimeUtc,
    pub due_date: DateTimeUtc,
    #[sea_orm(default_value = "false")]
    pub paid: bool,
    pub paid_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::meter_reading::Entity",
        from = "Column::MeterReadingId",
        to = "super::meter_reading::Column::Id",
        on_delete = "Restrict"
    )]
    MeterReading,
}

impl Related<user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<meter_reading::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeterReading.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
