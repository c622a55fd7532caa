use crate::entity_iden::EntityIden;
use model::entities::meter_reading;
use model::entities::prelude::*;
use sea_orm_migration::prelude::*;

/// Index backing the "latest verified reading before a timestamp" lookup
/// that consumption is computed from.
#[derive(DeriveMigrationName)]
pub struct Migration;

const INDEX_NAME: &str = "idx_meter_readings_user_type_date";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name(INDEX_NAME)
                    .table(MeterReading::table())
                    .col(MeterReading::column(meter_reading::Column::UserId))
                    .col(MeterReading::column(meter_reading::Column::MeterType))
                    .col(MeterReading::column(meter_reading::Column::ReadingDate))
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name(INDEX_NAME)
                    .table(MeterReading::table())
                    .to_owned(),
            )
            .await
    }
}
