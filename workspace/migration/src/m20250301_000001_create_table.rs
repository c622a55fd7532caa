use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id))
                    .col(string(Users::Email).unique_key())
                    .col(string(Users::HashedPassword))
                    .col(string(Users::FullName))
                    .col(string(Users::Role).string_len(20))
                    .col(string_null(Users::ApartmentNumber).string_len(50))
                    .col(boolean(Users::IsActive).default(true))
                    .col(timestamp_with_time_zone(Users::CreatedAt))
                    .col(timestamp_with_time_zone_null(Users::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // Create meter_readings table
        manager
            .create_table(
                Table::create()
                    .table(MeterReadings::Table)
                    .if_not_exists()
                    .col(pk_auto(MeterReadings::Id))
                    .col(integer(MeterReadings::UserId))
                    .col(string(MeterReadings::MeterType).string_len(20))
                    .col(decimal(MeterReadings::ReadingValue).decimal_len(16, 4))
                    .col(string(MeterReadings::ImageUrl).string_len(500))
                    .col(timestamp_with_time_zone(MeterReadings::ReadingDate))
                    .col(boolean(MeterReadings::Verified).default(false))
                    .col(integer_null(MeterReadings::VerifiedBy))
                    .col(timestamp_with_time_zone_null(MeterReadings::VerifiedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_meter_readings_submitter")
                            .from(MeterReadings::Table, MeterReadings::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_meter_readings_verifier")
                            .from(MeterReadings::Table, MeterReadings::VerifiedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create invoices table; one invoice per reading is enforced here
        manager
            .create_table(
                Table::create()
                    .table(Invoices::Table)
                    .if_not_exists()
                    .col(pk_auto(Invoices::Id))
                    .col(integer(Invoices::UserId))
                    .col(integer(Invoices::MeterReadingId).unique_key())
                    .col(string(Invoices::InvoiceNumber).string_len(100).unique_key())
                    .col(decimal(Invoices::Amount).decimal_len(16, 2))
                    .col(decimal(Invoices::Consumption).decimal_len(16, 4))
                    .col(decimal(Invoices::Rate).decimal_len(16, 4))
                    .col(timestamp_with_time_zone(Invoices::IssueDate))
                    .col(timestamp_with_time_zone(Invoices::DueDate))
                    .col(boolean(Invoices::Paid).default(false))
                    .col(timestamp_with_time_zone_null(Invoices::PaidAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invoices_user")
                            .from(Invoices::Table, Invoices::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invoices_meter_reading")
                            .from(Invoices::Table, Invoices::MeterReadingId)
                            .to(MeterReadings::Table, MeterReadings::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Invoices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MeterReadings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    HashedPassword,
    FullName,
    Role,
    ApartmentNumber,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MeterReadings {
    Table,
    Id,
    UserId,
    MeterType,
    ReadingValue,
    ImageUrl,
    ReadingDate,
    Verified,
    VerifiedBy,
    VerifiedAt,
}

#[derive(DeriveIden)]
enum Invoices {
    Table,
    Id,
    UserId,
    MeterReadingId,
    InvoiceNumber,
    Amount,
    Consumption,
    Rate,
    IssueDate,
    DueDate,
    Paid,
    PaidAt,
}
