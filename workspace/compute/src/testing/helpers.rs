use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, Set};

use migration::{Migrator, MigratorTrait};
use model::entities::{invoice, meter_reading, user, MeterType, UserRole};

pub type Result<T> = std::result::Result<T, DbErr>;

pub async fn setup_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    db.execute_unprepared("PRAGMA foreign_keys = ON;").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// `2025-01-<day>` at `<hour>:00` UTC.
pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0)
        .single()
        .map(|d| d + Duration::hours(hour as i64))
        .expect("valid test date")
}

pub async fn new_user(db: &DatabaseConnection, email: &str, role: UserRole) -> Result<user::Model> {
    let apartment = match role {
        UserRole::Resident => Some("1A".to_string()),
        _ => None,
    };

    user::ActiveModel {
        email: Set(email.to_string()),
        hashed_password: Set("not-a-real-hash".to_string()),
        full_name: Set(email.split('@').next().unwrap_or(email).to_string()),
        role: Set(role),
        apartment_number: Set(apartment),
        is_active: Set(true),
        created_at: Set(ts(1, 0)),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn new_reading(
    db: &DatabaseConnection,
    owner: &user::Model,
    meter_type: MeterType,
    value: i64,
    reading_date: DateTime<Utc>,
    verified: bool,
) -> Result<meter_reading::Model> {
    meter_reading::ActiveModel {
        user_id: Set(owner.id),
        meter_type: Set(meter_type),
        reading_value: Set(Decimal::new(value, 0)),
        image_url: Set("/uploads/test.jpg".to_string()),
        reading_date: Set(reading_date),
        verified: Set(verified),
        verified_by: Set(None),
        verified_at: Set(verified.then_some(reading_date)),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// An unpaid 1.00 invoice for `reading` with a fixed number.
pub async fn new_invoice(
    db: &DatabaseConnection,
    reading: &meter_reading::Model,
    invoice_number: &str,
) -> Result<invoice::Model> {
    invoice::ActiveModel {
        user_id: Set(reading.user_id),
        meter_reading_id: Set(reading.id),
        invoice_number: Set(invoice_number.to_string()),
        amount: Set(Decimal::new(100, 2)),
        consumption: Set(Decimal::new(1, 0)),
        rate: Set(Decimal::new(100, 2)),
        issue_date: Set(reading.reading_date),
        due_date: Set(reading.reading_date + Duration::days(30)),
        paid: Set(false),
        paid_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
}
