use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

use model::entities::{MeterType, UserRole};

use crate::clock::FixedClock;
use crate::invoice::InvoiceGenerator;
use crate::policy::Caller;
use crate::rates::RateTable;
use crate::readings::{submit_reading, verify_reading, NewReading};
use crate::testing::helpers::{new_user, setup_db, ts};

#[tokio::test]
async fn test_scenario_electricity() {
    let db = setup_db().await.unwrap();
    let clock = Arc::new(FixedClock::new(ts(3, 10)));
    let generator = InvoiceGenerator::new(RateTable::default(), clock.clone());

    let resident = new_user(&db, "resident@example.com", UserRole::Resident).await.unwrap();
    let admin = new_user(&db, "admin@example.com", UserRole::Admin).await.unwrap();
    let resident = Caller::new(resident.id, resident.role);
    let admin = Caller::new(admin.id, admin.role);

    let reading = NewReading {
        meter_type: MeterType::Electricity,
        reading_value: Decimal::new(50, 0),
        image_url: "/uploads/electricity.png".to_string(),
    };
    let reading = submit_reading(&db, clock.as_ref(), &resident, reading).await.unwrap();

    // Unverified readings are not invoiced
    let report = generator.generate_for_user(&db, resident.id).await.unwrap();
    assert!(report.invoices.is_empty());

    clock.advance(Duration::hours(2));
    verify_reading(&db, clock.as_ref(), &admin, reading.id).await.unwrap();

    let report = generator.generate_for_user(&db, resident.id).await.unwrap();
    assert_eq!(report.invoices.len(), 1);
    let invoice = &report.invoices[0];
    assert_eq!(invoice.user_id, resident.id);
    assert_eq!(invoice.consumption, Decimal::new(50, 0));
    assert_eq!(invoice.rate.round_dp(2), Decimal::new(15, 2));
    assert_eq!(invoice.amount.round_dp(2), Decimal::new(750, 2));
    assert!(!invoice.paid);
}
