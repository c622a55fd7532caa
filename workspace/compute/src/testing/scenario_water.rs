//! A resident submits two water readings a day apart; a manager verifies and
//! invoices them in two rounds.

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

use model::entities::{MeterType, UserRole};

use crate::billing::{invoice_summary, pay_invoice};
use crate::clock::{Clock, FixedClock};
use crate::invoice::InvoiceGenerator;
use crate::policy::{Caller, ListScope};
use crate::rates::RateTable;
use crate::readings::{submit_reading, verify_reading, NewReading};
use crate::testing::helpers::{new_user, setup_db, ts};

fn water(value: i64) -> NewReading {
    NewReading {
        meter_type: MeterType::Water,
        reading_value: Decimal::new(value, 0),
        image_url: "/uploads/water.jpg".to_string(),
    }
}

#[tokio::test]
async fn test_scenario_water() {
    let db = setup_db().await.unwrap();
    let clock = Arc::new(FixedClock::new(ts(1, 8)));
    let generator = InvoiceGenerator::new(RateTable::default(), clock.clone());

    let resident = new_user(&db, "resident@example.com", UserRole::Resident).await.unwrap();
    let manager = new_user(&db, "manager@example.com", UserRole::Manager).await.unwrap();
    let resident = Caller::new(resident.id, resident.role);
    let manager = Caller::new(manager.id, manager.role);

    // Day 1: first reading, billed on its absolute value
    let first = submit_reading(&db, clock.as_ref(), &resident, water(100)).await.unwrap();
    verify_reading(&db, clock.as_ref(), &manager, first.id).await.unwrap();
    let report = generator.generate_for_all_eligible(&db).await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.invoices.len(), 1);
    let i1 = report.invoices[0].clone();
    assert_eq!(i1.meter_reading_id, first.id);
    assert_eq!(i1.amount.round_dp(2), Decimal::new(55000, 2));
    assert_eq!(i1.due_date, clock.now() + Duration::days(30));

    // Day 2: the delta against the first reading is billed
    clock.advance(Duration::days(1));
    let second = submit_reading(&db, clock.as_ref(), &resident, water(130)).await.unwrap();
    verify_reading(&db, clock.as_ref(), &manager, second.id).await.unwrap();
    let report = generator.generate_for_all_eligible(&db).await.unwrap();
    assert_eq!(report.invoices.len(), 1, "I1 must not be regenerated");
    let i2 = &report.invoices[0];
    assert_eq!(i2.meter_reading_id, second.id);
    assert_eq!(i2.consumption, Decimal::new(30, 0));
    assert_eq!(i2.amount.round_dp(2), Decimal::new(16500, 2));
    assert_ne!(i1.invoice_number, i2.invoice_number);

    // The resident pays the first invoice
    pay_invoice(&db, &generator, &resident, i1.id).await.unwrap();
    let summary = invoice_summary(&db, ListScope::Owner(resident.id)).await.unwrap();
    assert_eq!(summary.total_invoices, 2);
    assert_eq!(summary.paid_amount, Decimal::new(55000, 2));
    assert_eq!(summary.pending_amount, Decimal::new(16500, 2));
}
