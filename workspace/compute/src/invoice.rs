//! Turns verified meter readings into invoices.

use chrono::{DateTime, Duration, Utc};
use model::entities::{invoice, meter_reading, user};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::clock::Clock;
use crate::consumption::{compute_consumption, find_previous_reading};
use crate::error::{ComputeError, Result};
use crate::invoice_number::generate_invoice_number;
use crate::rates::{fits_decimal, RateTable, QUANTITY_DIGITS};

/// Days between issue date and due date unless configured otherwise.
pub const DEFAULT_DUE_DAYS: i64 = 30;

/// How many fresh invoice numbers are tried before giving up on an insert.
const MAX_NUMBER_ATTEMPTS: usize = 5;

/// An invoice computed for a reading but not stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDraft {
    pub user_id: i32,
    pub meter_reading_id: i32,
    pub invoice_number: String,
    pub amount: Decimal,
    pub consumption: Decimal,
    pub rate: Decimal,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl InvoiceDraft {
    fn into_active_model(self) -> invoice::ActiveModel {
        invoice::ActiveModel {
            user_id: Set(self.user_id),
            meter_reading_id: Set(self.meter_reading_id),
            invoice_number: Set(self.invoice_number),
            amount: Set(self.amount),
            consumption: Set(self.consumption),
            rate: Set(self.rate),
            issue_date: Set(self.issue_date),
            due_date: Set(self.due_date),
            paid: Set(false),
            paid_at: Set(None),
            ..Default::default()
        }
    }
}

/// A reading that could not be invoiced during a batch run.
#[derive(Debug)]
pub struct BatchFailure {
    pub meter_reading_id: i32,
    pub error: ComputeError,
}

/// Outcome of a bulk generation run.
///
/// Items are independent: invoices stored before a failing item stay stored,
/// and the run continues with the next reading.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub invoices: Vec<invoice::Model>,
    pub failures: Vec<BatchFailure>,
}

/// Which unique index rejected an insert.
enum UniqueViolation {
    MeterReading,
    InvoiceNumber,
}

fn unique_violation(err: &DbErr) -> Option<UniqueViolation> {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            if message.contains("meter_reading_id") {
                Some(UniqueViolation::MeterReading)
            } else if message.contains("invoice_number") {
                Some(UniqueViolation::InvoiceNumber)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Prices verified readings and stores the resulting invoices.
///
/// The generator does not check roles; callers run the authorization policy
/// first.
#[derive(Debug, Clone)]
pub struct InvoiceGenerator {
    rates: RateTable,
    clock: Arc<dyn Clock>,
    due_in: Duration,
}

impl InvoiceGenerator {
    pub fn new(rates: RateTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            rates,
            clock,
            due_in: Duration::days(DEFAULT_DUE_DAYS),
        }
    }

    pub fn with_due_days(mut self, days: i64) -> Self {
        self.due_in = Duration::days(days);
        self
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Computes the invoice for one verified reading without storing it.
    #[instrument(skip(self, db, reading), fields(reading_id = reading.id))]
    pub async fn generate_for_reading<C: ConnectionTrait>(
        &self,
        db: &C,
        reading: &meter_reading::Model,
    ) -> Result<InvoiceDraft> {
        if !reading.verified {
            return Err(ComputeError::Validation(format!(
                "Reading {} is not verified",
                reading.id
            )));
        }

        let previous =
            find_previous_reading(db, reading.user_id, reading.meter_type, reading.reading_date)
                .await?;
        let consumption = compute_consumption(reading, previous.as_ref());
        let rate = self.rates.rate(reading.meter_type);
        if !fits_decimal(rate, QUANTITY_DIGITS) || !fits_decimal(consumption, QUANTITY_DIGITS) {
            return Err(ComputeError::Validation(format!(
                "Reading {} cannot be priced: consumption {} at rate {} is out of range",
                reading.id, consumption, rate
            )));
        }
        let amount = self.rates.price(consumption, reading.meter_type)?;
        let now = self.clock.now();

        debug!(
            previous_id = ?previous.as_ref().map(|p| p.id),
            %consumption,
            %rate,
            %amount,
            "Priced reading"
        );

        Ok(InvoiceDraft {
            user_id: reading.user_id,
            meter_reading_id: reading.id,
            invoice_number: generate_invoice_number(now),
            amount,
            consumption,
            rate,
            issue_date: now,
            due_date: now + self.due_in,
        })
    }

    /// Invoices every verified reading that has no invoice yet, in ascending
    /// reading id order.
    #[instrument(skip(self, db))]
    pub async fn generate_for_all_eligible<C: ConnectionTrait>(&self, db: &C) -> Result<BatchReport> {
        let readings = eligible_readings(db, None).await?;
        info!("Found {} readings eligible for invoicing", readings.len());
        Ok(self.generate_batch(db, readings).await)
    }

    /// Same as [`Self::generate_for_all_eligible`], limited to one user's readings.
    #[instrument(skip(self, db))]
    pub async fn generate_for_user<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
    ) -> Result<BatchReport> {
        if user::Entity::find_by_id(user_id).one(db).await?.is_none() {
            return Err(ComputeError::not_found(format!("User {}", user_id)));
        }

        let readings = eligible_readings(db, Some(user_id)).await?;
        info!(
            "Found {} readings eligible for invoicing for user {}",
            readings.len(),
            user_id
        );
        Ok(self.generate_batch(db, readings).await)
    }

    /// Flips an invoice to paid, stamping `paid_at` with the current time.
    ///
    /// The update only matches unpaid rows, so a second call (or a concurrent
    /// one) is reported as a conflict and leaves `paid_at` untouched.
    #[instrument(skip(self, db))]
    pub async fn mark_paid<C: ConnectionTrait>(&self, db: &C, invoice_id: i32) -> Result<invoice::Model> {
        let result = invoice::Entity::update_many()
            .col_expr(invoice::Column::Paid, Expr::value(true))
            .col_expr(invoice::Column::PaidAt, Expr::value(self.clock.now()))
            .filter(invoice::Column::Id.eq(invoice_id))
            .filter(invoice::Column::Paid.eq(false))
            .exec(db)
            .await?;

        let invoice = invoice::Entity::find_by_id(invoice_id)
            .one(db)
            .await?
            .ok_or_else(|| ComputeError::not_found(format!("Invoice {}", invoice_id)))?;

        if result.rows_affected == 0 {
            return Err(ComputeError::Conflict(format!(
                "Invoice {} is already paid",
                invoice.invoice_number
            )));
        }

        info!("Invoice {} marked as paid", invoice.invoice_number);
        Ok(invoice)
    }

    async fn generate_batch<C: ConnectionTrait>(
        &self,
        db: &C,
        readings: Vec<meter_reading::Model>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for reading in readings {
            let outcome = match self.generate_for_reading(db, &reading).await {
                Ok(draft) => self.persist(db, draft).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(invoice) => {
                    debug!(
                        "Created invoice {} for reading {}",
                        invoice.invoice_number, reading.id
                    );
                    report.invoices.push(invoice);
                }
                Err(error) => {
                    debug!("Skipping reading {}: {}", reading.id, error);
                    report.failures.push(BatchFailure {
                        meter_reading_id: reading.id,
                        error,
                    });
                }
            }
        }

        info!(
            "Invoice batch finished: {} created, {} failed",
            report.invoices.len(),
            report.failures.len()
        );
        report
    }

    /// Inserts a draft. The unique index on `meter_reading_id` turns a
    /// concurrent duplicate into a conflict; an invoice number collision is
    /// retried with a fresh number.
    async fn persist<C: ConnectionTrait>(&self, db: &C, mut draft: InvoiceDraft) -> Result<invoice::Model> {
        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            match draft.clone().into_active_model().insert(db).await {
                Ok(invoice) => return Ok(invoice),
                Err(err) => match unique_violation(&err) {
                    Some(UniqueViolation::MeterReading) => {
                        return Err(ComputeError::Conflict(format!(
                            "Reading {} already has an invoice",
                            draft.meter_reading_id
                        )));
                    }
                    Some(UniqueViolation::InvoiceNumber) => {
                        debug!(
                            attempt,
                            "Invoice number {} already taken, retrying", draft.invoice_number
                        );
                        draft.invoice_number = generate_invoice_number(self.clock.now());
                    }
                    None => return Err(err.into()),
                },
            }
        }

        Err(ComputeError::Conflict(format!(
            "Could not allocate a unique invoice number for reading {}",
            draft.meter_reading_id
        )))
    }
}

/// Verified readings without an invoice, oldest id first.
async fn eligible_readings<C: ConnectionTrait>(
    db: &C,
    user_id: Option<i32>,
) -> Result<Vec<meter_reading::Model>> {
    let mut query = meter_reading::Entity::find()
        .left_join(invoice::Entity)
        .filter(meter_reading::Column::Verified.eq(true))
        .filter(invoice::Column::Id.is_null());

    if let Some(user_id) = user_id {
        query = query.filter(meter_reading::Column::UserId.eq(user_id));
    }

    Ok(query
        .order_by_asc(meter_reading::Column::Id)
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::helpers::{new_invoice, new_reading, new_user, setup_db, ts};
    use model::entities::{MeterType, UserRole};
    use sea_orm::PaginatorTrait;
    use std::collections::HashSet;

    fn generator(clock: Arc<FixedClock>) -> InvoiceGenerator {
        InvoiceGenerator::new(RateTable::default(), clock)
    }

    #[tokio::test]
    async fn test_generate_for_reading_first_reading() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let reading = new_reading(&db, &alice, MeterType::Water, 100, ts(1, 0), true).await.unwrap();

        let draft = generator(clock).generate_for_reading(&db, &reading).await.unwrap();

        assert_eq!(draft.user_id, alice.id);
        assert_eq!(draft.meter_reading_id, reading.id);
        assert_eq!(draft.consumption, Decimal::new(100, 0));
        assert_eq!(draft.rate, Decimal::new(550, 2));
        assert_eq!(draft.amount, Decimal::new(55000, 2));
        assert_eq!(draft.issue_date, ts(10, 0));
        assert_eq!(draft.due_date, ts(10, 0) + Duration::days(30));
        assert!(draft.invoice_number.starts_with("INV-"));

        // Nothing is stored by the draft
        assert!(invoice::Entity::find().all(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_for_reading_rejects_unverified() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let reading = new_reading(&db, &alice, MeterType::Water, 100, ts(1, 0), false).await.unwrap();

        let result = generator(clock).generate_for_reading(&db, &reading).await;
        assert!(matches!(result, Err(ComputeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_generate_for_reading_negative_consumption() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        new_reading(&db, &alice, MeterType::Water, 130, ts(1, 0), true).await.unwrap();
        let lower = new_reading(&db, &alice, MeterType::Water, 100, ts(2, 0), true).await.unwrap();

        let draft = generator(clock).generate_for_reading(&db, &lower).await.unwrap();
        assert_eq!(draft.consumption, Decimal::new(-30, 0));
        assert_eq!(draft.amount, Decimal::new(-16500, 2));
    }

    #[tokio::test]
    async fn test_custom_due_days() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let reading = new_reading(&db, &alice, MeterType::Water, 1, ts(1, 0), true).await.unwrap();

        let draft = generator(clock)
            .with_due_days(14)
            .generate_for_reading(&db, &reading)
            .await
            .unwrap();
        assert_eq!(draft.due_date, ts(10, 0) + Duration::days(14));
    }

    #[tokio::test]
    async fn test_generate_for_all_eligible_skips_invoiced_and_unverified() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let bob = new_user(&db, "bob@example.com", UserRole::Resident).await.unwrap();

        let invoiced = new_reading(&db, &alice, MeterType::Water, 100, ts(1, 0), true).await.unwrap();
        new_invoice(&db, &invoiced, "INV-20250101-AAAAAA").await.unwrap();
        let alice_second = new_reading(&db, &alice, MeterType::Water, 140, ts(2, 0), true).await.unwrap();
        new_reading(&db, &alice, MeterType::Water, 150, ts(3, 0), false).await.unwrap();
        let bob_first = new_reading(&db, &bob, MeterType::Electricity, 50, ts(1, 0), true).await.unwrap();

        let generator = generator(clock);
        let report = generator.generate_for_all_eligible(&db).await.unwrap();

        assert!(report.failures.is_empty());
        let reading_ids: Vec<i32> = report.invoices.iter().map(|i| i.meter_reading_id).collect();
        assert_eq!(reading_ids, vec![alice_second.id, bob_first.id]);

        let alice_invoice = &report.invoices[0];
        assert_eq!(alice_invoice.consumption, Decimal::new(40, 0));
        assert_eq!(alice_invoice.amount.round_dp(2), Decimal::new(22000, 2));
        let bob_invoice = &report.invoices[1];
        assert_eq!(bob_invoice.amount.round_dp(2), Decimal::new(750, 2));

        // A second run finds nothing left to invoice
        let again = generator.generate_for_all_eligible(&db).await.unwrap();
        assert!(again.invoices.is_empty());
        assert!(again.failures.is_empty());
        assert_eq!(invoice::Entity::find().all(&db).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_generate_for_all_eligible_never_duplicates_a_reading() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        for hour in 0..20 {
            new_reading(&db, &alice, MeterType::Water, 100 + hour, ts(1, hour as u32), true)
                .await
                .unwrap();
        }

        let report = generator(clock).generate_for_all_eligible(&db).await.unwrap();
        assert_eq!(report.invoices.len(), 20);

        let readings: HashSet<i32> = report.invoices.iter().map(|i| i.meter_reading_id).collect();
        assert_eq!(readings.len(), 20);
        let numbers: HashSet<&str> = report.invoices.iter().map(|i| i.invoice_number.as_str()).collect();
        assert_eq!(numbers.len(), 20);
    }

    #[tokio::test]
    async fn test_generate_for_user() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let bob = new_user(&db, "bob@example.com", UserRole::Resident).await.unwrap();
        let alice_reading = new_reading(&db, &alice, MeterType::Water, 10, ts(1, 0), true).await.unwrap();
        let bob_reading = new_reading(&db, &bob, MeterType::Water, 20, ts(1, 0), true).await.unwrap();

        let generator = generator(clock);
        let report = generator.generate_for_user(&db, alice.id).await.unwrap();
        assert_eq!(report.invoices.len(), 1);
        assert_eq!(report.invoices[0].meter_reading_id, alice_reading.id);

        let rest = generator.generate_for_all_eligible(&db).await.unwrap();
        assert_eq!(rest.invoices.len(), 1);
        assert_eq!(rest.invoices[0].meter_reading_id, bob_reading.id);

        let missing = generator.generate_for_user(&db, 9999).await;
        assert!(matches!(missing, Err(ComputeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_persist_conflicts_on_already_invoiced_reading() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let reading = new_reading(&db, &alice, MeterType::Water, 10, ts(1, 0), true).await.unwrap();

        let generator = generator(clock);
        // Two drafts for the same reading, as two concurrent requests would build
        let first = generator.generate_for_reading(&db, &reading).await.unwrap();
        let second = generator.generate_for_reading(&db, &reading).await.unwrap();

        generator.persist(&db, first).await.unwrap();
        let duplicate = generator.persist(&db, second).await;
        assert!(matches!(duplicate, Err(ComputeError::Conflict(_))));
        assert_eq!(invoice::Entity::find().all(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_retries_on_invoice_number_collision() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let first = new_reading(&db, &alice, MeterType::Water, 10, ts(1, 0), true).await.unwrap();
        let second = new_reading(&db, &alice, MeterType::Water, 20, ts(2, 0), true).await.unwrap();
        let taken = new_invoice(&db, &first, "INV-20250101-TAKEN1").await.unwrap();

        let generator = generator(clock);
        let mut draft = generator.generate_for_reading(&db, &second).await.unwrap();
        draft.invoice_number = taken.invoice_number.clone();

        let stored = generator.persist(&db, draft).await.unwrap();
        assert_ne!(stored.invoice_number, taken.invoice_number);
        assert_eq!(stored.meter_reading_id, second.id);
    }

    #[tokio::test]
    async fn test_mark_paid() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let reading = new_reading(&db, &alice, MeterType::Water, 10, ts(1, 0), true).await.unwrap();
        let invoice = new_invoice(&db, &reading, "INV-20250101-PAYME1").await.unwrap();

        let generator = generator(clock.clone());
        let paid = generator.mark_paid(&db, invoice.id).await.unwrap();
        assert!(paid.paid);
        assert_eq!(paid.paid_at, Some(ts(10, 0)));

        // Paying twice is a conflict and keeps the first timestamp
        clock.advance(Duration::hours(5));
        let again = generator.mark_paid(&db, invoice.id).await;
        assert!(matches!(again, Err(ComputeError::Conflict(_))));
        let stored = invoice::Entity::find_by_id(invoice.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.paid_at, Some(ts(10, 0)));

        let missing = generator.mark_paid(&db, 9999).await;
        assert!(matches!(missing, Err(ComputeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_issued_invoice_keeps_its_rate() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        new_reading(&db, &alice, MeterType::Water, 10, ts(1, 0), true).await.unwrap();

        let report = generator(clock.clone()).generate_for_all_eligible(&db).await.unwrap();
        let issued = &report.invoices[0];

        // A later generator with different pricing does not touch stored invoices
        let repriced = InvoiceGenerator::new(
            RateTable::new(Decimal::new(100, 0), Decimal::new(100, 0)),
            clock,
        );
        let report = repriced.generate_for_all_eligible(&db).await.unwrap();
        assert!(report.invoices.is_empty());

        let stored = invoice::Entity::find_by_id(issued.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.rate.round_dp(2), Decimal::new(550, 2));
        assert_eq!(stored.amount.round_dp(2), Decimal::new(5500, 2));
    }

    #[tokio::test]
    async fn test_out_of_range_amount_is_a_batch_failure() {
        let db = setup_db().await.unwrap();
        let clock = Arc::new(FixedClock::new(ts(10, 0)));
        let alice = new_user(&db, "alice@example.com", UserRole::Resident).await.unwrap();
        let water = new_reading(&db, &alice, MeterType::Water, 10_000, ts(1, 0), true).await.unwrap();
        let power = new_reading(&db, &alice, MeterType::Electricity, 50, ts(1, 1), true).await.unwrap();

        // 10000 * 99999999999 does not fit the amount column
        let pricey = InvoiceGenerator::new(
            RateTable::new(Decimal::new(99_999_999_999, 0), Decimal::new(15, 2)),
            clock.clone(),
        );
        let report = pricey.generate_for_all_eligible(&db).await.unwrap();

        assert_eq!(report.invoices.len(), 1);
        assert_eq!(report.invoices[0].meter_reading_id, power.id);
        assert_eq!(report.invoices[0].amount.round_dp(2), Decimal::new(750, 2));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].meter_reading_id, water.id);
        assert!(matches!(report.failures[0].error, ComputeError::Validation(_)));

        // A rate beyond what Decimal multiplication can hold fails the same way
        let absurd = InvoiceGenerator::new(RateTable::new(Decimal::MAX, Decimal::MAX), clock);
        let result = absurd.generate_for_reading(&db, &water).await;
        assert!(matches!(result, Err(ComputeError::Validation(_))));

        let stored = invoice::Entity::find()
            .filter(invoice::Column::MeterReadingId.eq(water.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }
}
