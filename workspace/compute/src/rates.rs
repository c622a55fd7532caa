use model::entities::MeterType;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ComputeError, Result};

/// `DECIMAL(precision, scale)` of `invoices.amount`.
pub const AMOUNT_DIGITS: (u32, u32) = (16, 2);
/// `DECIMAL(precision, scale)` of reading values, consumption and rates.
pub const QUANTITY_DIGITS: (u32, u32) = (16, 4);

/// Price per unit for each meter type.
///
/// Injected into the invoice generator so deployments and tests can change
/// pricing without touching code. Invoices copy the rate they were priced
/// with, so replacing the table never affects issued invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    pub water: Decimal,
    pub electricity: Decimal,
}

impl RateTable {
    pub fn new(water: Decimal, electricity: Decimal) -> Self {
        Self { water, electricity }
    }

    pub fn rate(&self, meter_type: MeterType) -> Decimal {
        match meter_type {
            MeterType::Water => self.water,
            MeterType::Electricity => self.electricity,
        }
    }

    /// `consumption × rate`, rounded half-up to cents.
    ///
    /// Negative consumption yields a negative amount. A product that
    /// overflows, or does not fit the amount column, is a validation error.
    pub fn price(&self, consumption: Decimal, meter_type: MeterType) -> Result<Decimal> {
        let amount = consumption
            .checked_mul(self.rate(meter_type))
            .map(round_amount)
            .filter(|amount| fits_decimal(*amount, AMOUNT_DIGITS))
            .ok_or_else(|| {
                ComputeError::Validation(format!(
                    "Invoice amount for {} consumption of {} is out of range",
                    meter_type, consumption
                ))
            })?;
        Ok(amount)
    }
}

impl Default for RateTable {
    /// 5.50 per unit of water, 0.15 per kWh of electricity.
    fn default() -> Self {
        Self {
            water: Decimal::new(550, 2),
            electricity: Decimal::new(15, 2),
        }
    }
}

/// Rounds to two decimal places, midpoints away from zero.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether `value` is stored by a `DECIMAL(precision, scale)` column without
/// losing digits. Trailing zeros do not count against the scale.
pub fn fits_decimal(value: Decimal, (precision, scale): (u32, u32)) -> bool {
    let integer_limit = Decimal::from(10u64.pow(precision - scale));
    value.normalize().scale() <= scale && value.abs().trunc() < integer_limit
}
