use chrono::{DateTime, Utc};
use model::entities::{MeterType, meter_reading};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::{instrument, trace};

use crate::error::Result;

/// Billable quantity of `reading` relative to the previous verified reading.
///
/// The very first reading of a (user, meter type) pair is billed on its
/// absolute value. A reading lower than its predecessor gives a negative
/// quantity; nothing is clamped.
pub fn compute_consumption(
    reading: &meter_reading::Model,
    previous: Option<&meter_reading::Model>,
) -> Decimal {
    match previous {
        None => reading.reading_value,
        Some(previous) => reading.reading_value - previous.reading_value,
    }
}

/// The latest verified reading of `meter_type` submitted by `user_id`
/// strictly before `before`.
///
/// Readings sharing a timestamp are ordered by id, newest id first.
#[instrument(skip(db))]
pub async fn find_previous_reading<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    meter_type: MeterType,
    before: DateTime<Utc>,
) -> Result<Option<meter_reading::Model>> {
    let previous = meter_reading::Entity::find()
        .filter(meter_reading::Column::UserId.eq(user_id))
        .filter(meter_reading::Column::MeterType.eq(meter_type))
        .filter(meter_reading::Column::ReadingDate.lt(before))
        .filter(meter_reading::Column::Verified.eq(true))
        .order_by_desc(meter_reading::Column::ReadingDate)
        .order_by_desc(meter_reading::Column::Id)
        .one(db)
        .await?;

    trace!(previous_id = ?previous.as_ref().map(|r| r.id), "Previous reading lookup");
    Ok(previous)
}
