use model::entities::{invoice, meter_reading, MeterType};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::{ComputeError, Result};
use crate::page::{Page, Paged};
use crate::policy::{authorize, Action, Caller, ListScope};
use crate::rates::{fits_decimal, QUANTITY_DIGITS};

/// A reading as submitted by a resident or admin, with its image already stored.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub meter_type: MeterType,
    pub reading_value: Decimal,
    pub image_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub meter_type: Option<MeterType>,
    pub verified: Option<bool>,
    /// Ignored for owner-scoped listings.
    pub user_id: Option<i32>,
}

/// Rejects values the reading column cannot store: negatives, more than 12
/// integer digits or more than 4 decimal places.
pub fn validate_reading_value(value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(ComputeError::Validation(
            "Reading value must not be negative".to_string(),
        ));
    }
    if !fits_decimal(value, QUANTITY_DIGITS) {
        return Err(ComputeError::Validation(format!(
            "Reading value {} must have at most 12 integer digits and 4 decimal places",
            value
        )));
    }
    Ok(())
}

#[instrument(skip(db, clock))]
pub async fn submit_reading<C: ConnectionTrait>(
    db: &C,
    clock: &dyn Clock,
    caller: &Caller,
    new: NewReading,
) -> Result<meter_reading::Model> {
    authorize(caller, Action::SubmitReading).into_result()?;

    validate_reading_value(new.reading_value)?;

    let reading = meter_reading::ActiveModel {
        user_id: Set(caller.id),
        meter_type: Set(new.meter_type),
        reading_value: Set(new.reading_value),
        image_url: Set(new.image_url),
        reading_date: Set(clock.now()),
        verified: Set(false),
        verified_by: Set(None),
        verified_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!("Stored reading {} for user {}", reading.id, caller.id);
    Ok(reading)
}

async fn load_reading<C: ConnectionTrait>(db: &C, id: i32) -> Result<meter_reading::Model> {
    meter_reading::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ComputeError::not_found(format!("Meter reading {}", id)))
}

#[instrument(skip(db))]
pub async fn get_reading<C: ConnectionTrait>(
    db: &C,
    caller: &Caller,
    id: i32,
) -> Result<meter_reading::Model> {
    let reading = load_reading(db, id).await?;
    authorize(
        caller,
        Action::ViewResource {
            owner_id: reading.user_id,
        },
    )
    .into_result()?;
    Ok(reading)
}

/// Readings in `scope`, newest first.
#[instrument(skip(db))]
pub async fn list_readings<C: ConnectionTrait>(
    db: &C,
    scope: ListScope,
    filter: ReadingFilter,
    page: Page,
) -> Result<Paged<meter_reading::Model>> {
    let mut query = meter_reading::Entity::find();

    match scope {
        ListScope::Owner(owner_id) => {
            query = query.filter(meter_reading::Column::UserId.eq(owner_id));
        }
        ListScope::All => {
            if let Some(user_id) = filter.user_id {
                query = query.filter(meter_reading::Column::UserId.eq(user_id));
            }
        }
    }
    if let Some(meter_type) = filter.meter_type {
        query = query.filter(meter_reading::Column::MeterType.eq(meter_type));
    }
    if let Some(verified) = filter.verified {
        query = query.filter(meter_reading::Column::Verified.eq(verified));
    }

    let paginator = query
        .order_by_desc(meter_reading::Column::ReadingDate)
        .order_by_desc(meter_reading::Column::Id)
        .paginate(db, page.limit);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page.index()).await?;

    debug!("Listed {} of {} readings", items.len(), total);
    Ok(Paged { items, total, page })
}

/// Marks a reading as verified by `caller`.
///
/// The update only matches unverified rows; losing a race against another
/// verifier is a conflict and keeps the first verifier and timestamp.
#[instrument(skip(db, clock))]
pub async fn verify_reading<C: ConnectionTrait>(
    db: &C,
    clock: &dyn Clock,
    caller: &Caller,
    id: i32,
) -> Result<meter_reading::Model> {
    let reading = load_reading(db, id).await?;
    authorize(
        caller,
        Action::VerifyReading {
            already_verified: reading.verified,
        },
    )
    .into_result()?;

    let result = meter_reading::Entity::update_many()
        .col_expr(meter_reading::Column::Verified, Expr::value(true))
        .col_expr(meter_reading::Column::VerifiedBy, Expr::value(caller.id))
        .col_expr(meter_reading::Column::VerifiedAt, Expr::value(clock.now()))
        .filter(meter_reading::Column::Id.eq(id))
        .filter(meter_reading::Column::Verified.eq(false))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(ComputeError::Conflict(
            "Reading is already verified".to_string(),
        ));
    }

    debug!("Reading {} verified by user {}", id, caller.id);
    load_reading(db, id).await
}

/// Removes a reading that has not been invoiced yet and returns the removed
/// row, so the caller can drop the stored image.
#[instrument(skip(db))]
pub async fn delete_reading<C: ConnectionTrait>(
    db: &C,
    caller: &Caller,
    id: i32,
) -> Result<meter_reading::Model> {
    let reading = load_reading(db, id).await?;
    authorize(
        caller,
        Action::DeleteReading {
            owner_id: reading.user_id,
        },
    )
    .into_result()?;

    let invoiced = invoice::Entity::find()
        .filter(invoice::Column::MeterReadingId.eq(id))
        .count(db)
        .await?;
    if invoiced > 0 {
        return Err(ComputeError::Conflict(format!(
            "Reading {} has already been invoiced",
            id
        )));
    }

    meter_reading::Entity::delete_by_id(id).exec(db).await?;
    debug!("Deleted reading {}", id);
    Ok(reading)
}
