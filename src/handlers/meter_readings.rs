use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, Utc};
use compute::{
    list_scope,
    readings::{self, NewReading, ReadingFilter},
    Page,
};
use model::entities::{meter_reading, MeterType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, error, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::AuthUser;
use crate::schemas::{api_error, compute_error, ApiError, ApiResponse, AppState, ErrorResponse};
use crate::storage::StorageError;

/// Multipart form for submitting a reading
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadReadingForm {
    /// water or electricity
    meter_type: String,
    /// Non-negative meter value with at most 12 integer digits and 4 decimal places, e.g. "123.45"
    reading_value: String,
    /// jpg, jpeg, png, gif or webp, at most 10 MB
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

/// Query parameters for the caller's own readings
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct MyReadingsQuery {
    /// Page number (default: 1)
    #[validate(range(min = 1, max = 10000))]
    pub page: Option<u64>,
    /// Page size (default: 50)
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u64>,
    #[param(value_type = Option<String>)]
    pub meter_type: Option<MeterType>,
}

/// Query parameters for listing every reading
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct AllReadingsQuery {
    /// Page number (default: 1)
    #[validate(range(min = 1, max = 10000))]
    pub page: Option<u64>,
    /// Page size (default: 50)
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u64>,
    #[param(value_type = Option<String>)]
    pub meter_type: Option<MeterType>,
    pub verified: Option<bool>,
    pub user_id: Option<i32>,
}

/// A meter reading as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MeterReadingResponse {
    pub id: i32,
    pub user_id: i32,
    #[schema(value_type = String, example = "water")]
    pub meter_type: MeterType,
    #[schema(value_type = String, example = "123.45")]
    pub reading_value: Decimal,
    pub image_url: String,
    pub reading_date: DateTime<Utc>,
    pub verified: bool,
    pub verified_by: Option<i32>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<meter_reading::Model> for MeterReadingResponse {
    fn from(reading: meter_reading::Model) -> Self {
        Self {
            id: reading.id,
            user_id: reading.user_id,
            meter_type: reading.meter_type,
            reading_value: reading.reading_value,
            image_url: reading.image_url,
            reading_date: reading.reading_date,
            verified: reading.verified,
            verified_by: reading.verified_by,
            verified_at: reading.verified_at,
        }
    }
}

/// One page of readings
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeterReadingPage {
    pub items: Vec<MeterReadingResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl From<compute::Paged<meter_reading::Model>> for MeterReadingPage {
    fn from(paged: compute::Paged<meter_reading::Model>) -> Self {
        Self {
            items: paged.items.into_iter().map(MeterReadingResponse::from).collect(),
            total: paged.total,
            page: paged.page.page,
            limit: paged.page.limit,
        }
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
}

fn storage_error(err: StorageError) -> ApiError {
    match err {
        StorageError::Io(e) => {
            error!("Failed to store upload: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Failed to store uploaded file",
            )
        }
        other => bad_request(other.to_string()),
    }
}

async fn field_text(field: Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| bad_request(format!("Invalid {} field: {}", name, e)))
}

/// Submit a meter reading with a photo of the meter
#[utoipa::path(
    post,
    path = "/api/v1/meter-readings",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    request_body(content = UploadReadingForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Reading submitted successfully", body = ApiResponse<MeterReadingResponse>),
        (status = 400, description = "Invalid form data or file", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Managers cannot submit readings", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state, multipart))]
pub async fn upload_reading(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<MeterReadingResponse>>), ApiError> {
    trace!("Entering upload_reading function");
    let caller = auth.caller();

    // Refuse before anything is written to disk
    compute::authorize(&caller, compute::Action::SubmitReading)
        .into_result()
        .map_err(compute_error)?;

    let mut meter_type: Option<MeterType> = None;
    let mut reading_value: Option<Decimal> = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "meter_type" => {
                let text = field_text(field, "meter_type").await?;
                meter_type = Some(MeterType::from_str(&text).map_err(bad_request)?);
            }
            "reading_value" => {
                let text = field_text(field, "reading_value").await?;
                let value = Decimal::from_str(&text)
                    .map_err(|_| bad_request(format!("Invalid reading value: {}", text)))?;
                reading_value = Some(value);
            }
            "image" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Invalid image field: {}", e)))?;
                image = Some((filename, bytes.to_vec()));
            }
            other => debug!("Ignoring unexpected form field {}", other),
        }
    }

    let meter_type = meter_type.ok_or_else(|| bad_request("meter_type is required"))?;
    let reading_value = reading_value.ok_or_else(|| bad_request("reading_value is required"))?;
    let (filename, bytes) = image.ok_or_else(|| bad_request("image is required"))?;

    readings::validate_reading_value(reading_value).map_err(compute_error)?;

    let image_url = state
        .storage
        .save(&filename, &bytes)
        .await
        .map_err(storage_error)?;

    let new_reading = NewReading {
        meter_type,
        reading_value,
        image_url: image_url.clone(),
    };
    let reading = match readings::submit_reading(&state.db, state.clock.as_ref(), &caller, new_reading).await {
        Ok(reading) => reading,
        Err(e) => {
            state.storage.remove(&image_url).await;
            return Err(compute_error(e));
        }
    };

    info!("User {} submitted {} reading {}", caller.id, reading.meter_type, reading.id);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            MeterReadingResponse::from(reading),
            "Meter reading submitted successfully",
        )),
    ))
}

/// Readings submitted by the caller, newest first
#[utoipa::path(
    get,
    path = "/api/v1/meter-readings/mine",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    params(MyReadingsQuery),
    responses(
        (status = 200, description = "Readings retrieved successfully", body = ApiResponse<MeterReadingPage>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_my_readings(
    State(state): State<AppState>,
    auth: AuthUser,
    Valid(Query(query)): Valid<Query<MyReadingsQuery>>,
) -> Result<(StatusCode, Json<ApiResponse<MeterReadingPage>>), ApiError> {
    trace!("Entering get_my_readings function");

    let scope = list_scope(&auth.caller(), false).map_err(compute_error)?;
    let filter = ReadingFilter {
        meter_type: query.meter_type,
        ..Default::default()
    };
    let page = Page::new(query.page.unwrap_or(1), query.limit.unwrap_or(Page::DEFAULT_LIMIT));

    let paged = readings::list_readings(&state.db, scope, filter, page)
        .await
        .map_err(compute_error)?;

    debug!("Returning {} of {} readings", paged.items.len(), paged.total);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(
            MeterReadingPage::from(paged),
            "Meter readings retrieved successfully",
        )),
    ))
}

/// Every tenant's readings (managers and admins)
#[utoipa::path(
    get,
    path = "/api/v1/meter-readings",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    params(AllReadingsQuery),
    responses(
        (status = 200, description = "Readings retrieved successfully", body = ApiResponse<MeterReadingPage>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Residents cannot list all readings", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_all_readings(
    State(state): State<AppState>,
    auth: AuthUser,
    Valid(Query(query)): Valid<Query<AllReadingsQuery>>,
) -> Result<(StatusCode, Json<ApiResponse<MeterReadingPage>>), ApiError> {
    trace!("Entering get_all_readings function");

    let scope = list_scope(&auth.caller(), true).map_err(compute_error)?;
    let filter = ReadingFilter {
        meter_type: query.meter_type,
        verified: query.verified,
        user_id: query.user_id,
    };
    let page = Page::new(query.page.unwrap_or(1), query.limit.unwrap_or(Page::DEFAULT_LIMIT));

    let paged = readings::list_readings(&state.db, scope, filter, page)
        .await
        .map_err(compute_error)?;

    debug!("Returning {} of {} readings", paged.items.len(), paged.total);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(
            MeterReadingPage::from(paged),
            "Meter readings retrieved successfully",
        )),
    ))
}

/// A single reading, visible to its submitter and to staff
#[utoipa::path(
    get,
    path = "/api/v1/meter-readings/{reading_id}",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    params(
        ("reading_id" = i32, Path, description = "Meter reading ID"),
    ),
    responses(
        (status = 200, description = "Reading retrieved successfully", body = ApiResponse<MeterReadingResponse>),
        (status = 403, description = "Not authorized to view this reading", body = ErrorResponse),
        (status = 404, description = "Reading not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_reading(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(reading_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<MeterReadingResponse>>), ApiError> {
    trace!("Entering get_reading function for reading_id: {}", reading_id);

    let reading = readings::get_reading(&state.db, &auth.caller(), reading_id)
        .await
        .map_err(compute_error)?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(
            MeterReadingResponse::from(reading),
            "Meter reading retrieved successfully",
        )),
    ))
}

/// Verify a reading (managers and admins)
#[utoipa::path(
    patch,
    path = "/api/v1/meter-readings/{reading_id}/verify",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    params(
        ("reading_id" = i32, Path, description = "Meter reading ID"),
    ),
    responses(
        (status = 200, description = "Reading verified successfully", body = ApiResponse<MeterReadingResponse>),
        (status = 403, description = "Residents cannot verify readings", body = ErrorResponse),
        (status = 404, description = "Reading not found", body = ErrorResponse),
        (status = 409, description = "Reading is already verified", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn verify_reading(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(reading_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<MeterReadingResponse>>), ApiError> {
    trace!("Entering verify_reading function for reading_id: {}", reading_id);

    let reading = readings::verify_reading(&state.db, state.clock.as_ref(), &auth.caller(), reading_id)
        .await
        .map_err(compute_error)?;

    info!("Reading {} verified by user {}", reading.id, auth.0.id);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(
            MeterReadingResponse::from(reading),
            "Meter reading verified successfully",
        )),
    ))
}

/// Delete a reading that has not been invoiced (submitter or admin)
#[utoipa::path(
    delete,
    path = "/api/v1/meter-readings/{reading_id}",
    tag = "meter-readings",
    security(("bearer_auth" = [])),
    params(
        ("reading_id" = i32, Path, description = "Meter reading ID"),
    ),
    responses(
        (status = 200, description = "Reading deleted successfully", body = ApiResponse<String>),
        (status = 403, description = "Not authorized to delete this reading", body = ErrorResponse),
        (status = 404, description = "Reading not found", body = ErrorResponse),
        (status = 409, description = "Reading has already been invoiced", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn delete_reading(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(reading_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<String>>), ApiError> {
    trace!("Entering delete_reading function for reading_id: {}", reading_id);

    let reading = readings::delete_reading(&state.db, &auth.caller(), reading_id)
        .await
        .map_err(compute_error)?;

    state.storage.remove(&reading.image_url).await;
    if reading.verified {
        warn!("Deleted verified reading {}", reading.id);
    }

    info!("Reading {} deleted by user {}", reading.id, auth.0.id);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(
            format!("Meter reading {} deleted", reading.id),
            "Meter reading deleted successfully",
        )),
    ))
}
