use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, Utc};
use compute::{
    authorize,
    billing::{self, InvoiceFilter, InvoiceSummary},
    list_scope,
    rates::round_amount,
    Action, BatchReport, ListScope, Page,
};
use model::entities::invoice;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::AuthUser;
use crate::schemas::{compute_error, ApiError, ApiResponse, AppState, CachedData, ErrorResponse};

/// Query parameters for the caller's own invoices
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct MyInvoicesQuery {
    /// Page number (default: 1)
    #[validate(range(min = 1, max = 10000))]
    pub page: Option<u64>,
    /// Page size (default: 50)
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u64>,
    pub paid: Option<bool>,
}

/// Query parameters for listing every invoice
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct AllInvoicesQuery {
    /// Page number (default: 1)
    #[validate(range(min = 1, max = 10000))]
    pub page: Option<u64>,
    /// Page size (default: 50)
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u64>,
    pub paid: Option<bool>,
    pub user_id: Option<i32>,
}

/// An invoice as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvoiceResponse {
    pub id: i32,
    pub user_id: i32,
    pub meter_reading_id: i32,
    pub invoice_number: String,
    #[schema(value_type = String, example = "550.00")]
    pub amount: Decimal,
    #[schema(value_type = String, example = "100")]
    pub consumption: Decimal,
    #[schema(value_type = String, example = "5.50")]
    pub rate: Decimal,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<invoice::Model> for InvoiceResponse {
    fn from(invoice: invoice::Model) -> Self {
        Self {
            id: invoice.id,
            user_id: invoice.user_id,
            meter_reading_id: invoice.meter_reading_id,
            invoice_number: invoice.invoice_number,
            amount: round_amount(invoice.amount),
            consumption: invoice.consumption.round_dp(4).normalize(),
            rate: invoice.rate.round_dp(4),
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            paid: invoice.paid,
            paid_at: invoice.paid_at,
        }
    }
}

/// One page of invoices
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvoicePage {
    pub items: Vec<InvoiceResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl From<compute::Paged<invoice::Model>> for InvoicePage {
    fn from(paged: compute::Paged<invoice::Model>) -> Self {
        Self {
            items: paged.items.into_iter().map(InvoiceResponse::from).collect(),
            total: paged.total,
            page: paged.page.page,
            limit: paged.page.limit,
        }
    }
}

/// Invoice counts and amounts for the caller's scope
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvoiceSummaryResponse {
    pub total_invoices: u64,
    pub paid_invoices: u64,
    pub pending_invoices: u64,
    #[schema(value_type = String, example = "715.00")]
    pub total_amount: Decimal,
    #[schema(value_type = String, example = "550.00")]
    pub paid_amount: Decimal,
    #[schema(value_type = String, example = "165.00")]
    pub pending_amount: Decimal,
}

impl From<InvoiceSummary> for InvoiceSummaryResponse {
    fn from(summary: InvoiceSummary) -> Self {
        Self {
            total_invoices: summary.total_invoices,
            paid_invoices: summary.paid_invoices,
            pending_invoices: summary.pending_invoices,
            total_amount: summary.total_amount,
            paid_amount: summary.paid_amount,
            pending_amount: summary.pending_amount,
        }
    }
}

/// A reading the generator could not invoice
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerationFailure {
    pub meter_reading_id: i32,
    pub error: String,
}

/// Result of a bulk generation run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerationReport {
    pub generated: Vec<InvoiceResponse>,
    pub failures: Vec<GenerationFailure>,
}

impl From<BatchReport> for GenerationReport {
    fn from(report: BatchReport) -> Self {
        Self {
            generated: report.invoices.into_iter().map(InvoiceResponse::from).collect(),
            failures: report
                .failures
                .into_iter()
                .map(|failure| GenerationFailure {
                    meter_reading_id: failure.meter_reading_id,
                    error: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

fn summary_cache_key(scope: ListScope) -> String {
    match scope {
        ListScope::Owner(user_id) => format!("invoice_summary:user:{}", user_id),
        ListScope::All => "invoice_summary:all".to_string(),
    }
}

/// Drops cached summaries after anything that changes invoices.
fn invalidate_summaries(state: &AppState) {
    trace!("Invalidating cached invoice summaries");
    state.cache.invalidate_all();
}

fn generation_response(report: BatchReport) -> (StatusCode, Json<ApiResponse<GenerationReport>>) {
    if !report.failures.is_empty() {
        warn!("{} readings could not be invoiced", report.failures.len());
    }
    let report = GenerationReport::from(report);
    let message = format!("Generated {} invoices", report.generated.len());
    (StatusCode::OK, Json(ApiResponse::ok(report, message)))
}

/// Invoices issued to the caller
#[utoipa::path(
    get,
    path = "/api/v1/invoices/mine",
    tag = "invoices",
    security(("bearer_auth" = [])),
    params(MyInvoicesQuery),
    responses(
        (status = 200, description = "Invoices retrieved successfully", body = ApiResponse<InvoicePage>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_my_invoices(
    State(state): State<AppState>,
    auth: AuthUser,
    Valid(Query(query)): Valid<Query<MyInvoicesQuery>>,
) -> Result<(StatusCode, Json<ApiResponse<InvoicePage>>), ApiError> {
    trace!("Entering get_my_invoices function");

    let scope = list_scope(&auth.caller(), false).map_err(compute_error)?;
    let filter = InvoiceFilter {
        paid: query.paid,
        user_id: None,
    };
    let page = Page::new(query.page.unwrap_or(1), query.limit.unwrap_or(Page::DEFAULT_LIMIT));

    let paged = billing::list_invoices(&state.db, scope, filter, page)
        .await
        .map_err(compute_error)?;

    debug!("Returning {} of {} invoices", paged.items.len(), paged.total);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(InvoicePage::from(paged), "Invoices retrieved successfully")),
    ))
}

/// Every invoice (managers and admins)
#[utoipa::path(
    get,
    path = "/api/v1/invoices",
    tag = "invoices",
    security(("bearer_auth" = [])),
    params(AllInvoicesQuery),
    responses(
        (status = 200, description = "Invoices retrieved successfully", body = ApiResponse<InvoicePage>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Residents cannot list all invoices", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_all_invoices(
    State(state): State<AppState>,
    auth: AuthUser,
    Valid(Query(query)): Valid<Query<AllInvoicesQuery>>,
) -> Result<(StatusCode, Json<ApiResponse<InvoicePage>>), ApiError> {
    trace!("Entering get_all_invoices function");

    let scope = list_scope(&auth.caller(), true).map_err(compute_error)?;
    let filter = InvoiceFilter {
        paid: query.paid,
        user_id: query.user_id,
    };
    let page = Page::new(query.page.unwrap_or(1), query.limit.unwrap_or(Page::DEFAULT_LIMIT));

    let paged = billing::list_invoices(&state.db, scope, filter, page)
        .await
        .map_err(compute_error)?;

    debug!("Returning {} of {} invoices", paged.items.len(), paged.total);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(InvoicePage::from(paged), "Invoices retrieved successfully")),
    ))
}

/// Invoice totals: the caller's own for residents, global for staff
#[utoipa::path(
    get,
    path = "/api/v1/invoices/summary",
    tag = "invoices",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Summary retrieved successfully", body = ApiResponse<InvoiceSummaryResponse>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_invoice_summary(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<ApiResponse<InvoiceSummaryResponse>>), ApiError> {
    trace!("Entering get_invoice_summary function");

    let caller = auth.caller();
    let scope = list_scope(&caller, caller.is_staff()).map_err(compute_error)?;
    let cache_key = summary_cache_key(scope);

    if let Some(CachedData::InvoiceSummary(summary)) = state.cache.get(&cache_key).await {
        debug!("Serving invoice summary from cache: {}", cache_key);
        return Ok((
            StatusCode::OK,
            Json(ApiResponse::ok(summary, "Invoice summary retrieved successfully")),
        ));
    }

    let summary = InvoiceSummaryResponse::from(
        billing::invoice_summary(&state.db, scope)
            .await
            .map_err(compute_error)?,
    );
    state
        .cache
        .insert(cache_key, CachedData::InvoiceSummary(summary.clone()))
        .await;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(summary, "Invoice summary retrieved successfully")),
    ))
}

/// Invoice every verified reading that has no invoice yet (managers and admins)
#[utoipa::path(
    post,
    path = "/api/v1/invoices/generate-all",
    tag = "invoices",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Generation finished", body = ApiResponse<GenerationReport>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Residents cannot generate invoices", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn generate_all_invoices(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<ApiResponse<GenerationReport>>), ApiError> {
    trace!("Entering generate_all_invoices function");

    authorize(&auth.caller(), Action::GenerateInvoices)
        .into_result()
        .map_err(compute_error)?;

    let report = state
        .generator
        .generate_for_all_eligible(&state.db)
        .await
        .map_err(compute_error)?;
    invalidate_summaries(&state);

    info!(
        "User {} generated {} invoices",
        auth.0.id,
        report.invoices.len()
    );
    Ok(generation_response(report))
}

/// Invoice one user's eligible readings (managers and admins)
#[utoipa::path(
    post,
    path = "/api/v1/invoices/generate-for-user/{user_id}",
    tag = "invoices",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Generation finished", body = ApiResponse<GenerationReport>),
        (status = 403, description = "Residents cannot generate invoices", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn generate_invoices_for_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<GenerationReport>>), ApiError> {
    trace!("Entering generate_invoices_for_user function for user_id: {}", user_id);

    authorize(&auth.caller(), Action::GenerateInvoices)
        .into_result()
        .map_err(compute_error)?;

    let report = state
        .generator
        .generate_for_user(&state.db, user_id)
        .await
        .map_err(compute_error)?;
    invalidate_summaries(&state);

    info!(
        "User {} generated {} invoices for user {}",
        auth.0.id,
        report.invoices.len(),
        user_id
    );
    Ok(generation_response(report))
}

/// Mark an invoice as paid (its owner or staff)
#[utoipa::path(
    patch,
    path = "/api/v1/invoices/{invoice_id}/pay",
    tag = "invoices",
    security(("bearer_auth" = [])),
    params(
        ("invoice_id" = i32, Path, description = "Invoice ID"),
    ),
    responses(
        (status = 200, description = "Invoice marked as paid", body = ApiResponse<InvoiceResponse>),
        (status = 403, description = "Not authorized to pay this invoice", body = ErrorResponse),
        (status = 404, description = "Invoice not found", body = ErrorResponse),
        (status = 409, description = "Invoice is already paid", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn pay_invoice(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(invoice_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<InvoiceResponse>>), ApiError> {
    trace!("Entering pay_invoice function for invoice_id: {}", invoice_id);

    let invoice = billing::pay_invoice(&state.db, &state.generator, &auth.caller(), invoice_id)
        .await
        .map_err(compute_error)?;
    invalidate_summaries(&state);

    info!("Invoice {} paid by user {}", invoice.invoice_number, auth.0.id);
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(InvoiceResponse::from(invoice), "Invoice marked as paid")),
    ))
}

/// A single invoice, visible to its owner and to staff
#[utoipa::path(
    get,
    path = "/api/v1/invoices/{invoice_id}",
    tag = "invoices",
    security(("bearer_auth" = [])),
    params(
        ("invoice_id" = i32, Path, description = "Invoice ID"),
    ),
    responses(
        (status = 200, description = "Invoice retrieved successfully", body = ApiResponse<InvoiceResponse>),
        (status = 403, description = "Not authorized to view this invoice", body = ErrorResponse),
        (status = 404, description = "Invoice not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_invoice(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(invoice_id): Path<i32>,
) -> Result<(StatusCode, Json<ApiResponse<InvoiceResponse>>), ApiError> {
    trace!("Entering get_invoice function for invoice_id: {}", invoice_id);

    let invoice = billing::get_invoice(&state.db, &auth.caller(), invoice_id)
        .await
        .map_err(compute_error)?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(InvoiceResponse::from(invoice), "Invoice retrieved successfully")),
    ))
}
