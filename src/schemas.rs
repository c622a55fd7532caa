use axum::{http::StatusCode, response::Json};
use compute::{Clock, ComputeError, InvoiceGenerator};
use moka::future::Cache;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

use crate::config::Settings;
use crate::handlers::invoices::InvoiceSummaryResponse;
use crate::storage::ImageStore;

/// Application state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Database connection
    pub db: DatabaseConnection,
    /// Cache for expensive aggregate queries
    pub cache: Cache<String, CachedData>,
    pub settings: Arc<Settings>,
    /// Source of every timestamp written by the API
    pub clock: Arc<dyn Clock>,
    pub generator: InvoiceGenerator,
    pub storage: ImageStore,
}

/// Cached data types
#[derive(Clone, Debug)]
pub enum CachedData {
    InvoiceSummary(InvoiceSummaryResponse),
}

/// API response wrapper
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Response message
    pub message: String,
    /// Success status
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
            success: true,
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
    /// Success status (always false for errors)
    pub success: bool,
}

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
            success: false,
        }),
    )
}

/// Maps core failures onto HTTP statuses and stable error codes.
pub fn compute_error(err: ComputeError) -> ApiError {
    match err {
        ComputeError::NotFound(_) => {
            debug!("{}", err);
            api_error(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
        }
        ComputeError::Forbidden(reason) => {
            debug!("Forbidden: {}", reason);
            api_error(StatusCode::FORBIDDEN, "FORBIDDEN", reason)
        }
        ComputeError::Conflict(reason) => {
            debug!("Conflict: {}", reason);
            api_error(StatusCode::CONFLICT, "CONFLICT", reason)
        }
        ComputeError::Validation(reason) => {
            debug!("Validation failed: {}", reason);
            api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", reason)
        }
        ComputeError::Database(e) => {
            error!("Database error: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database operation failed",
            )
        }
    }
}

/// Health check response
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Database connection status
    pub database: String,
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::me,
        crate::handlers::meter_readings::upload_reading,
        crate::handlers::meter_readings::get_my_readings,
        crate::handlers::meter_readings::get_all_readings,
        crate::handlers::meter_readings::get_reading,
        crate::handlers::meter_readings::verify_reading,
        crate::handlers::meter_readings::delete_reading,
        crate::handlers::invoices::get_my_invoices,
        crate::handlers::invoices::get_all_invoices,
        crate::handlers::invoices::get_invoice_summary,
        crate::handlers::invoices::generate_all_invoices,
        crate::handlers::invoices::generate_invoices_for_user,
        crate::handlers::invoices::pay_invoice,
        crate::handlers::invoices::get_invoice,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            crate::handlers::auth::RegisterRequest,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::UserResponse,
            crate::handlers::auth::TokenResponse,
            crate::handlers::meter_readings::UploadReadingForm,
            crate::handlers::meter_readings::MeterReadingResponse,
            crate::handlers::meter_readings::MeterReadingPage,
            crate::handlers::invoices::InvoiceResponse,
            crate::handlers::invoices::InvoicePage,
            crate::handlers::invoices::InvoiceSummaryResponse,
            crate::handlers::invoices::GenerationFailure,
            crate::handlers::invoices::GenerationReport,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration, login and current user"),
        (name = "meter-readings", description = "Meter reading submission and verification"),
        (name = "invoices", description = "Invoice generation, listing and payment"),
    ),
    info(
        title = "MeterBill API",
        description = "Utility metering and billing API for residential buildings",
        version = "0.1.0",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_error_mapping() {
        let cases = [
            (ComputeError::not_found("Invoice 1"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (ComputeError::Forbidden("no".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (ComputeError::Conflict("paid".into()), StatusCode::CONFLICT, "CONFLICT"),
            (ComputeError::Validation("bad".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (
                ComputeError::Database(sea_orm::DbErr::Custom("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let (got_status, Json(body)) = compute_error(err);
            assert_eq!(got_status, status);
            assert_eq!(body.code, code);
            assert!(!body.success);
        }
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let (_, Json(body)) = compute_error(ComputeError::Database(sea_orm::DbErr::Custom(
            "secret table layout".into(),
        )));
        assert!(!body.error.contains("secret"));
    }
}
