use crate::handlers::{
    auth::{login, me, register},
    health::health_check,
    invoices::{
        generate_all_invoices, generate_invoices_for_user, get_all_invoices, get_invoice,
        get_invoice_summary, get_my_invoices, pay_invoice,
    },
    meter_readings::{
        delete_reading, get_all_readings, get_my_readings, get_reading, upload_reading,
        verify_reading,
    },
};
use crate::schemas::{ApiDoc, AppState};
use crate::storage::UPLOADS_ROUTE;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Headroom above the image limit for the other multipart fields.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.storage.max_bytes() + FORM_OVERHEAD_BYTES;
    let uploads = ServeDir::new(state.storage.dir());

    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Authentication
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/me", get(me))
        // Meter readings
        .route(
            "/api/v1/meter-readings",
            post(upload_reading).get(get_all_readings),
        )
        .route("/api/v1/meter-readings/mine", get(get_my_readings))
        .route(
            "/api/v1/meter-readings/:reading_id",
            get(get_reading).delete(delete_reading),
        )
        .route("/api/v1/meter-readings/:reading_id/verify", patch(verify_reading))
        // Invoices
        .route("/api/v1/invoices", get(get_all_invoices))
        .route("/api/v1/invoices/mine", get(get_my_invoices))
        .route("/api/v1/invoices/summary", get(get_invoice_summary))
        .route("/api/v1/invoices/generate-all", post(generate_all_invoices))
        .route(
            "/api/v1/invoices/generate-for-user/:user_id",
            post(generate_invoices_for_user),
        )
        .route("/api/v1/invoices/:invoice_id", get(get_invoice))
        .route("/api/v1/invoices/:invoice_id/pay", patch(pay_invoice))
        // Stored meter photographs
        .nest_service(UPLOADS_ROUTE, uploads)
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // The global metrics recorder can only be installed once per process
    #[cfg(not(test))]
    let router = {
        let (prometheus_layer, metrics_handle) = axum_prometheus::PrometheusMetricLayer::pair();
        router
            .route("/metrics", get(move || async move { metrics_handle.render() }))
            .layer(prometheus_layer)
    };

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
