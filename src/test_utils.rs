#[cfg(test)]
pub mod test_utils {
    use crate::config::{build_app_state, Settings};
    use crate::router::create_router;
    use crate::schemas::AppState;
    use axum::http::{header, HeaderValue};
    use axum::Router;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::{TestRequest, TestServer};
    use chrono::{DateTime, TimeZone, Utc};
    use compute::FixedClock;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;
    use uuid::Uuid;

    pub const TEST_PASSWORD: &str = "correct-horse-battery";

    /// Instant the test clock starts at.
    pub fn test_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    /// Create an in-memory SQLite database for testing
    pub async fn setup_test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory database");

        // Run migrations
        Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");

        db
    }

    /// AppState over a fresh database, a private upload directory and a
    /// manually driven clock.
    pub async fn setup_test_app_state() -> (AppState, Arc<FixedClock>) {
        let db = setup_test_db().await;
        let clock = Arc::new(FixedClock::new(test_start()));
        let upload_dir = std::env::temp_dir().join(format!("meterbill-test-{}", Uuid::new_v4()));

        let settings = Settings {
            jwt_secret: "test-secret".to_string(),
            upload_dir: upload_dir.to_string_lossy().into_owned(),
            max_upload_bytes: 64 * 1024,
            ..Settings::default()
        };

        let state = build_app_state(db, settings, clock.clone());
        (state, clock)
    }

    /// Initialize tracing for tests with output to STDERR.
    ///
    /// The log level is taken from RUST_LOG, defaulting to WARN.
    fn init_test_tracing() -> tracing::subscriber::DefaultGuard {
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| match level.to_uppercase().as_str() {
                "ERROR" => Some(Level::ERROR),
                "WARN" => Some(Level::WARN),
                "INFO" => Some(Level::INFO),
                "DEBUG" => Some(Level::DEBUG),
                "TRACE" => Some(Level::TRACE),
                _ => None,
            })
            .unwrap_or(Level::WARN);

        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Create axum app for testing
    pub async fn setup_test_app() -> Router {
        setup_test_app_with_clock().await.0
    }

    /// Like [`setup_test_app`], also handing back the clock so tests can move
    /// time forward.
    pub async fn setup_test_app_with_clock() -> (Router, Arc<FixedClock>) {
        let _guard = init_test_tracing();

        let (state, clock) = setup_test_app_state().await;
        (create_router(state), clock)
    }

    pub async fn setup_test_server() -> (TestServer, Arc<FixedClock>) {
        let (app, clock) = setup_test_app_with_clock().await;
        (TestServer::new(app).unwrap(), clock)
    }

    /// Adds `Authorization: Bearer <token>`.
    pub fn bearer(request: TestRequest, token: &str) -> TestRequest {
        request.add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        )
    }

    /// Registers a user through the API and returns the created user JSON.
    pub async fn register(server: &TestServer, email: &str, role: &str) -> Value {
        let apartment = (role == "resident").then_some("12B");
        let response = server
            .post("/api/v1/auth/register")
            .json(&json!({
                "email": email,
                "password": TEST_PASSWORD,
                "full_name": "Test User",
                "role": role,
                "apartment_number": apartment,
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json::<Value>()["data"].clone()
    }

    pub async fn login(server: &TestServer, email: &str) -> String {
        let response = server
            .post("/api/v1/auth/login")
            .json(&json!({ "email": email, "password": TEST_PASSWORD }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["data"]["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Registers and logs in, returning `(user id, token)`.
    pub async fn register_and_login(server: &TestServer, email: &str, role: &str) -> (i64, String) {
        let user = register(server, email, role).await;
        let token = login(server, email).await;
        (user["id"].as_i64().unwrap(), token)
    }

    pub fn reading_form(meter_type: &str, value: &str, filename: &str) -> MultipartForm {
        MultipartForm::new()
            .add_text("meter_type", meter_type.to_string())
            .add_text("reading_value", value.to_string())
            .add_part(
                "image",
                Part::bytes(b"fake image bytes".to_vec()).file_name(filename.to_string()),
            )
    }

    /// Submits a reading as `token` and returns its id.
    pub async fn submit_reading(server: &TestServer, token: &str, meter_type: &str, value: &str) -> i64 {
        let response = bearer(server.post("/api/v1/meter-readings"), token)
            .multipart(reading_form(meter_type, value, "meter.jpg"))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json::<Value>()["data"]["id"].as_i64().unwrap()
    }

    pub async fn verify(server: &TestServer, token: &str, reading_id: i64) {
        bearer(
            server.patch(&format!("/api/v1/meter-readings/{}/verify", reading_id)),
            token,
        )
        .await
        .assert_status_ok();
    }
}
