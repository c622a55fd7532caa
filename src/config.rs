use anyhow::Result;
use compute::{Clock, InvoiceGenerator, RateTable, SystemClock};
use ::config::{Config, Environment};
use moka::future::Cache;
use rust_decimal::Decimal;
use sea_orm::{Database, DatabaseConnection};
use serde::Deserialize;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::schemas::AppState;
use crate::storage::ImageStore;

/// How long a cached invoice summary is served before it is recomputed.
pub const SUMMARY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Runtime settings, read from the environment (and `.env`) on top of the
/// defaults below.
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    pub jwt_expire_minutes: i64,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub water_rate: Decimal,
    pub electricity_rate: Decimal,
    pub invoice_due_days: i64,
    /// When false, `POST /auth/register` only creates residents.
    pub allow_staff_registration: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://meterbill.db?mode=rwc".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expire_minutes: 30,
            upload_dir: "uploads".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            water_rate: Decimal::new(550, 2),
            electricity_rate: Decimal::new(15, 2),
            invoice_due_days: compute::invoice::DEFAULT_DUE_DAYS,
            allow_staff_registration: true,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &self.database_url)
            .field("bind_address", &self.bind_address)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_expire_minutes", &self.jwt_expire_minutes)
            .field("upload_dir", &self.upload_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("water_rate", &self.water_rate)
            .field("electricity_rate", &self.electricity_rate)
            .field("invoice_due_days", &self.invoice_due_days)
            .field("allow_staff_registration", &self.allow_staff_registration)
            .finish()
    }
}

impl Settings {
    /// Layers `DATABASE_URL`, `JWT_SECRET`, `WATER_RATE` and friends over the
    /// defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();
        let settings = Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("bind_address", defaults.bind_address)?
            .set_default("jwt_secret", defaults.jwt_secret)?
            .set_default("jwt_expire_minutes", defaults.jwt_expire_minutes)?
            .set_default("upload_dir", defaults.upload_dir)?
            .set_default("max_upload_bytes", defaults.max_upload_bytes as u64)?
            .set_default("water_rate", defaults.water_rate.to_string())?
            .set_default("electricity_rate", defaults.electricity_rate.to_string())?
            .set_default("invoice_due_days", defaults.invoice_due_days)?
            .set_default("allow_staff_registration", defaults.allow_staff_registration)?
            .add_source(Environment::default())
            .build()?
            .try_deserialize::<Settings>()?;

        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    pub fn rate_table(&self) -> RateTable {
        RateTable::new(self.water_rate, self.electricity_rate)
    }
}

/// Wires an already connected database into the shared handler state.
pub fn build_app_state(db: DatabaseConnection, settings: Settings, clock: Arc<dyn Clock>) -> AppState {
    let generator = InvoiceGenerator::new(settings.rate_table(), clock.clone())
        .with_due_days(settings.invoice_due_days);
    let storage = ImageStore::new(&settings.upload_dir, settings.max_upload_bytes);

    let cache = Cache::builder()
        .max_capacity(1000)
        .time_to_live(SUMMARY_CACHE_TTL)
        .build();

    AppState {
        db,
        cache,
        settings: Arc::new(settings),
        clock,
        generator,
        storage,
    }
}

/// Connects to `settings.database_url` and builds the application state
/// around the wall clock.
pub async fn initialize_app_state(settings: Settings) -> Result<AppState> {
    info!("Connecting to database: {}", settings.database_url);
    let db = Database::connect(&settings.database_url).await?;

    Ok(build_app_state(db, settings, Arc::new(SystemClock)))
}
