use anyhow::Result;
use tracing::{info, trace};

use super::initdb::run_migrations;
use super::serve::serve_connection;
use crate::config::Settings;

pub async fn migrate_and_serve(settings: Settings) -> Result<()> {
    trace!("Entering migrate_and_serve function");
    info!("Applying database migrations and starting server");

    let db = run_migrations(&settings.database_url).await?;
    serve_connection(db, settings).await
}
