//! Schema migrations for the SQLite store.
//!
//! The SQL files live in `migrations/` at the crate root and are applied in
//! version order. Already-applied versions are skipped, so opening the same
//! database from several processes is harmless.

use std::path::Path;

use log::debug;
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

use crate::error_handling::StoreError;

/// Applies every pending migration from the crate's `migrations/` directory.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let migrator = Migrator::new(dir.as_path()).await?;
    debug!(
        "Applying up to {} store migration(s) from {}",
        migrator.iter().count(),
        dir.display()
    );
    migrator.run(pool).await?;
    Ok(())
}
