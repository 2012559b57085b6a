use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

use crate::config::QuillConfig;

pub mod migrator;

pub async fn open_or_create_db(config: &QuillConfig) -> Result<DatabaseConnection, DbErr> {
    // Use display() to convert PathBuf to string representation
    let connection_string = format!("sqlite://{}?mode=rwc", config.database_path.display());

    let mut options = ConnectOptions::new(connection_string);
    options.sqlx_logging(false);

    Database::connect(options).await
}

pub async fn migrate_up(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}

/// Every pooled connection to `sqlite::memory:` is its own database, so
/// tests pin the pool to a single connection.
#[cfg(test)]
pub(crate) fn memory_options() -> ConnectOptions {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    options
}

/// Fresh, fully migrated in-memory database for tests.
#[cfg(test)]
pub(crate) async fn test_db() -> DatabaseConnection {
    let db = Database::connect(memory_options())
        .await
        .expect("Failed to create in-memory database");

    migrator::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}
