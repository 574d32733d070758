//! Database configuration module.
//!
//! This module handles the `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Unique claim codes, the payment intent
//! primary key and the composite `(goal_id, session_number)` keys are what the
//! idempotency and at-most-once guarantees of the core rely on.

use crate::entities::{
    Experience, ExperienceGift, Goal, GoalHint, HintCacheEntry, Notification, ProcessedPayment,
    ValentineChallenge,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/ernit.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable, or the default
/// local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by [`get_database_url`].
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    if database_url == DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data")?;
    }
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables that do not exist yet.
///
/// Referenced tables are created before the tables that point at them.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Experience).await?;
    create_table(db, &schema, ExperienceGift).await?;
    create_table(db, &schema, ValentineChallenge).await?;
    create_table(db, &schema, ProcessedPayment).await?;
    create_table(db, &schema, Goal).await?;
    create_table(db, &schema, GoalHint).await?;
    create_table(db, &schema, HintCacheEntry).await?;
    create_table(db, &schema, Notification).await?;

    info!("Database tables ensured");
    Ok(())
}
