//! Persistence: connection pool, schema setup, and the two store seams the
//! pipeline consumes.
//!
//! The pipeline never talks SQL. It sees exactly two traits:
//!
//! * [`SchemaStore`] — resolve the candidate receipt types for a batch.
//! * [`RecordStore`] — validate the employee reference and commit the
//!   batch's receipts in one transaction.
//!
//! [`SqliteSchemaStore`] and [`SqliteRecordStore`] implement them on a
//! shared SQLite pool and additionally carry the management operations
//! (create/update/delete types and fields, employees, listings) the CLI
//! exposes.

pub mod record;
pub mod schema;

pub use record::SqliteRecordStore;
pub use schema::SqliteSchemaStore;

use crate::error::StoreError;
use crate::model::{Employee, NewReceipt, ReceiptType};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// The connection pool type shared by both stores.
pub type DbPool = sqlx::SqlitePool;

/// Resolves receipt-type definitions for a batch.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Return receipt types with their fields populated.
    ///
    /// With `ids = None`, every type is returned. With `ids = Some(…)`,
    /// only the named types are returned, in request order; unknown ids are
    /// silently omitted — the caller decides whether an empty result is an
    /// error.
    async fn list_receipt_types(&self, ids: Option<&[i64]>)
        -> Result<Vec<ReceiptType>, StoreError>;
}

/// Persists receipts and resolves employee references.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the employee a batch is attributed to.
    async fn get_employee(&self, id: i64) -> Result<Option<Employee>, StoreError>;

    /// Insert every record of one batch inside a single transaction and
    /// return the new row ids in input order. On any failure the whole
    /// transaction rolls back — no record of the batch becomes visible.
    async fn insert_receipts(&self, receipts: &[NewReceipt]) -> Result<Vec<i64>, StoreError>;
}

/// Open (and if necessary create) the database at `database`.
///
/// Accepts a plain file path, a `sqlite://` URL, or `sqlite::memory:`.
/// Foreign keys are enforced on every connection. In-memory databases get a
/// single-connection pool so all handles see the same data.
pub async fn connect(database: &str) -> Result<DbPool, StoreError> {
    let options = SqliteConnectOptions::from_str(database)
        .map_err(StoreError::Database)?
        .create_if_missing(true)
        .foreign_keys(true);

    let max_connections = if database.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!("database pool established for '{database}'");
    Ok(pool)
}

/// Create the tables if they do not exist. Idempotent.
pub async fn init_schema(pool: &DbPool) -> Result<(), StoreError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS employees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS receipt_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS receipt_fields (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_type_id INTEGER NOT NULL REFERENCES receipt_types(id),
            field_name TEXT NOT NULL,
            field_description TEXT,
            is_required INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            image_path TEXT NOT NULL,
            receipt_type_id INTEGER NOT NULL REFERENCES receipt_types(id),
            data TEXT NOT NULL,
            employee_id INTEGER REFERENCES employees(id),
            created_at TEXT NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Convenience: open the database and ensure the schema exists.
pub async fn open(database: &str) -> Result<DbPool, StoreError> {
    let pool = connect(database).await?;
    init_schema(&pool).await?;
    Ok(pool)
}
