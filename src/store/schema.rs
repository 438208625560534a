//! Receipt-type schema management on SQLite.
//!
//! Read-side: the [`SchemaStore`] impl the pipeline consumes. Write-side:
//! the management operations behind `img2rec types …` and `img2rec fields …`.
//! A type and its field list are always written inside one transaction;
//! deleting a type removes its fields first.

use crate::error::StoreError;
use crate::model::{FieldDef, ReceiptType};
use crate::store::{DbPool, SchemaStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;

/// Repository for receipt types and their fields.
#[derive(Clone)]
pub struct SqliteSchemaStore {
    pool: DbPool,
}

#[derive(sqlx::FromRow)]
struct TypeRow {
    id: i64,
    name: String,
    description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct FieldRow {
    field_name: String,
    field_description: Option<String>,
    is_required: bool,
}

impl SqliteSchemaStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a receipt type with its field list in one transaction.
    pub async fn add_receipt_type(
        &self,
        name: &str,
        description: Option<&str>,
        fields: &[FieldDef],
    ) -> Result<i64, StoreError> {
        validate_type(name, fields)?;

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let type_id = sqlx::query(
            "INSERT INTO receipt_types (name, description, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for field in fields {
            sqlx::query(
                "INSERT INTO receipt_fields (receipt_type_id, field_name, field_description, is_required, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(type_id)
            .bind(&field.name)
            .bind(&field.description)
            .bind(field.is_required)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(type_id)
    }

    /// Replace a receipt type's name, description, and entire field list.
    pub async fn update_receipt_type(
        &self,
        id: i64,
        name: &str,
        description: Option<&str>,
        fields: &[FieldDef],
    ) -> Result<(), StoreError> {
        validate_type(name, fields)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE receipt_types SET name = ?, description = ? WHERE id = ?")
            .bind(name)
            .bind(description)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::Invalid(format!("receipt type {id} not found")));
        }

        sqlx::query("DELETE FROM receipt_fields WHERE receipt_type_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        for field in fields {
            sqlx::query(
                "INSERT INTO receipt_fields (receipt_type_id, field_name, field_description, is_required, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&field.name)
            .bind(&field.description)
            .bind(field.is_required)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Append one field to an existing receipt type.
    pub async fn add_field(&self, receipt_type_id: i64, field: &FieldDef) -> Result<i64, StoreError> {
        if field.name.trim().is_empty() {
            return Err(StoreError::Invalid("field name must not be empty".into()));
        }
        let existing = self.get_receipt_type(receipt_type_id).await?.ok_or_else(|| {
            StoreError::Invalid(format!("receipt type {receipt_type_id} not found"))
        })?;
        if existing.fields.iter().any(|f| f.name == field.name) {
            return Err(StoreError::Invalid(format!(
                "field '{}' already exists on '{}'",
                field.name, existing.name
            )));
        }

        let id = sqlx::query(
            "INSERT INTO receipt_fields (receipt_type_id, field_name, field_description, is_required, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(receipt_type_id)
        .bind(&field.name)
        .bind(&field.description)
        .bind(field.is_required)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Delete a receipt type. Its fields go first, in the same transaction.
    pub async fn delete_receipt_type(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM receipt_fields WHERE receipt_type_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM receipt_types WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch one receipt type with its fields.
    pub async fn get_receipt_type(&self, id: i64) -> Result<Option<ReceiptType>, StoreError> {
        let row = sqlx::query_as::<_, TypeRow>(
            "SELECT id, name, description FROM receipt_types WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: TypeRow) -> Result<ReceiptType, StoreError> {
        let fields = sqlx::query_as::<_, FieldRow>(
            "SELECT field_name, field_description, is_required \
             FROM receipt_fields WHERE receipt_type_id = ? ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ReceiptType {
            id: row.id,
            name: row.name,
            description: row.description,
            fields: fields
                .into_iter()
                .map(|f| FieldDef {
                    name: f.field_name,
                    description: f.field_description,
                    is_required: f.is_required,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl SchemaStore for SqliteSchemaStore {
    async fn list_receipt_types(
        &self,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ReceiptType>, StoreError> {
        match ids {
            None => {
                let rows = sqlx::query_as::<_, TypeRow>(
                    "SELECT id, name, description FROM receipt_types ORDER BY name",
                )
                .fetch_all(&self.pool)
                .await?;

                let mut types = Vec::with_capacity(rows.len());
                for row in rows {
                    types.push(self.hydrate(row).await?);
                }
                Ok(types)
            }
            Some(ids) => {
                // Unknown ids are dropped without error; an empty result is
                // the caller's precondition to enforce.
                let mut types = Vec::with_capacity(ids.len());
                for &id in ids {
                    if let Some(receipt_type) = self.get_receipt_type(id).await? {
                        types.push(receipt_type);
                    }
                }
                Ok(types)
            }
        }
    }
}

fn validate_type(name: &str, fields: &[FieldDef]) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid(
            "receipt type name must not be empty".into(),
        ));
    }
    let mut seen = HashSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err(StoreError::Invalid("field name must not be empty".into()));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(StoreError::Invalid(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }
    }
    Ok(())
}
