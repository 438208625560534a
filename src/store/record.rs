//! Receipt and employee persistence on SQLite.
//!
//! The [`RecordStore`] impl carries the two operations the pipeline needs
//! (employee lookup, transactional batch insert); the inherent methods carry
//! the listings and employee management behind the CLI.

use crate::error::StoreError;
use crate::model::{Employee, NewReceipt, ReceiptDetails, Receipt};
use crate::store::{DbPool, RecordStore};
use async_trait::async_trait;
use chrono::Utc;

/// Repository for receipts and employees.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: DbPool,
}

const DETAILS_SELECT: &str = "SELECT r.id, r.image_path, r.receipt_type_id, r.employee_id, \
     r.data, r.created_at, e.name AS employee_name, rt.name AS receipt_type_name \
     FROM receipts r \
     LEFT JOIN employees e ON r.employee_id = e.id \
     LEFT JOIN receipt_types rt ON r.receipt_type_id = rt.id";

impl SqliteRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an employee.
    pub async fn add_employee(&self, name: &str) -> Result<Employee, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Invalid("employee name must not be empty".into()));
        }
        let created_at = Utc::now();
        let id = sqlx::query("INSERT INTO employees (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Employee {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    /// All employees, by name.
    pub async fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let employees = sqlx::query_as::<_, Employee>(
            "SELECT id, name, created_at FROM employees ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(employees)
    }

    /// Delete an employee. Receipts that referenced them keep existing with
    /// `employee_id` set to NULL, in the same transaction.
    pub async fn delete_employee(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE receipts SET employee_id = NULL WHERE employee_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// One receipt, as stored.
    pub async fn get_receipt(&self, id: i64) -> Result<Option<Receipt>, StoreError> {
        let receipt = sqlx::query_as::<_, Receipt>(
            "SELECT id, image_path, receipt_type_id, employee_id, data, created_at \
             FROM receipts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(receipt)
    }

    /// One receipt joined with employee and type names.
    pub async fn get_receipt_details(&self, id: i64) -> Result<Option<ReceiptDetails>, StoreError> {
        let details =
            sqlx::query_as::<_, ReceiptDetails>(&format!("{DETAILS_SELECT} WHERE r.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(details)
    }

    /// Receipts joined with employee and type names, newest first.
    pub async fn list_receipts(&self, limit: Option<i64>) -> Result<Vec<ReceiptDetails>, StoreError> {
        let sql = match limit {
            Some(_) => format!("{DETAILS_SELECT} ORDER BY r.created_at DESC, r.id DESC LIMIT ?"),
            None => format!("{DETAILS_SELECT} ORDER BY r.created_at DESC, r.id DESC"),
        };
        let mut query = sqlx::query_as::<_, ReceiptDetails>(&sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let receipts = query.fetch_all(&self.pool).await?;
        Ok(receipts)
    }

    /// Number of persisted receipts.
    pub async fn count_receipts(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_employee(&self, id: i64) -> Result<Option<Employee>, StoreError> {
        let employee = sqlx::query_as::<_, Employee>(
            "SELECT id, name, created_at FROM employees WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(employee)
    }

    async fn insert_receipts(&self, receipts: &[NewReceipt]) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(receipts.len());

        for receipt in receipts {
            let data = serde_json::to_string(&receipt.field_values)?;
            let id = sqlx::query(
                "INSERT INTO receipts (image_path, receipt_type_id, data, employee_id, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&receipt.image_path)
            .bind(receipt.receipt_type_id)
            .bind(data)
            .bind(receipt.employee_id)
            .bind(receipt.created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            ids.push(id);
        }

        // Not reached on error: `tx` rolls back on drop, so a failed insert
        // leaves none of the batch behind.
        tx.commit().await?;
        Ok(ids)
    }
}
