use sqlx::Row;

use mitsumori_core::domain::estimate::{EstimateId, EstimateItem};
use mitsumori_core::domain::invoice::{InvoiceId, InvoiceStatus, LocalInvoice};

use super::{
    conflict_on_unique, decode_error, format_date, parse_date, parse_datetime,
    parse_optional_date, InvoiceRepository, RepositoryError,
};
use crate::DbPool;

const INVOICE_COLUMNS: &str = "id, invoice_number, estimate_id, customer_name, customer_id, title,
    billing_date, due_date, items, total_amount, tax_amount, notes, status, mf_billing_id,
    pdf_url, created_at, updated_at";

pub struct SqlInvoiceRepository {
    pool: DbPool,
}

impl SqlInvoiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_invoice(row: &sqlx::sqlite::SqliteRow) -> Result<LocalInvoice, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let items: String = row.try_get("items").map_err(decode_error)?;
    let items: Vec<EstimateItem> = serde_json::from_str(&items)
        .map_err(|error| RepositoryError::Decode(format!("invoice {id} items: {error}")))?;
    let billing_date: String = row.try_get("billing_date").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(LocalInvoice {
        id: InvoiceId(id),
        invoice_number: row.try_get("invoice_number").map_err(decode_error)?,
        estimate_id: EstimateId(row.try_get("estimate_id").map_err(decode_error)?),
        customer_name: row.try_get("customer_name").map_err(decode_error)?,
        customer_id: row.try_get("customer_id").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        billing_date: parse_date(&billing_date)?,
        due_date: parse_optional_date(row.try_get("due_date").map_err(decode_error)?)?,
        items,
        total_amount: row.try_get("total_amount").map_err(decode_error)?,
        tax_amount: row.try_get("tax_amount").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        status: status.parse::<InvoiceStatus>().map_err(decode_error)?,
        mf_billing_id: row.try_get("mf_billing_id").map_err(decode_error)?,
        pdf_url: row.try_get("pdf_url").map_err(decode_error)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl InvoiceRepository for SqlInvoiceRepository {
    async fn insert(&self, invoice: LocalInvoice) -> Result<LocalInvoice, RepositoryError> {
        let items = serde_json::to_string(&invoice.items).map_err(decode_error)?;

        let result = sqlx::query(
            "INSERT INTO local_invoice (invoice_number, estimate_id, customer_name, customer_id,
                title, billing_date, due_date, items, total_amount, tax_amount, notes, status,
                mf_billing_id, pdf_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&invoice.invoice_number)
        .bind(invoice.estimate_id.0)
        .bind(&invoice.customer_name)
        .bind(&invoice.customer_id)
        .bind(&invoice.title)
        .bind(invoice.billing_date.format("%Y-%m-%d").to_string())
        .bind(format_date(invoice.due_date))
        .bind(&items)
        .bind(invoice.total_amount)
        .bind(invoice.tax_amount)
        .bind(&invoice.notes)
        .bind(invoice.status.as_str())
        .bind(&invoice.mf_billing_id)
        .bind(&invoice.pdf_url)
        .bind(invoice.created_at.to_rfc3339())
        .bind(invoice.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| conflict_on_unique(error, "invoice", invoice.estimate_id.to_string()))?;

        Ok(LocalInvoice { id: InvoiceId(result.last_insert_rowid()), ..invoice })
    }

    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<LocalInvoice>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM local_invoice WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn find_by_estimate(
        &self,
        estimate_id: EstimateId,
    ) -> Result<Option<LocalInvoice>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM local_invoice WHERE estimate_id = ?"
        ))
        .bind(estimate_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn list(&self) -> Result<Vec<LocalInvoice>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM local_invoice ORDER BY billing_date DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_invoice).collect()
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT invoice_number FROM local_invoice
             WHERE substr(invoice_number, 1, length(?1)) = ?1",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("invoice_number").map_err(decode_error))
            .collect()
    }
}
