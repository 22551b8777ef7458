use chrono::Utc;
use sqlx::Row;

use mitsumori_core::domain::approval::ApprovalFlow;
use mitsumori_core::domain::estimate::{
    Estimate, EstimateId, EstimateItem, EstimateStatus, MoneyForwardLinks,
};

use super::{
    conflict_on_unique, decode_error, format_date, parse_datetime, parse_optional_date,
    parse_optional_datetime, EstimateFilter, EstimateRepository, RepositoryError,
};
use crate::DbPool;

const ESTIMATE_COLUMNS: &str = "id, estimate_number, customer_name, customer_id, title,
    issue_date, due_date, delivery_date, total_amount, tax_amount, notes, internal_memo,
    items, approval_flow, status, is_order_confirmed, staff_id, staff_name,
    mf_quote_id, mf_invoice_id, mf_quote_pdf_url, mf_invoice_pdf_url, mf_deleted_at,
    lock_version, created_at, updated_at";

pub struct SqlEstimateRepository {
    pool: DbPool,
}

impl SqlEstimateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_estimate(row: &sqlx::sqlite::SqliteRow) -> Result<Estimate, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let items: String = row.try_get("items").map_err(decode_error)?;
    let approval_flow: Option<String> = row.try_get("approval_flow").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let items: Vec<EstimateItem> = serde_json::from_str(&items)
        .map_err(|error| RepositoryError::Decode(format!("estimate {id} items: {error}")))?;
    let approval_flow = approval_flow
        .filter(|raw| !raw.trim().is_empty() && raw.trim() != "null")
        .map(|raw| ApprovalFlow::from_json(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("estimate {id} approval_flow: {error}")))?;

    Ok(Estimate {
        id: EstimateId(id),
        estimate_number: row.try_get("estimate_number").map_err(decode_error)?,
        customer_name: row.try_get("customer_name").map_err(decode_error)?,
        customer_id: row.try_get("customer_id").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        issue_date: parse_optional_date(row.try_get("issue_date").map_err(decode_error)?)?,
        due_date: parse_optional_date(row.try_get("due_date").map_err(decode_error)?)?,
        delivery_date: parse_optional_date(row.try_get("delivery_date").map_err(decode_error)?)?,
        total_amount: row.try_get("total_amount").map_err(decode_error)?,
        tax_amount: row.try_get("tax_amount").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        internal_memo: row.try_get("internal_memo").map_err(decode_error)?,
        items,
        approval_flow,
        status: status.parse::<EstimateStatus>().map_err(decode_error)?,
        is_order_confirmed: row.try_get("is_order_confirmed").map_err(decode_error)?,
        staff_id: row.try_get("staff_id").map_err(decode_error)?,
        staff_name: row.try_get("staff_name").map_err(decode_error)?,
        money_forward: MoneyForwardLinks {
            quote_id: row.try_get("mf_quote_id").map_err(decode_error)?,
            invoice_id: row.try_get("mf_invoice_id").map_err(decode_error)?,
            quote_pdf_url: row.try_get("mf_quote_pdf_url").map_err(decode_error)?,
            invoice_pdf_url: row.try_get("mf_invoice_pdf_url").map_err(decode_error)?,
            deleted_at: parse_optional_datetime(row.try_get("mf_deleted_at").map_err(decode_error)?)?,
        },
        lock_version: row.try_get("lock_version").map_err(decode_error)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

struct EncodedEstimate {
    items: String,
    approval_flow: Option<String>,
}

fn encode(estimate: &Estimate) -> Result<EncodedEstimate, RepositoryError> {
    let items = serde_json::to_string(&estimate.items).map_err(decode_error)?;
    let approval_flow =
        estimate.approval_flow.as_ref().map(ApprovalFlow::to_json).transpose().map_err(decode_error)?;
    Ok(EncodedEstimate { items, approval_flow })
}

#[async_trait::async_trait]
impl EstimateRepository for SqlEstimateRepository {
    async fn find_by_id(&self, id: EstimateId) -> Result<Option<Estimate>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ESTIMATE_COLUMNS} FROM estimate WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_estimate).transpose()
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Estimate>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ESTIMATE_COLUMNS} FROM estimate WHERE estimate_number = ?"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_estimate).transpose()
    }

    async fn list(&self, filter: &EstimateFilter) -> Result<Vec<Estimate>, RepositoryError> {
        let keyword = filter
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(|keyword| format!("%{}%", keyword.to_lowercase()));

        let rows = sqlx::query(&format!(
            "SELECT {ESTIMATE_COLUMNS} FROM estimate
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR lower(customer_name) LIKE ?2 OR lower(title) LIKE ?2)
               AND (?3 = 1 OR mf_deleted_at IS NULL)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4"
        ))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(keyword)
        .bind(filter.include_mf_deleted)
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_estimate).collect()
    }

    async fn insert(&self, estimate: Estimate) -> Result<Estimate, RepositoryError> {
        let encoded = encode(&estimate)?;
        let number = estimate.estimate_number.clone().unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO estimate (estimate_number, customer_name, customer_id, title,
                issue_date, due_date, delivery_date, total_amount, tax_amount, notes,
                internal_memo, items, approval_flow, status, is_order_confirmed, staff_id,
                staff_name, mf_quote_id, mf_invoice_id, mf_quote_pdf_url, mf_invoice_pdf_url,
                mf_deleted_at, lock_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&estimate.estimate_number)
        .bind(&estimate.customer_name)
        .bind(&estimate.customer_id)
        .bind(&estimate.title)
        .bind(format_date(estimate.issue_date))
        .bind(format_date(estimate.due_date))
        .bind(format_date(estimate.delivery_date))
        .bind(estimate.total_amount)
        .bind(estimate.tax_amount)
        .bind(&estimate.notes)
        .bind(&estimate.internal_memo)
        .bind(&encoded.items)
        .bind(&encoded.approval_flow)
        .bind(estimate.status.as_str())
        .bind(estimate.is_order_confirmed)
        .bind(estimate.staff_id)
        .bind(&estimate.staff_name)
        .bind(&estimate.money_forward.quote_id)
        .bind(&estimate.money_forward.invoice_id)
        .bind(&estimate.money_forward.quote_pdf_url)
        .bind(&estimate.money_forward.invoice_pdf_url)
        .bind(estimate.money_forward.deleted_at.map(|at| at.to_rfc3339()))
        .bind(estimate.created_at.to_rfc3339())
        .bind(estimate.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| conflict_on_unique(error, "estimate", number))?;

        Ok(Estimate { id: EstimateId(result.last_insert_rowid()), lock_version: 0, ..estimate })
    }

    async fn update(&self, estimate: &Estimate) -> Result<Estimate, RepositoryError> {
        let encoded = encode(estimate)?;
        let updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE estimate SET
                estimate_number = ?, customer_name = ?, customer_id = ?, title = ?,
                issue_date = ?, due_date = ?, delivery_date = ?, total_amount = ?,
                tax_amount = ?, notes = ?, internal_memo = ?, items = ?, approval_flow = ?,
                status = ?, is_order_confirmed = ?, staff_id = ?, staff_name = ?,
                mf_quote_id = ?, mf_invoice_id = ?, mf_quote_pdf_url = ?,
                mf_invoice_pdf_url = ?, mf_deleted_at = ?,
                lock_version = lock_version + 1, updated_at = ?
             WHERE id = ? AND lock_version = ?",
        )
        .bind(&estimate.estimate_number)
        .bind(&estimate.customer_name)
        .bind(&estimate.customer_id)
        .bind(&estimate.title)
        .bind(format_date(estimate.issue_date))
        .bind(format_date(estimate.due_date))
        .bind(format_date(estimate.delivery_date))
        .bind(estimate.total_amount)
        .bind(estimate.tax_amount)
        .bind(&estimate.notes)
        .bind(&estimate.internal_memo)
        .bind(&encoded.items)
        .bind(&encoded.approval_flow)
        .bind(estimate.status.as_str())
        .bind(estimate.is_order_confirmed)
        .bind(estimate.staff_id)
        .bind(&estimate.staff_name)
        .bind(&estimate.money_forward.quote_id)
        .bind(&estimate.money_forward.invoice_id)
        .bind(&estimate.money_forward.quote_pdf_url)
        .bind(&estimate.money_forward.invoice_pdf_url)
        .bind(estimate.money_forward.deleted_at.map(|at| at.to_rfc3339()))
        .bind(updated_at.to_rfc3339())
        .bind(estimate.id.0)
        .bind(estimate.lock_version)
        .execute(&self.pool)
        .await
        .map_err(|error| conflict_on_unique(error, "estimate", estimate.id.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM estimate WHERE id = ?")
                .bind(estimate.id.0)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            let id = estimate.id.to_string();
            return Err(if exists {
                RepositoryError::Conflict { entity: "estimate", id }
            } else {
                RepositoryError::NotFound { entity: "estimate", id }
            });
        }

        Ok(Estimate { lock_version: estimate.lock_version + 1, updated_at, ..estimate.clone() })
    }

    async fn delete(&self, id: EstimateId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM estimate WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT estimate_number FROM estimate
             WHERE estimate_number IS NOT NULL AND substr(estimate_number, 1, length(?1)) = ?1",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("estimate_number").map_err(decode_error))
            .collect()
    }
}
