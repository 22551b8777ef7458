use chrono::{DateTime, Utc};
use sqlx::Row;

use mitsumori_core::domain::invoice::Billing;

use super::{
    decode_error, format_date, parse_datetime, parse_optional_date, parse_optional_datetime,
    BillingRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlBillingRepository {
    pool: DbPool,
}

impl SqlBillingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_billing(row: &sqlx::sqlite::SqliteRow) -> Result<Billing, RepositoryError> {
    let synced_at: String = row.try_get("synced_at").map_err(decode_error)?;

    Ok(Billing {
        mf_billing_id: row.try_get("mf_billing_id").map_err(decode_error)?,
        billing_number: row.try_get("billing_number").map_err(decode_error)?,
        partner_name: row.try_get("partner_name").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        billing_date: parse_optional_date(row.try_get("billing_date").map_err(decode_error)?)?,
        due_date: parse_optional_date(row.try_get("due_date").map_err(decode_error)?)?,
        total_amount: row.try_get("total_amount").map_err(decode_error)?,
        tax_amount: row.try_get("tax_amount").map_err(decode_error)?,
        payment_status: row.try_get("payment_status").map_err(decode_error)?,
        pdf_url: row.try_get("pdf_url").map_err(decode_error)?,
        synced_at: parse_datetime(&synced_at)?,
        deleted_at: parse_optional_datetime(row.try_get("deleted_at").map_err(decode_error)?)?,
    })
}

#[async_trait::async_trait]
impl BillingRepository for SqlBillingRepository {
    async fn upsert_synced(&self, billings: &[Billing]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for billing in billings {
            // A billing that reappears upstream is live again.
            sqlx::query(
                "INSERT INTO billing (mf_billing_id, billing_number, partner_name, title,
                    billing_date, due_date, total_amount, tax_amount, payment_status, pdf_url,
                    synced_at, deleted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
                 ON CONFLICT(mf_billing_id) DO UPDATE SET
                    billing_number = excluded.billing_number,
                    partner_name = excluded.partner_name,
                    title = excluded.title,
                    billing_date = excluded.billing_date,
                    due_date = excluded.due_date,
                    total_amount = excluded.total_amount,
                    tax_amount = excluded.tax_amount,
                    payment_status = excluded.payment_status,
                    pdf_url = excluded.pdf_url,
                    synced_at = excluded.synced_at,
                    deleted_at = NULL",
            )
            .bind(&billing.mf_billing_id)
            .bind(&billing.billing_number)
            .bind(&billing.partner_name)
            .bind(&billing.title)
            .bind(format_date(billing.billing_date))
            .bind(format_date(billing.due_date))
            .bind(billing.total_amount)
            .bind(billing.tax_amount)
            .bind(&billing.payment_status)
            .bind(&billing.pdf_url)
            .bind(billing.synced_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_missing_deleted(
        &self,
        seen_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let seen = serde_json::to_string(seen_ids).map_err(decode_error)?;

        let result = sqlx::query(
            "UPDATE billing SET deleted_at = ?
             WHERE deleted_at IS NULL
               AND mf_billing_id NOT IN (SELECT value FROM json_each(?))",
        )
        .bind(at.to_rfc3339())
        .bind(seen)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, include_deleted: bool) -> Result<Vec<Billing>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT mf_billing_id, billing_number, partner_name, title, billing_date, due_date,
                total_amount, tax_amount, payment_status, pdf_url, synced_at, deleted_at
             FROM billing
             WHERE (?1 = 1 OR deleted_at IS NULL)
             ORDER BY billing_date DESC, mf_billing_id",
        )
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_billing).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use mitsumori_core::domain::invoice::Billing;

    use super::SqlBillingRepository;
    use crate::repositories::test_support::setup;
    use crate::repositories::BillingRepository;

    fn billing(id: &str, total: i64) -> Billing {
        Billing {
            mf_billing_id: id.to_string(),
            billing_number: Some(format!("B-{id}")),
            partner_name: Some("取引先".to_string()),
            title: Some("請求".to_string()),
            billing_date: NaiveDate::from_ymd_opt(2025, 4, 30),
            due_date: NaiveDate::from_ymd_opt(2025, 5, 31),
            total_amount: total,
            tax_amount: total / 11,
            payment_status: Some("unsettled".to_string()),
            pdf_url: None,
            synced_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn sync_upserts_and_soft_deletes_missing_billings() {
        let repo = SqlBillingRepository::new(setup().await);
        repo.upsert_synced(&[billing("a", 11_000), billing("b", 22_000)]).await.expect("first sync");

        repo.upsert_synced(&[billing("a", 33_000)]).await.expect("second sync");
        let removed =
            repo.mark_missing_deleted(&["a".to_string()], Utc::now()).await.expect("mark");
        assert_eq!(removed, 1);

        let live = repo.list(false).await.expect("live");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].mf_billing_id, "a");
        assert_eq!(live[0].total_amount, 33_000);

        let all = repo.list(true).await.expect("all");
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|row| row.mf_billing_id == "b" && row.deleted_at.is_some()));
    }

    #[tokio::test]
    async fn reappearing_billing_is_restored() {
        let repo = SqlBillingRepository::new(setup().await);
        repo.upsert_synced(&[billing("a", 11_000)]).await.expect("sync");
        repo.mark_missing_deleted(&[], Utc::now()).await.expect("mark all");
        assert!(repo.list(false).await.expect("live").is_empty());

        repo.upsert_synced(&[billing("a", 11_000)]).await.expect("resync");
        assert_eq!(repo.list(false).await.expect("live").len(), 1);
    }
}
