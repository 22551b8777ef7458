use sqlx::Row;

use mitsumori_core::domain::maintenance::{MaintenanceFee, MaintenanceFeeId};

use super::{
    decode_error, format_date, parse_date, parse_optional_date, MaintenanceRepository,
    RepositoryError,
};
use crate::DbPool;

const FEE_COLUMNS: &str =
    "id, customer_name, customer_id, support_type, monthly_fee, started_on, ended_on, memo";

pub struct SqlMaintenanceRepository {
    pool: DbPool,
}

impl SqlMaintenanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_fee(row: &sqlx::sqlite::SqliteRow) -> Result<MaintenanceFee, RepositoryError> {
    let started_on: String = row.try_get("started_on").map_err(decode_error)?;

    Ok(MaintenanceFee {
        id: MaintenanceFeeId(row.try_get("id").map_err(decode_error)?),
        customer_name: row.try_get("customer_name").map_err(decode_error)?,
        customer_id: row.try_get("customer_id").map_err(decode_error)?,
        support_type: row.try_get("support_type").map_err(decode_error)?,
        monthly_fee: row.try_get("monthly_fee").map_err(decode_error)?,
        started_on: parse_date(&started_on)?,
        ended_on: parse_optional_date(row.try_get("ended_on").map_err(decode_error)?)?,
        memo: row.try_get("memo").map_err(decode_error)?,
    })
}

#[async_trait::async_trait]
impl MaintenanceRepository for SqlMaintenanceRepository {
    async fn list(&self) -> Result<Vec<MaintenanceFee>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FEE_COLUMNS} FROM maintenance_fee ORDER BY customer_name, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fee).collect()
    }

    async fn find_by_id(
        &self,
        id: MaintenanceFeeId,
    ) -> Result<Option<MaintenanceFee>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {FEE_COLUMNS} FROM maintenance_fee WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_fee).transpose()
    }

    async fn insert(&self, fee: MaintenanceFee) -> Result<MaintenanceFee, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO maintenance_fee (customer_name, customer_id, support_type, monthly_fee,
                started_on, ended_on, memo)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fee.customer_name)
        .bind(&fee.customer_id)
        .bind(&fee.support_type)
        .bind(fee.monthly_fee)
        .bind(fee.started_on.format("%Y-%m-%d").to_string())
        .bind(format_date(fee.ended_on))
        .bind(&fee.memo)
        .execute(&self.pool)
        .await?;

        Ok(MaintenanceFee { id: MaintenanceFeeId(result.last_insert_rowid()), ..fee })
    }

    async fn update(&self, fee: &MaintenanceFee) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE maintenance_fee SET customer_name = ?, customer_id = ?, support_type = ?,
                monthly_fee = ?, started_on = ?, ended_on = ?, memo = ?
             WHERE id = ?",
        )
        .bind(&fee.customer_name)
        .bind(&fee.customer_id)
        .bind(&fee.support_type)
        .bind(fee.monthly_fee)
        .bind(fee.started_on.format("%Y-%m-%d").to_string())
        .bind(format_date(fee.ended_on))
        .bind(&fee.memo)
        .bind(fee.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "maintenance_fee",
                id: fee.id.0.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: MaintenanceFeeId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM maintenance_fee WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use mitsumori_core::domain::maintenance::{summarize_month, MaintenanceFee, MaintenanceFeeId};

    use super::SqlMaintenanceRepository;
    use crate::repositories::test_support::setup;
    use crate::repositories::{MaintenanceRepository, RepositoryError};

    fn fee(customer: &str, support_type: &str, monthly_fee: i64) -> MaintenanceFee {
        MaintenanceFee {
            id: MaintenanceFeeId(0),
            customer_name: customer.to_string(),
            customer_id: None,
            support_type: support_type.to_string(),
            monthly_fee,
            started_on: NaiveDate::from_ymd_opt(2025, 1, 1).expect("date"),
            ended_on: None,
            memo: None,
        }
    }

    #[tokio::test]
    async fn fees_round_trip_and_feed_the_monthly_summary() {
        let repo = SqlMaintenanceRepository::new(setup().await);
        repo.insert(fee("A社", "サーバー保守", 30_000)).await.expect("insert a");
        let mut ended = fee("B社", "サイト保守", 10_000);
        ended.ended_on = NaiveDate::from_ymd_opt(2025, 2, 28);
        repo.insert(ended).await.expect("insert b");

        let fees = repo.list().await.expect("list");
        assert_eq!(fees.len(), 2);

        let march = summarize_month(&fees, 2025, 3);
        assert_eq!(march.active_contracts, 1);
        assert_eq!(march.total_monthly_fee, 30_000);

        let february = summarize_month(&fees, 2025, 2);
        assert_eq!(february.total_monthly_fee, 40_000);
    }

    #[tokio::test]
    async fn update_and_delete_target_one_row() {
        let repo = SqlMaintenanceRepository::new(setup().await);
        let mut stored = repo.insert(fee("A社", "サーバー保守", 30_000)).await.expect("insert");

        stored.monthly_fee = 35_000;
        stored.memo = Some("値上げ".to_string());
        repo.update(&stored).await.expect("update");
        let found = repo.find_by_id(stored.id).await.expect("find").expect("exists");
        assert_eq!(found, stored);

        assert!(repo.delete(stored.id).await.expect("delete"));
        let error = repo.update(&stored).await.expect_err("gone");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }
}
