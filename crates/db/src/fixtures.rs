use sqlx::Executor;

use mitsumori_core::domain::estimate::{EstimateId, EstimateStatus};

use crate::repositories::{EstimateRepository, RepositoryError, SqlEstimateRepository};
use crate::DbPool;

struct SeedEstimateContract {
    id: i64,
    estimate_number: &'static str,
    status: EstimateStatus,
    approval_steps: usize,
    current_index: Option<usize>,
    total_amount: i64,
}

const SEED_ESTIMATES: &[SeedEstimateContract] = &[
    SeedEstimateContract {
        id: 9001,
        estimate_number: "EST-DEMO-ACME-250401-001",
        status: EstimateStatus::Draft,
        approval_steps: 0,
        current_index: None,
        total_amount: 330_000,
    },
    SeedEstimateContract {
        id: 9002,
        estimate_number: "EST-DEMO-ACME-250402-001",
        status: EstimateStatus::Pending,
        approval_steps: 2,
        current_index: Some(1),
        total_amount: 495_000,
    },
    SeedEstimateContract {
        id: 9003,
        estimate_number: "EST-DEMO-BETA-250403-001",
        status: EstimateStatus::Sent,
        approval_steps: 1,
        current_index: None,
        total_amount: 396_000,
    },
];

const SEED_IDS: &str = "(9001, 9002, 9003)";

/// Demo back-office data: a small catalog, one estimate per lifecycle stage and
/// two maintenance contracts.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            estimates_seeded: SEED_ESTIMATES
                .iter()
                .map(|estimate| EstimateSeedInfo {
                    id: EstimateId(estimate.id),
                    estimate_number: estimate.estimate_number,
                    status: estimate.status,
                })
                .collect(),
        })
    }

    /// Reads the seeded rows back through the repository so the stored JSON is decoded
    /// the same way the application decodes it.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let estimates = SqlEstimateRepository::new(pool.clone());
        let mut checks = Vec::new();

        for contract in SEED_ESTIMATES {
            let Some(estimate) = estimates.find_by_id(EstimateId(contract.id)).await? else {
                checks.push((contract.estimate_number, false));
                continue;
            };

            let steps = estimate.approval_flow.as_ref().map(|flow| flow.len()).unwrap_or(0);
            let current_index =
                estimate.approval_flow.as_ref().and_then(|flow| flow.current_index());
            let totals_match = estimate.totals().total == contract.total_amount
                && estimate.total_amount == contract.total_amount;

            checks.push((
                contract.estimate_number,
                estimate.estimate_number.as_deref() == Some(contract.estimate_number)
                    && estimate.status == contract.status
                    && steps == contract.approval_steps
                    && current_index == contract.current_index
                    && totals_match,
            ));
        }

        let products: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM product WHERE id IN (9001, 9002, 9003)")
                .fetch_one(pool)
                .await?;
        checks.push(("products", products == 3));

        let fees: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM maintenance_fee WHERE id IN (9001, 9002)")
                .fetch_one(pool)
                .await?;
        checks.push(("maintenance-fees", fees == 2));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("DELETE FROM local_invoice WHERE estimate_id IN {SEED_IDS}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM estimate WHERE id IN {SEED_IDS}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM product WHERE id IN {SEED_IDS}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM category WHERE id IN (9001, 9002)").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM maintenance_fee WHERE id IN (9001, 9002)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub estimates_seeded: Vec<EstimateSeedInfo>,
}

#[derive(Debug)]
pub struct EstimateSeedInfo {
    pub id: EstimateId,
    pub estimate_number: &'static str,
    pub status: EstimateStatus,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
