use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use mitsumori_core::domain::estimate::{Estimate, EstimateId, EstimateStatus};
use mitsumori_core::domain::invoice::{Billing, InvoiceId, LocalInvoice};
use mitsumori_core::domain::maintenance::{MaintenanceFee, MaintenanceFeeId};
use mitsumori_core::domain::product::{Category, Product, ProductId};

pub mod billing;
pub mod estimate;
pub mod invoice;
pub mod maintenance;
pub mod memory;
pub mod money_forward;
pub mod product;

pub use billing::SqlBillingRepository;
pub use estimate::SqlEstimateRepository;
pub use invoice::SqlInvoiceRepository;
pub use maintenance::SqlMaintenanceRepository;
pub use memory::{
    InMemoryBillingRepository, InMemoryEstimateRepository, InMemoryInvoiceRepository,
    InMemoryMaintenanceRepository, InMemoryMoneyForwardTokenStore, InMemoryProductRepository,
};
pub use money_forward::{MoneyForwardConnection, SqlMoneyForwardTokenStore};
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was modified concurrently or already exists")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EstimateFilter {
    pub status: Option<EstimateStatus>,
    /// Case-insensitive substring of customer name or title.
    pub keyword: Option<String>,
    pub include_mf_deleted: bool,
    pub limit: Option<u32>,
}

impl EstimateFilter {
    pub(crate) fn matches(&self, estimate: &Estimate) -> bool {
        if let Some(status) = self.status {
            if estimate.status != status {
                return false;
            }
        }
        if !self.include_mf_deleted && estimate.money_forward.deleted_at.is_some() {
            return false;
        }
        match self.keyword.as_deref().map(str::trim).filter(|keyword| !keyword.is_empty()) {
            Some(keyword) => {
                let keyword = keyword.to_lowercase();
                estimate.customer_name.to_lowercase().contains(&keyword)
                    || estimate.title.to_lowercase().contains(&keyword)
            }
            None => true,
        }
    }
}

#[async_trait]
pub trait EstimateRepository: Send + Sync {
    async fn find_by_id(&self, id: EstimateId) -> Result<Option<Estimate>, RepositoryError>;
    async fn find_by_number(&self, number: &str) -> Result<Option<Estimate>, RepositoryError>;
    async fn list(&self, filter: &EstimateFilter) -> Result<Vec<Estimate>, RepositoryError>;
    /// Stores a new estimate and returns it with its assigned id.
    async fn insert(&self, estimate: Estimate) -> Result<Estimate, RepositoryError>;
    /// Compare-and-swap on `lock_version`; returns the stored estimate with the bumped version.
    async fn update(&self, estimate: &Estimate) -> Result<Estimate, RepositoryError>;
    async fn delete(&self, id: EstimateId) -> Result<bool, RepositoryError>;
    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list_products(&self, include_inactive: bool) -> Result<Vec<Product>, RepositoryError>;
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError>;
    async fn insert_product(&self, product: Product) -> Result<Product, RepositoryError>;
    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError>;
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError>;
    /// Creates a category with the next free three-digit code.
    async fn create_category(
        &self,
        name: &str,
        business_division: Option<&str>,
    ) -> Result<Category, RepositoryError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Fails with `Conflict` when the estimate was already converted.
    async fn insert(&self, invoice: LocalInvoice) -> Result<LocalInvoice, RepositoryError>;
    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<LocalInvoice>, RepositoryError>;
    async fn find_by_estimate(
        &self,
        estimate_id: EstimateId,
    ) -> Result<Option<LocalInvoice>, RepositoryError>;
    async fn list(&self) -> Result<Vec<LocalInvoice>, RepositoryError>;
    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<MaintenanceFee>, RepositoryError>;
    async fn find_by_id(
        &self,
        id: MaintenanceFeeId,
    ) -> Result<Option<MaintenanceFee>, RepositoryError>;
    async fn insert(&self, fee: MaintenanceFee) -> Result<MaintenanceFee, RepositoryError>;
    async fn update(&self, fee: &MaintenanceFee) -> Result<(), RepositoryError>;
    async fn delete(&self, id: MaintenanceFeeId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn upsert_synced(&self, billings: &[Billing]) -> Result<(), RepositoryError>;
    /// Soft-deletes rows whose ids were not part of the latest sync. Returns the count.
    async fn mark_missing_deleted(
        &self,
        seen_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
    async fn list(&self, include_deleted: bool) -> Result<Vec<Billing>, RepositoryError>;
}

#[async_trait]
pub trait MoneyForwardTokenStore: Send + Sync {
    async fn store_state(&self, state: &str, created_at: DateTime<Utc>)
        -> Result<(), RepositoryError>;
    /// Removes the state and reports whether it existed and was issued after `not_before`.
    async fn consume_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn save_connection(&self, connection: &MoneyForwardConnection)
        -> Result<(), RepositoryError>;
    async fn load_connection(&self) -> Result<Option<MoneyForwardConnection>, RepositoryError>;
    async fn clear_connection(&self) -> Result<(), RepositoryError>;
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn parse_optional_datetime(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.filter(|value| !value.trim().is_empty()).map(|value| parse_datetime(&value)).transpose()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("date `{raw}`: {error}")))
}

pub(crate) fn parse_optional_date(raw: Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    raw.filter(|value| !value.trim().is_empty()).map(|value| parse_date(&value)).transpose()
}

pub(crate) fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|date| date.format("%Y-%m-%d").to_string())
}

/// Maps unique-constraint violations to `Conflict`, everything else to `Database`.
pub(crate) fn conflict_on_unique(
    error: sqlx::Error,
    entity: &'static str,
    id: impl Into<String>,
) -> RepositoryError {
    let unique = matches!(&error, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique {
        RepositoryError::Conflict { entity, id: id.into() }
    } else {
        RepositoryError::Database(error)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}
