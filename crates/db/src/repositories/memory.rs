use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use mitsumori_core::domain::estimate::{Estimate, EstimateId};
use mitsumori_core::domain::invoice::{Billing, InvoiceId, LocalInvoice};
use mitsumori_core::domain::maintenance::{MaintenanceFee, MaintenanceFeeId};
use mitsumori_core::domain::product::{next_category_code, Category, CategoryId, Product, ProductId};

use super::{
    BillingRepository, EstimateFilter, EstimateRepository, InvoiceRepository,
    MaintenanceRepository, MoneyForwardConnection, MoneyForwardTokenStore, ProductRepository,
    RepositoryError,
};

/// Ids are never handed out twice, even after the row holding the highest one is deleted.
#[derive(Default)]
struct IdSequence(AtomicI64);

impl IdSequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn with_prefix<'a>(numbers: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    numbers.filter(|number| number.starts_with(prefix)).map(str::to_string).collect()
}

#[derive(Default)]
pub struct InMemoryEstimateRepository {
    estimates: RwLock<BTreeMap<i64, Estimate>>,
    ids: IdSequence,
}

#[async_trait::async_trait]
impl EstimateRepository for InMemoryEstimateRepository {
    async fn find_by_id(&self, id: EstimateId) -> Result<Option<Estimate>, RepositoryError> {
        let estimates = self.estimates.read().await;
        Ok(estimates.get(&id.0).cloned())
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Estimate>, RepositoryError> {
        let estimates = self.estimates.read().await;
        Ok(estimates
            .values()
            .find(|estimate| estimate.estimate_number.as_deref() == Some(number))
            .cloned())
    }

    async fn list(&self, filter: &EstimateFilter) -> Result<Vec<Estimate>, RepositoryError> {
        let estimates = self.estimates.read().await;
        let mut matching: Vec<Estimate> =
            estimates.values().filter(|estimate| filter.matches(estimate)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }

    async fn insert(&self, estimate: Estimate) -> Result<Estimate, RepositoryError> {
        let mut estimates = self.estimates.write().await;
        if let Some(number) = estimate.estimate_number.as_deref() {
            if estimates.values().any(|existing| existing.estimate_number.as_deref() == Some(number))
            {
                return Err(RepositoryError::Conflict { entity: "estimate", id: number.to_string() });
            }
        }

        let id = self.ids.next();
        let stored = Estimate { id: EstimateId(id), lock_version: 0, ..estimate };
        estimates.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, estimate: &Estimate) -> Result<Estimate, RepositoryError> {
        let mut estimates = self.estimates.write().await;
        let id = estimate.id.to_string();
        let Some(current) = estimates.get(&estimate.id.0) else {
            return Err(RepositoryError::NotFound { entity: "estimate", id });
        };
        if current.lock_version != estimate.lock_version {
            return Err(RepositoryError::Conflict { entity: "estimate", id });
        }

        let stored = Estimate {
            lock_version: estimate.lock_version + 1,
            updated_at: Utc::now(),
            ..estimate.clone()
        };
        estimates.insert(estimate.id.0, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: EstimateId) -> Result<bool, RepositoryError> {
        let mut estimates = self.estimates.write().await;
        Ok(estimates.remove(&id.0).is_some())
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let estimates = self.estimates.read().await;
        Ok(with_prefix(
            estimates.values().filter_map(|estimate| estimate.estimate_number.as_deref()),
            prefix,
        ))
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<BTreeMap<i64, Product>>,
    categories: RwLock<BTreeMap<i64, Category>>,
    product_ids: IdSequence,
    category_ids: IdSequence,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list_products(&self, include_inactive: bool) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut listed: Vec<Product> = products
            .values()
            .filter(|product| include_inactive || product.is_active)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(listed)
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&id.0).cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.values().find(|product| product.sku == sku.trim()).cloned())
    }

    async fn insert_product(&self, product: Product) -> Result<Product, RepositoryError> {
        let mut products = self.products.write().await;
        if products.values().any(|existing| existing.sku == product.sku) {
            return Err(RepositoryError::Conflict { entity: "product", id: product.sku });
        }

        let id = self.product_ids.next();
        let stored = Product { id: ProductId(id), ..product };
        products.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        if !products.contains_key(&product.id.0) {
            return Err(RepositoryError::NotFound { entity: "product", id: product.id.0.to_string() });
        }
        if products.values().any(|existing| existing.id != product.id && existing.sku == product.sku) {
            return Err(RepositoryError::Conflict { entity: "product", id: product.sku.clone() });
        }
        products.insert(product.id.0, product.clone());
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let categories = self.categories.read().await;
        let mut listed: Vec<Category> = categories.values().cloned().collect();
        listed.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(listed)
    }

    async fn create_category(
        &self,
        name: &str,
        business_division: Option<&str>,
    ) -> Result<Category, RepositoryError> {
        let mut categories = self.categories.write().await;
        let code = next_category_code(categories.values().map(|category| category.code.as_str()));
        let id = self.category_ids.next();
        let category = Category {
            id: CategoryId(id),
            code,
            name: name.trim().to_string(),
            business_division: business_division.map(str::to_string),
        };
        categories.insert(id, category.clone());
        Ok(category)
    }
}

#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    invoices: RwLock<BTreeMap<i64, LocalInvoice>>,
    ids: IdSequence,
}

#[async_trait::async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn insert(&self, invoice: LocalInvoice) -> Result<LocalInvoice, RepositoryError> {
        let mut invoices = self.invoices.write().await;
        if invoices.values().any(|existing| {
            existing.estimate_id == invoice.estimate_id
                || existing.invoice_number == invoice.invoice_number
        }) {
            return Err(RepositoryError::Conflict {
                entity: "invoice",
                id: invoice.estimate_id.to_string(),
            });
        }

        let id = self.ids.next();
        let stored = LocalInvoice { id: InvoiceId(id), ..invoice };
        invoices.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<LocalInvoice>, RepositoryError> {
        let invoices = self.invoices.read().await;
        Ok(invoices.get(&id.0).cloned())
    }

    async fn find_by_estimate(
        &self,
        estimate_id: EstimateId,
    ) -> Result<Option<LocalInvoice>, RepositoryError> {
        let invoices = self.invoices.read().await;
        Ok(invoices.values().find(|invoice| invoice.estimate_id == estimate_id).cloned())
    }

    async fn list(&self) -> Result<Vec<LocalInvoice>, RepositoryError> {
        let invoices = self.invoices.read().await;
        let mut listed: Vec<LocalInvoice> = invoices.values().cloned().collect();
        listed.sort_by(|a, b| b.billing_date.cmp(&a.billing_date).then(b.id.0.cmp(&a.id.0)));
        Ok(listed)
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let invoices = self.invoices.read().await;
        Ok(with_prefix(invoices.values().map(|invoice| invoice.invoice_number.as_str()), prefix))
    }
}

#[derive(Default)]
pub struct InMemoryMaintenanceRepository {
    fees: RwLock<BTreeMap<i64, MaintenanceFee>>,
    ids: IdSequence,
}

#[async_trait::async_trait]
impl MaintenanceRepository for InMemoryMaintenanceRepository {
    async fn list(&self) -> Result<Vec<MaintenanceFee>, RepositoryError> {
        let fees = self.fees.read().await;
        let mut listed: Vec<MaintenanceFee> = fees.values().cloned().collect();
        listed.sort_by(|a, b| a.customer_name.cmp(&b.customer_name).then(a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn find_by_id(
        &self,
        id: MaintenanceFeeId,
    ) -> Result<Option<MaintenanceFee>, RepositoryError> {
        let fees = self.fees.read().await;
        Ok(fees.get(&id.0).cloned())
    }

    async fn insert(&self, fee: MaintenanceFee) -> Result<MaintenanceFee, RepositoryError> {
        let mut fees = self.fees.write().await;
        let id = self.ids.next();
        let stored = MaintenanceFee { id: MaintenanceFeeId(id), ..fee };
        fees.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, fee: &MaintenanceFee) -> Result<(), RepositoryError> {
        let mut fees = self.fees.write().await;
        match fees.get_mut(&fee.id.0) {
            Some(existing) => {
                *existing = fee.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound {
                entity: "maintenance_fee",
                id: fee.id.0.to_string(),
            }),
        }
    }

    async fn delete(&self, id: MaintenanceFeeId) -> Result<bool, RepositoryError> {
        let mut fees = self.fees.write().await;
        Ok(fees.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryBillingRepository {
    billings: RwLock<HashMap<String, Billing>>,
}

#[async_trait::async_trait]
impl BillingRepository for InMemoryBillingRepository {
    async fn upsert_synced(&self, billings: &[Billing]) -> Result<(), RepositoryError> {
        let mut stored = self.billings.write().await;
        for billing in billings {
            stored.insert(
                billing.mf_billing_id.clone(),
                Billing { deleted_at: None, ..billing.clone() },
            );
        }
        Ok(())
    }

    async fn mark_missing_deleted(
        &self,
        seen_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut stored = self.billings.write().await;
        let mut marked = 0;
        for billing in stored.values_mut() {
            if billing.deleted_at.is_none() && !seen_ids.contains(&billing.mf_billing_id) {
                billing.deleted_at = Some(at);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn list(&self, include_deleted: bool) -> Result<Vec<Billing>, RepositoryError> {
        let stored = self.billings.read().await;
        let mut listed: Vec<Billing> = stored
            .values()
            .filter(|billing| include_deleted || billing.deleted_at.is_none())
            .cloned()
            .collect();
        listed.sort_by(|a, b| {
            b.billing_date.cmp(&a.billing_date).then(a.mf_billing_id.cmp(&b.mf_billing_id))
        });
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryMoneyForwardTokenStore {
    states: RwLock<HashMap<String, DateTime<Utc>>>,
    connection: RwLock<Option<MoneyForwardConnection>>,
}

#[async_trait::async_trait]
impl MoneyForwardTokenStore for InMemoryMoneyForwardTokenStore {
    async fn store_state(
        &self,
        state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.states.write().await.insert(state.to_string(), created_at);
        Ok(())
    }

    async fn consume_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut states = self.states.write().await;
        let issued = states.remove(state);
        states.retain(|_, created_at| *created_at >= not_before);
        Ok(issued.map(|created_at| created_at >= not_before).unwrap_or(false))
    }

    async fn save_connection(
        &self,
        connection: &MoneyForwardConnection,
    ) -> Result<(), RepositoryError> {
        *self.connection.write().await = Some(connection.clone());
        Ok(())
    }

    async fn load_connection(&self) -> Result<Option<MoneyForwardConnection>, RepositoryError> {
        Ok(self.connection.read().await.clone())
    }

    async fn clear_connection(&self) -> Result<(), RepositoryError> {
        *self.connection.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use mitsumori_core::domain::estimate::{Estimate, EstimateStatus};

    use super::{InMemoryEstimateRepository, InMemoryMoneyForwardTokenStore, InMemoryProductRepository};
    use crate::repositories::{
        EstimateFilter, EstimateRepository, MoneyForwardTokenStore, ProductRepository,
        RepositoryError,
    };

    #[tokio::test]
    async fn in_memory_estimates_follow_the_same_cas_contract() {
        let repo = InMemoryEstimateRepository::default();
        let stored = repo.insert(Estimate::new_draft("顧客", "件名")).await.expect("insert");
        assert_eq!(stored.id.0, 1);

        let mut winner = stored.clone();
        winner.status = EstimateStatus::Pending;
        let saved = repo.update(&winner).await.expect("winner");
        assert_eq!(saved.lock_version, 1);

        let error = repo.update(&stored).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict { .. }));

        let pending = repo
            .list(&EstimateFilter { status: Some(EstimateStatus::Pending), ..EstimateFilter::default() })
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn deleted_ids_are_not_reused() {
        let repo = InMemoryEstimateRepository::default();
        repo.insert(Estimate::new_draft("顧客", "一件目")).await.expect("first");
        let second = repo.insert(Estimate::new_draft("顧客", "二件目")).await.expect("second");
        assert!(repo.delete(second.id).await.expect("delete"));

        let third = repo.insert(Estimate::new_draft("顧客", "三件目")).await.expect("third");
        assert_eq!(third.id.0, 3);
        assert!(repo.find_by_id(second.id).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn in_memory_numbers_are_unique() {
        let repo = InMemoryEstimateRepository::default();
        let mut estimate = Estimate::new_draft("顧客", "件名");
        estimate.estimate_number = Some("EST-A-B-250401-001".to_string());
        repo.insert(estimate.clone()).await.expect("first");

        let error = repo.insert(estimate).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict { entity: "estimate", .. }));
        assert_eq!(repo.numbers_with_prefix("EST-A-B").await.expect("numbers").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_category_codes_increment() {
        let repo = InMemoryProductRepository::default();
        assert_eq!(repo.create_category("A", None).await.expect("a").code, "001");
        assert_eq!(repo.create_category("B", None).await.expect("b").code, "002");
    }

    #[tokio::test]
    async fn in_memory_state_is_single_use() {
        let store = InMemoryMoneyForwardTokenStore::default();
        store.store_state("s", Utc::now()).await.expect("store");
        let cutoff = Utc::now() - Duration::minutes(10);
        assert!(store.consume_state("s", cutoff).await.expect("consume"));
        assert!(!store.consume_state("s", cutoff).await.expect("replay"));
    }
}
