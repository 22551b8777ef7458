use serde::{Deserialize, Serialize};

use crate::domain::estimate::{EstimateItem, TaxCategory};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub code: String,
    pub name: String,
    pub business_division: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit_price: i64,
    pub cost: i64,
    pub unit: String,
    pub tax_category: TaxCategory,
    pub category_id: Option<CategoryId>,
    pub business_division: Option<String>,
    pub is_active: bool,
}

impl Product {
    /// Fills cost, division and unit on a line item that left them unset.
    pub fn apply_defaults(&self, item: &mut EstimateItem) {
        if item.product_id.is_none() {
            item.product_id = Some(self.id.0);
        }
        if item.cost == 0 {
            item.cost = self.cost;
        }
        if item.business_division.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            item.business_division = self.business_division.clone();
        }
        if item.unit.trim().is_empty() {
            item.unit = self.unit.clone();
        }
    }
}

/// Next three-digit category code after the highest numeric code in use.
pub fn next_category_code<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let highest =
        existing.into_iter().filter_map(|code| code.trim().parse::<u32>().ok()).max().unwrap_or(0);
    format!("{:03}", highest + 1)
}
