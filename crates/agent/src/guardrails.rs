use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::Value;

use mitsumori_core::domain::estimate::{DisplayMode, EstimateItem, TaxCategory};
use mitsumori_core::domain::product::Product;

/// Draft line exactly as the model produced it; every field is untrusted.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProposedItem {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Value,
    #[serde(default)]
    pub unit_price: Value,
    #[serde(default)]
    pub cost: Value,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub tax_category: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Adjust { reason_code: &'static str, user_message: String },
    Drop { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_items: usize,
    /// Catalog prices replace whatever the model proposed for a known sku.
    pub catalog_prices_win: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_items: 50, catalog_prices_win: true }
    }
}

/// Lines that survived the guardrails plus a note for every intervention.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuardedItems {
    pub items: Vec<EstimateItem>,
    pub decisions: Vec<GuardrailDecision>,
}

impl GuardedItems {
    pub fn notes(&self) -> Vec<String> {
        self.decisions
            .iter()
            .filter_map(|decision| match decision {
                GuardrailDecision::Allow => None,
                GuardrailDecision::Adjust { user_message, .. }
                | GuardrailDecision::Drop { user_message, .. } => Some(user_message.clone()),
            })
            .collect()
    }
}

const KNOWN_TAX_CATEGORIES: &[&str] =
    &["standard", "reduced", "exempt", "none", "10", "10%", "8", "8%", "0", "0%"];

impl GuardrailPolicy {
    pub fn apply(&self, proposed: Vec<ProposedItem>, catalog: &[Product]) -> GuardedItems {
        let mut guarded = GuardedItems::default();
        let total = proposed.len();

        for (index, raw) in proposed.into_iter().enumerate() {
            if guarded.items.len() >= self.max_items {
                guarded.decisions.push(GuardrailDecision::Drop {
                    reason_code: "item_limit_exceeded",
                    user_message: format!(
                        "明細は最大{}行までです。残り{}行は取り込みませんでした。",
                        self.max_items,
                        total - index
                    ),
                });
                break;
            }
            self.evaluate(index, raw, catalog, &mut guarded);
        }

        guarded
    }

    fn evaluate(
        &self,
        index: usize,
        raw: ProposedItem,
        catalog: &[Product],
        guarded: &mut GuardedItems,
    ) {
        let line = index + 1;
        let sku = raw.sku.as_deref().map(str::trim).filter(|sku| !sku.is_empty());
        let product =
            sku.and_then(|sku| catalog.iter().find(|product| product.is_active && product.sku == sku));

        let name = raw
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| product.map(|product| product.name.clone()));
        let Some(name) = name else {
            guarded.decisions.push(GuardrailDecision::Drop {
                reason_code: "empty_item_name",
                user_message: format!("{line}行目: 品名が空のため除外しました。"),
            });
            return;
        };

        let quantity = decimal_value(&raw.quantity).filter(|quantity| *quantity > Decimal::ZERO);
        let Some(quantity) = quantity else {
            guarded.decisions.push(GuardrailDecision::Drop {
                reason_code: "non_positive_quantity",
                user_message: format!("{line}行目({name}): 数量が正の数ではないため除外しました。"),
            });
            return;
        };

        let mut decision = GuardrailDecision::Allow;
        let mut unit_price = yen_value(&raw.unit_price).unwrap_or(0);
        let mut cost = yen_value(&raw.cost).unwrap_or(0);
        if unit_price < 0 || cost < 0 {
            unit_price = unit_price.max(0);
            cost = cost.max(0);
            decision = GuardrailDecision::Adjust {
                reason_code: "negative_price_clamped",
                user_message: format!("{line}行目({name}): 負の金額を0円に補正しました。"),
            };
        }

        let tax_category = match raw.tax_category.as_deref().map(str::trim) {
            None | Some("") => TaxCategory::Standard,
            Some(value) if KNOWN_TAX_CATEGORIES.contains(&value.to_ascii_lowercase().as_str()) => {
                TaxCategory::parse_lenient(value)
            }
            Some(value) => {
                decision = GuardrailDecision::Adjust {
                    reason_code: "unknown_tax_category",
                    user_message: format!(
                        "{line}行目({name}): 税区分「{value}」は不明なため標準税率にしました。"
                    ),
                };
                TaxCategory::Standard
            }
        };

        let mut item = EstimateItem {
            product_id: None,
            sku: sku.map(str::to_string),
            name,
            quantity,
            unit_price,
            cost,
            unit: raw.unit.map(|unit| unit.trim().to_string()).unwrap_or_default(),
            tax_category,
            display_mode: DisplayMode::Itemized,
            business_division: None,
        };

        if let Some(product) = product {
            if self.catalog_prices_win {
                item.unit_price = product.unit_price;
                item.cost = product.cost;
                item.tax_category = product.tax_category;
            }
            product.apply_defaults(&mut item);
        }

        guarded.items.push(item);
        guarded.decisions.push(decision);
    }
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .ok()
            .or_else(|| number.as_f64().and_then(Decimal::from_f64_retain)),
        Value::String(raw) => Decimal::from_str(raw.trim().replace(',', "").as_str()).ok(),
        _ => None,
    }
}

fn yen_value(value: &Value) -> Option<i64> {
    decimal_value(value).and_then(|amount| {
        amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64()
    })
}
