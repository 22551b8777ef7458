use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalFlow;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EstimateId(pub i64);

impl EstimateId {
    /// Placeholder for estimates not yet written; repositories assign the real id.
    pub const UNSAVED: Self = Self(0);
}

impl fmt::Display for EstimateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Draft,
    Pending,
    Sent,
    Rejected,
}

impl EstimateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Rejected => "rejected",
        }
    }

    /// Estimates may be edited only before submission or after a rejection.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }
}

impl fmt::Display for EstimateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EstimateStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "rejected" => Ok(Self::Rejected),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown estimate status `{other}`")))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCategory {
    #[default]
    Standard,
    Reduced,
    Exempt,
}

impl TaxCategory {
    pub fn rate(&self) -> Decimal {
        match self {
            Self::Standard => Decimal::new(10, 2),
            Self::Reduced => Decimal::new(8, 2),
            Self::Exempt => Decimal::ZERO,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Reduced => "reduced",
            Self::Exempt => "exempt",
        }
    }

    /// Lenient parse used for imported and generated data; unknown values fall back to standard.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "reduced" | "8" | "8%" => Self::Reduced,
            "exempt" | "none" | "0" | "0%" => Self::Exempt,
            _ => Self::Standard,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Itemized,
    /// Printed as a single amount without quantity or unit price.
    LumpSum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimateItem {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: i64,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub tax_category: TaxCategory,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub business_division: Option<String>,
}

impl EstimateItem {
    pub fn amount(&self) -> i64 {
        round_yen(self.quantity * Decimal::from(self.unit_price))
    }

    pub fn cost_amount(&self) -> i64 {
        round_yen(self.quantity * Decimal::from(self.cost))
    }
}

fn round_yen(value: Decimal) -> i64 {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64().unwrap_or(0)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EstimateTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub by_tax_category: BTreeMap<TaxCategory, TaxBreakdown>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaxBreakdown {
    pub subtotal: i64,
    pub tax: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DivisionMargin {
    pub revenue: i64,
    pub cost: i64,
    pub gross_profit: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MarginSummary {
    pub revenue: i64,
    pub cost: i64,
    pub gross_profit: i64,
    pub by_division: BTreeMap<String, DivisionMargin>,
}

pub const UNASSIGNED_DIVISION: &str = "unassigned";

/// Links to the corresponding Money Forward documents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyForwardLinks {
    pub quote_id: Option<String>,
    pub invoice_id: Option<String>,
    pub quote_pdf_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
    /// Set when the upstream document disappeared.
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: EstimateId,
    pub estimate_number: Option<String>,
    pub customer_name: String,
    pub customer_id: Option<String>,
    pub title: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub notes: Option<String>,
    pub internal_memo: Option<String>,
    pub items: Vec<EstimateItem>,
    pub approval_flow: Option<ApprovalFlow>,
    pub status: EstimateStatus,
    pub is_order_confirmed: bool,
    pub staff_id: Option<i64>,
    pub staff_name: Option<String>,
    pub money_forward: MoneyForwardLinks,
    pub lock_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Estimate {
    pub fn new_draft(customer_name: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EstimateId::UNSAVED,
            estimate_number: None,
            customer_name: customer_name.into(),
            customer_id: None,
            title: title.into(),
            issue_date: None,
            due_date: None,
            delivery_date: None,
            total_amount: 0,
            tax_amount: 0,
            notes: None,
            internal_memo: None,
            items: Vec::new(),
            approval_flow: None,
            status: EstimateStatus::Draft,
            is_order_confirmed: false,
            staff_id: None,
            staff_name: None,
            money_forward: MoneyForwardLinks::default(),
            lock_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field paths that must be filled in before the estimate can be submitted.
    pub fn missing_required_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.customer_name.trim().is_empty() {
            missing.push("customer_name".to_string());
        }
        if self.title.trim().is_empty() {
            missing.push("title".to_string());
        }
        if self.issue_date.is_none() {
            missing.push("issue_date".to_string());
        }
        if self.items.is_empty() {
            missing.push("items".to_string());
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                missing.push(format!("items[{index}].name"));
            }
            if item.quantity <= Decimal::ZERO {
                missing.push(format!("items[{index}].quantity"));
            }
        }
        missing
    }

    /// Line amounts are rounded half away from zero; tax is floored per tax category.
    pub fn totals(&self) -> EstimateTotals {
        let mut by_tax_category: BTreeMap<TaxCategory, TaxBreakdown> = BTreeMap::new();
        for item in &self.items {
            by_tax_category.entry(item.tax_category).or_default().subtotal += item.amount();
        }

        for (category, breakdown) in by_tax_category.iter_mut() {
            breakdown.tax =
                (Decimal::from(breakdown.subtotal) * category.rate()).floor().to_i64().unwrap_or(0);
        }

        let subtotal = by_tax_category.values().map(|breakdown| breakdown.subtotal).sum();
        let tax = by_tax_category.values().map(|breakdown| breakdown.tax).sum();

        EstimateTotals { subtotal, tax, total: subtotal + tax, by_tax_category }
    }

    pub fn recalculate_totals(&mut self) {
        let totals = self.totals();
        self.total_amount = totals.total;
        self.tax_amount = totals.tax;
    }

    pub fn margin(&self) -> MarginSummary {
        let mut summary = MarginSummary::default();
        for item in &self.items {
            let revenue = item.amount();
            let cost = item.cost_amount();
            let division = item
                .business_division
                .clone()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| UNASSIGNED_DIVISION.to_string());

            let entry = summary.by_division.entry(division).or_default();
            entry.revenue += revenue;
            entry.cost += cost;
            entry.gross_profit += revenue - cost;

            summary.revenue += revenue;
            summary.cost += cost;
        }
        summary.gross_profit = summary.revenue - summary.cost;
        summary
    }

    /// A fresh draft carrying over customer, title, dates and items only.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new_draft(self.customer_name.clone(), format!("{} (コピー)", self.title));
        copy.customer_id = self.customer_id.clone();
        copy.issue_date = self.issue_date;
        copy.due_date = self.due_date;
        copy.delivery_date = self.delivery_date;
        copy.notes = self.notes.clone();
        copy.internal_memo = self.internal_memo.clone();
        copy.items = self.items.clone();
        copy.staff_id = self.staff_id;
        copy.staff_name = self.staff_name.clone();
        copy.recalculate_totals();
        copy
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{DisplayMode, Estimate, EstimateItem, EstimateStatus, TaxCategory};
    use crate::domain::approval::{ApprovalFlow, ApprovalStepDraft};
    use crate::domain::identity::ApproverRef;

    fn item(name: &str, quantity: Decimal, unit_price: i64, tax: TaxCategory) -> EstimateItem {
        EstimateItem {
            product_id: None,
            sku: None,
            name: name.to_string(),
            quantity,
            unit_price,
            cost: unit_price / 2,
            unit: "式".to_string(),
            tax_category: tax,
            display_mode: DisplayMode::Itemized,
            business_division: Some("web".to_string()),
        }
    }

    #[test]
    fn totals_round_lines_and_floor_tax_per_category() {
        let mut estimate = Estimate::new_draft("株式会社テスト", "サイト制作");
        estimate.items = vec![
            item("設計", Decimal::new(15, 1), 333, TaxCategory::Standard),
            item("保守", Decimal::ONE, 1005, TaxCategory::Standard),
            item("軽食", Decimal::from(3), 199, TaxCategory::Reduced),
        ];

        let totals = estimate.totals();
        // 1.5 * 333 = 499.5 -> 500
        assert_eq!(totals.by_tax_category[&TaxCategory::Standard].subtotal, 1505);
        assert_eq!(totals.by_tax_category[&TaxCategory::Standard].tax, 150);
        assert_eq!(totals.by_tax_category[&TaxCategory::Reduced].subtotal, 597);
        assert_eq!(totals.by_tax_category[&TaxCategory::Reduced].tax, 47);
        assert_eq!(totals.subtotal, 2102);
        assert_eq!(totals.total, 2102 + 197);

        estimate.recalculate_totals();
        assert_eq!(estimate.total_amount, 2299);
        assert_eq!(estimate.tax_amount, 197);
    }

    #[test]
    fn missing_fields_are_reported_with_item_paths() {
        let mut estimate = Estimate::new_draft(" ", "");
        estimate.items = vec![item("", Decimal::ZERO, 100, TaxCategory::Standard)];

        let missing = estimate.missing_required_fields();
        assert_eq!(
            missing,
            vec!["customer_name", "title", "issue_date", "items[0].name", "items[0].quantity"]
        );
    }

    #[test]
    fn complete_estimate_has_no_missing_fields() {
        let mut estimate = Estimate::new_draft("顧客", "件名");
        estimate.issue_date = NaiveDate::from_ymd_opt(2025, 4, 1);
        estimate.items = vec![item("作業", Decimal::ONE, 1000, TaxCategory::Standard)];
        assert!(estimate.missing_required_fields().is_empty());
    }

    #[test]
    fn margin_groups_by_division() {
        let mut estimate = Estimate::new_draft("顧客", "件名");
        let mut other = item("機材", Decimal::from(2), 1000, TaxCategory::Standard);
        other.business_division = None;
        estimate.items = vec![item("作業", Decimal::ONE, 1000, TaxCategory::Standard), other];

        let margin = estimate.margin();
        assert_eq!(margin.revenue, 3000);
        assert_eq!(margin.cost, 1500);
        assert_eq!(margin.gross_profit, 1500);
        assert_eq!(margin.by_division["web"].gross_profit, 500);
        assert_eq!(margin.by_division["unassigned"].revenue, 2000);
    }

    #[test]
    fn duplicate_starts_a_clean_draft() {
        let mut estimate = Estimate::new_draft("顧客", "件名");
        estimate.estimate_number = Some("EST-01-AB-250401-001".to_string());
        estimate.status = EstimateStatus::Sent;
        estimate.is_order_confirmed = true;
        estimate.money_forward.quote_id = Some("mf-1".to_string());
        estimate.approval_flow = Some(ApprovalFlow::from_drafts(vec![ApprovalStepDraft {
            id: ApproverRef::Local(1),
            name: "A".to_string(),
        }]));
        estimate.items = vec![item("作業", Decimal::ONE, 1000, TaxCategory::Standard)];

        let copy = estimate.duplicate();
        assert_eq!(copy.status, EstimateStatus::Draft);
        assert!(copy.estimate_number.is_none());
        assert!(copy.approval_flow.is_none());
        assert!(copy.money_forward.quote_id.is_none());
        assert!(!copy.is_order_confirmed);
        assert_eq!(copy.items.len(), 1);
        assert_eq!(copy.total_amount, 1100);
        assert!(copy.title.ends_with("(コピー)"));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Pending".parse::<EstimateStatus>().ok(), Some(EstimateStatus::Pending));
        assert!("archived".parse::<EstimateStatus>().is_err());
        assert!(EstimateStatus::Rejected.is_editable());
        assert!(!EstimateStatus::Sent.is_editable());
    }
}
