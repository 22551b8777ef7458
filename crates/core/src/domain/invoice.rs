use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::estimate::{Estimate, EstimateId, EstimateItem, EstimateStatus};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceId(pub i64);

impl InvoiceId {
    pub const UNSAVED: Self = Self(0);
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unissued,
    Issued,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unissued => "unissued",
            Self::Issued => "issued",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unissued" => Ok(Self::Unissued),
            "issued" => Ok(Self::Issued),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown invoice status `{other}`")))
            }
        }
    }
}

/// Billing document produced locally from an approved estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalInvoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub estimate_id: EstimateId,
    pub customer_name: String,
    pub customer_id: Option<String>,
    pub title: String,
    pub billing_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<EstimateItem>,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub notes: Option<String>,
    pub status: InvoiceStatus,
    pub mf_billing_id: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalInvoice {
    /// Copies an approved estimate; the estimate itself is left untouched.
    pub fn from_estimate(
        estimate: &Estimate,
        invoice_number: impl Into<String>,
        billing_date: NaiveDate,
        due_date: Option<NaiveDate>,
    ) -> Result<Self, DomainError> {
        if estimate.status != EstimateStatus::Sent {
            return Err(DomainError::NotInvoiceable { status: estimate.status });
        }

        let totals = estimate.totals();
        let now = Utc::now();
        Ok(Self {
            id: InvoiceId::UNSAVED,
            invoice_number: invoice_number.into(),
            estimate_id: estimate.id,
            customer_name: estimate.customer_name.clone(),
            customer_id: estimate.customer_id.clone(),
            title: estimate.title.clone(),
            billing_date,
            due_date: due_date.or(estimate.due_date),
            items: estimate.items.clone(),
            total_amount: totals.total,
            tax_amount: totals.tax,
            notes: estimate.notes.clone(),
            status: InvoiceStatus::Unissued,
            mf_billing_id: None,
            pdf_url: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Billing mirrored from Money Forward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Billing {
    pub mf_billing_id: String,
    pub billing_number: Option<String>,
    pub partner_name: Option<String>,
    pub title: Option<String>,
    pub billing_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub payment_status: Option<String>,
    pub pdf_url: Option<String>,
    pub synced_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
