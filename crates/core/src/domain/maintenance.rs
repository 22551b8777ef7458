use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaintenanceFeeId(pub i64);

/// A recurring monthly maintenance contract with one customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceFee {
    pub id: MaintenanceFeeId,
    pub customer_name: String,
    pub customer_id: Option<String>,
    pub support_type: String,
    pub monthly_fee: i64,
    pub started_on: NaiveDate,
    pub ended_on: Option<NaiveDate>,
    pub memo: Option<String>,
}

impl MaintenanceFee {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.started_on <= date && self.ended_on.map(|end| date <= end).unwrap_or(true)
    }

    /// Active for at least one day of the given month.
    pub fn is_active_in_month(&self, year: i32, month: u32) -> bool {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return false;
        };
        let last = last_day_of_month(first);
        self.started_on <= last && self.ended_on.map(|end| end >= first).unwrap_or(true)
    }
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let (year, month) =
        if first.month() == 12 { (first.year() + 1, 1) } else { (first.year(), first.month() + 1) };
    NaiveDate::from_ymd_opt(year, month, 1).and_then(|next| next.pred_opt()).unwrap_or(first)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SupportTypeTotal {
    pub contracts: usize,
    pub monthly_fee: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    pub month: String,
    pub active_contracts: usize,
    pub total_monthly_fee: i64,
    pub by_support_type: BTreeMap<String, SupportTypeTotal>,
}

pub fn summarize_month(fees: &[MaintenanceFee], year: i32, month: u32) -> MaintenanceSummary {
    let mut by_support_type: BTreeMap<String, SupportTypeTotal> = BTreeMap::new();
    let mut active_contracts = 0;
    let mut total_monthly_fee = 0;

    for fee in fees.iter().filter(|fee| fee.is_active_in_month(year, month)) {
        active_contracts += 1;
        total_monthly_fee += fee.monthly_fee;
        let entry = by_support_type.entry(fee.support_type.clone()).or_default();
        entry.contracts += 1;
        entry.monthly_fee += fee.monthly_fee;
    }

    MaintenanceSummary {
        month: format!("{year:04}-{month:02}"),
        active_contracts,
        total_monthly_fee,
        by_support_type,
    }
}

/// Parses `YYYY-MM`.
pub fn parse_month(raw: &str) -> Option<(i32, u32)> {
    let (year, month) = raw.trim().split_once('-')?;
    let year = year.parse::<i32>().ok()?;
    let month = month.parse::<u32>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_month, summarize_month, MaintenanceFee, MaintenanceFeeId};

    fn fee(id: i64, support: &str, fee: i64, start: (i32, u32, u32), end: Option<(i32, u32, u32)>) -> MaintenanceFee {
        MaintenanceFee {
            id: MaintenanceFeeId(id),
            customer_name: format!("顧客{id}"),
            customer_id: None,
            support_type: support.to_string(),
            monthly_fee: fee,
            started_on: NaiveDate::from_ymd_opt(start.0, start.1, start.2).expect("start"),
            ended_on: end.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            memo: None,
        }
    }

    #[test]
    fn active_window_is_inclusive() {
        let contract = fee(1, "server", 5000, (2025, 1, 15), Some((2025, 3, 31)));
        assert!(contract.is_active_on(NaiveDate::from_ymd_opt(2025, 1, 15).expect("d")));
        assert!(contract.is_active_on(NaiveDate::from_ymd_opt(2025, 3, 31).expect("d")));
        assert!(!contract.is_active_on(NaiveDate::from_ymd_opt(2025, 4, 1).expect("d")));
        assert!(contract.is_active_in_month(2025, 1));
        assert!(!contract.is_active_in_month(2024, 12));
    }

    #[test]
    fn summary_counts_contracts_touching_the_month() {
        let fees = vec![
            fee(1, "server", 5000, (2025, 1, 1), None),
            fee(2, "server", 3000, (2025, 2, 28), None),
            fee(3, "web", 10000, (2024, 6, 1), Some((2025, 1, 31))),
        ];

        let february = summarize_month(&fees, 2025, 2);
        assert_eq!(february.month, "2025-02");
        assert_eq!(february.active_contracts, 2);
        assert_eq!(february.total_monthly_fee, 8000);
        assert_eq!(february.by_support_type["server"].contracts, 2);
        assert!(!february.by_support_type.contains_key("web"));

        let december = summarize_month(&fees, 2024, 12);
        assert_eq!(december.total_monthly_fee, 10000);
    }

    #[test]
    fn parses_year_month() {
        assert_eq!(parse_month("2025-04"), Some((2025, 4)));
        assert_eq!(parse_month("2025-13"), None);
        assert_eq!(parse_month("april"), None);
    }
}
