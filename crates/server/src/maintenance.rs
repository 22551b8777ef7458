use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use mitsumori_core::domain::maintenance::{parse_month, summarize_month};
use mitsumori_core::{MaintenanceFee, MaintenanceFeeId, MaintenanceSummary};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::context::RequestContext;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct FeeListQuery {
    /// Only contracts running on this date.
    #[serde(default)]
    pub active_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// `YYYY-MM`; the current month when absent.
    #[serde(default)]
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeePayload {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub support_type: String,
    #[serde(default)]
    pub monthly_fee: i64,
    pub started_on: NaiveDate,
    #[serde(default)]
    pub ended_on: Option<NaiveDate>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl FeePayload {
    fn into_fee(self, id: MaintenanceFeeId) -> Result<MaintenanceFee, ApiError> {
        let customer_name = self.customer_name.trim().to_string();
        if customer_name.is_empty() {
            return Err(ApiError::invalid("customer_name", "customer_name is required"));
        }
        let support_type = self.support_type.trim().to_string();
        if support_type.is_empty() {
            return Err(ApiError::invalid("support_type", "support_type is required"));
        }
        if self.monthly_fee < 0 {
            return Err(ApiError::invalid("monthly_fee", "monthly_fee must not be negative"));
        }
        if self.ended_on.is_some_and(|ended_on| ended_on < self.started_on) {
            return Err(ApiError::invalid("ended_on", "ended_on must not precede started_on"));
        }

        Ok(MaintenanceFee {
            id,
            customer_name,
            customer_id: self.customer_id.filter(|value| !value.trim().is_empty()),
            support_type,
            monthly_fee: self.monthly_fee,
            started_on: self.started_on,
            ended_on: self.ended_on,
            memo: self.memo.filter(|value| !value.trim().is_empty()),
        })
    }
}

pub async fn list_fees(
    State(state): State<AppState>,
    Query(query): Query<FeeListQuery>,
) -> Result<Json<Vec<MaintenanceFee>>, ApiError> {
    let fees = state.maintenance.list().await?;
    let fees = match query.active_on {
        Some(date) => fees.into_iter().filter(|fee| fee.is_active_on(date)).collect(),
        None => fees,
    };
    Ok(Json(fees))
}

pub async fn create_fee(
    State(state): State<AppState>,
    context: RequestContext,
    Json(payload): Json<FeePayload>,
) -> Result<(StatusCode, Json<MaintenanceFee>), ApiError> {
    let fee = payload.into_fee(MaintenanceFeeId(0))?;
    let stored = state.maintenance.insert(fee).await?;
    info!(
        event_name = "maintenance.fee.created",
        correlation_id = %context.correlation_id,
        maintenance_fee_id = stored.id.0,
        "maintenance fee created"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_fee(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(payload): Json<FeePayload>,
) -> Result<Json<MaintenanceFee>, ApiError> {
    let fee = payload.into_fee(MaintenanceFeeId(id))?;
    state.maintenance.update(&fee).await?;
    info!(
        event_name = "maintenance.fee.updated",
        correlation_id = %context.correlation_id,
        maintenance_fee_id = id,
        "maintenance fee updated"
    );
    Ok(Json(fee))
}

pub async fn delete_fee(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.maintenance.delete(MaintenanceFeeId(id)).await? {
        return Err(ApiError::not_found(format!("maintenance fee `{id}` not found")));
    }
    info!(
        event_name = "maintenance.fee.deleted",
        correlation_id = %context.correlation_id,
        maintenance_fee_id = id,
        "maintenance fee deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn monthly_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<MaintenanceSummary>, ApiError> {
    let (year, month) = match query.month.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => parse_month(raw)
            .ok_or_else(|| ApiError::invalid("month", format!("`{raw}` is not a YYYY-MM month")))?,
        None => {
            let today = Utc::now().date_naive();
            (today.year(), today.month())
        }
    };

    let fees = state.maintenance.list().await?;
    Ok(Json(summarize_month(&fees, year, month)))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        Json,
    };
    use chrono::NaiveDate;

    use super::{
        create_fee, delete_fee, list_fees, monthly_summary, update_fee, FeeListQuery, FeePayload,
        SummaryQuery,
    };
    use crate::app::{test_support, AppState};
    use crate::context::RequestContext;

    fn context() -> RequestContext {
        RequestContext { identity: None, correlation_id: "req-maintenance".to_string() }
    }

    fn payload(customer: &str, support: &str, fee: i64, start: NaiveDate) -> FeePayload {
        FeePayload {
            customer_name: customer.to_string(),
            customer_id: None,
            support_type: support.to_string(),
            monthly_fee: fee,
            started_on: start,
            ended_on: None,
            memo: None,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    async fn seed(state: &AppState) -> i64 {
        let (_, Json(hosting)) = create_fee(
            State(state.clone()),
            context(),
            Json(payload("アクメ商事", "サーバー保守", 20_000, date(2024, 10, 1))),
        )
        .await
        .expect("hosting");
        let _ = create_fee(
            State(state.clone()),
            context(),
            Json(payload("ベータ工業", "サイト更新", 15_000, date(2025, 5, 1))),
        )
        .await
        .expect("updates");
        hosting.id.0
    }

    #[tokio::test]
    async fn summary_counts_contracts_active_in_month() {
        let state = test_support::state();
        let hosting = seed(&state).await;

        let Json(april) = monthly_summary(
            State(state.clone()),
            Query(SummaryQuery { month: Some("2025-04".to_string()) }),
        )
        .await
        .expect("april");
        assert_eq!(april.month, "2025-04");
        assert_eq!(april.active_contracts, 1);
        assert_eq!(april.total_monthly_fee, 20_000);

        let mut ended = payload("アクメ商事", "サーバー保守", 20_000, date(2024, 10, 1));
        ended.ended_on = Some(date(2025, 4, 30));
        let _ = update_fee(State(state.clone()), context(), Path(hosting), Json(ended))
            .await
            .expect("end contract");

        let Json(may) = monthly_summary(
            State(state),
            Query(SummaryQuery { month: Some("2025-05".to_string()) }),
        )
        .await
        .expect("may");
        assert_eq!(may.active_contracts, 1);
        assert_eq!(may.total_monthly_fee, 15_000);
        assert_eq!(may.by_support_type.get("サイト更新").map(|total| total.contracts), Some(1));
    }

    #[tokio::test]
    async fn invalid_month_and_dates_are_rejected() {
        let state = test_support::state();

        let bad_month = monthly_summary(
            State(state.clone()),
            Query(SummaryQuery { month: Some("2025-13".to_string()) }),
        )
        .await
        .expect_err("month 13");
        assert_eq!(bad_month.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(bad_month.fields(), ["month"]);

        let mut backwards = payload("アクメ商事", "サーバー保守", 20_000, date(2025, 4, 1));
        backwards.ended_on = Some(date(2025, 3, 31));
        let error = create_fee(State(state), context(), Json(backwards))
            .await
            .expect_err("ends before start");
        assert_eq!(error.fields(), ["ended_on"]);
    }

    #[tokio::test]
    async fn list_filters_by_date_and_delete_reports_missing_rows() {
        let state = test_support::state();
        let hosting = seed(&state).await;

        let Json(active) = list_fees(
            State(state.clone()),
            Query(FeeListQuery { active_on: Some(date(2025, 4, 15)) }),
        )
        .await
        .expect("list");
        assert_eq!(active.len(), 1);

        let status =
            delete_fee(State(state.clone()), context(), Path(hosting)).await.expect("delete");
        assert_eq!(status, StatusCode::NO_CONTENT);
        let missing = delete_fee(State(state), context(), Path(hosting)).await.expect_err("gone");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
