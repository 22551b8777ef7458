use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use mitsumori_core::domain::estimate::{EstimateTotals, MarginSummary};
use mitsumori_core::{
    next_document_number, project_status, ApprovalError, ApprovalOutcome, ApprovalStepDraft,
    CancelMode, DocumentNumberPrefix, DomainError, Estimate, EstimateId, EstimateItem,
    EstimateStatus, Identity, LocalInvoice, StatusProjection, SubmitMode,
};
use mitsumori_db::repositories::{EstimateFilter, RepositoryError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::{AppState, Workflow};
use crate::context::RequestContext;
use crate::error::ApiError;

const NUMBERING_ATTEMPTS: usize = 3;
const DEFAULT_LIST_LIMIT: u32 = 200;

/// An estimate together with what the caller may do with it.
#[derive(Debug, Serialize)]
pub struct EstimateView {
    pub estimate: Estimate,
    pub projection: StatusProjection,
    pub totals: EstimateTotals,
    pub margin: MarginSummary,
}

impl EstimateView {
    pub fn new(estimate: Estimate, caller: Option<&Identity>) -> Self {
        let projection = project_status(&estimate, caller);
        let totals = estimate.totals();
        let margin = estimate.margin();
        Self { estimate, projection, totals, margin }
    }
}

#[derive(Debug, Serialize)]
pub struct EstimateSummary {
    pub id: EstimateId,
    pub estimate_number: Option<String>,
    pub customer_name: String,
    pub title: String,
    pub issue_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub status: EstimateStatus,
    pub waiting_on_name: Option<String>,
    pub is_order_confirmed: bool,
    pub money_forward_quote_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EstimateSummary {
    fn from_estimate(estimate: Estimate) -> Self {
        let projection = project_status(&estimate, None);
        Self {
            id: estimate.id,
            estimate_number: estimate.estimate_number,
            customer_name: estimate.customer_name,
            title: estimate.title,
            issue_date: estimate.issue_date,
            total_amount: estimate.total_amount,
            status: projection.status,
            waiting_on_name: projection.waiting_on_name,
            is_order_confirmed: estimate.is_order_confirmed,
            money_forward_quote_id: estimate.money_forward.quote_id,
            updated_at: estimate.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub outcome: ApprovalOutcome,
    pub estimate: EstimateView,
}

#[derive(Debug, Default, Deserialize)]
pub struct EstimateListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Editable estimate fields. Numbers, status and the approval flow are never taken
/// from the client.
#[derive(Debug, Default, Deserialize)]
pub struct EstimatePayload {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Short client code used in the estimate number; falls back to `customer_id`.
    #[serde(default)]
    pub customer_code: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub internal_memo: Option<String>,
    #[serde(default)]
    pub items: Vec<EstimateItem>,
    #[serde(default)]
    pub staff_id: Option<i64>,
    #[serde(default)]
    pub staff_name: Option<String>,
    /// Short staff code used in the estimate number; falls back to `staff_id`.
    #[serde(default)]
    pub staff_code: Option<String>,
    /// Version the client last read. Stale versions are refused.
    #[serde(default)]
    pub lock_version: Option<i64>,
}

impl EstimatePayload {
    fn validate(&self) -> Result<(), ApiError> {
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity < Decimal::ZERO {
                return Err(ApiError::invalid(
                    format!("items[{index}].quantity"),
                    "quantity must not be negative",
                ));
            }
            if item.cost < 0 {
                return Err(ApiError::invalid(format!("items[{index}].cost"), "cost must not be negative"));
            }
        }
        if let (Some(issue_date), Some(due_date)) = (self.issue_date, self.due_date) {
            if due_date < issue_date {
                return Err(ApiError::invalid("due_date", "due_date must not precede issue_date"));
            }
        }
        Ok(())
    }

    fn apply_to(self, estimate: &mut Estimate) {
        estimate.customer_name = self.customer_name.trim().to_string();
        estimate.customer_id = non_blank(self.customer_id);
        estimate.title = self.title.trim().to_string();
        estimate.issue_date = self.issue_date;
        estimate.due_date = self.due_date;
        estimate.delivery_date = self.delivery_date;
        estimate.notes = non_blank(self.notes);
        estimate.internal_memo = non_blank(self.internal_memo);
        estimate.items = self.items;
        estimate.staff_id = self.staff_id;
        estimate.staff_name = non_blank(self.staff_name);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub approvers: Vec<ApprovalStepDraft>,
    /// Re-run the stored flow instead of choosing new approvers.
    #[serde(default)]
    pub resubmit: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Discard the approver list instead of only clearing decisions.
    #[serde(default)]
    pub drop_flow: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RequirementsCheckRequest {
    pub step_index: usize,
    pub checked: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmOrderRequest {
    pub confirmed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceRequest {
    #[serde(default)]
    pub billing_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrintQuery {
    #[serde(default)]
    pub format: Option<String>,
}

pub(crate) async fn load_estimate(state: &AppState, id: EstimateId) -> Result<Estimate, ApiError> {
    state
        .estimates
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("estimate `{id}` not found")))
}

/// Fills cost, unit and division from the catalog for lines that name a SKU.
async fn apply_catalog_defaults(state: &AppState, items: &mut [EstimateItem]) -> Result<(), ApiError> {
    for item in items.iter_mut() {
        let Some(sku) = item.sku.as_deref().map(str::trim).filter(|sku| !sku.is_empty()) else {
            continue;
        };
        let sku = sku.to_string();
        if let Some(product) = state.products.find_by_sku(&sku).await? {
            product.apply_defaults(item);
        }
    }
    Ok(())
}

/// Assigns the next free number under the staff/client/date prefix and stores the estimate.
/// A concurrent writer taking the same number triggers a fresh lookup.
pub(crate) async fn insert_numbered(
    state: &AppState,
    mut estimate: Estimate,
    staff_code: Option<&str>,
    client_code: Option<&str>,
) -> Result<Estimate, ApiError> {
    let date = estimate.issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let staff = staff_code
        .map(str::to_string)
        .or_else(|| estimate.staff_id.map(|id| id.to_string()))
        .unwrap_or_default();
    let client = client_code
        .map(str::to_string)
        .or_else(|| estimate.customer_id.clone())
        .unwrap_or_default();
    let prefix = DocumentNumberPrefix::new(&state.numbering.estimate_kind, &staff, &client, date);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let existing = state.estimates.numbers_with_prefix(prefix.as_str()).await?;
        estimate.estimate_number =
            Some(next_document_number(&prefix, existing.iter().map(String::as_str)));

        match state.estimates.insert(estimate.clone()).await {
            Ok(stored) => return Ok(stored),
            Err(RepositoryError::Conflict { .. }) if attempt < NUMBERING_ATTEMPTS => continue,
            Err(error) => return Err(error.into()),
        }
    }
}

pub async fn list_estimates(
    State(state): State<AppState>,
    Query(query): Query<EstimateListQuery>,
) -> Result<Json<Vec<EstimateSummary>>, ApiError> {
    let status = match query.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(raw.parse::<EstimateStatus>().map_err(|_| {
            ApiError::invalid("status", format!("unknown estimate status `{raw}`"))
        })?),
        None => None,
    };
    let filter = EstimateFilter {
        status,
        keyword: query.q,
        include_mf_deleted: query.include_deleted,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };

    let estimates = state.estimates.list(&filter).await?;
    Ok(Json(estimates.into_iter().map(EstimateSummary::from_estimate).collect()))
}

pub async fn create_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Json(payload): Json<EstimatePayload>,
) -> Result<(StatusCode, Json<EstimateView>), ApiError> {
    payload.validate()?;
    let staff_code = non_blank(payload.staff_code.clone());
    let client_code = non_blank(payload.customer_code.clone());

    let mut estimate = Estimate::new_draft("", "");
    payload.apply_to(&mut estimate);
    apply_catalog_defaults(&state, &mut estimate.items).await?;
    estimate.recalculate_totals();

    let stored =
        insert_numbered(&state, estimate, staff_code.as_deref(), client_code.as_deref()).await?;
    info!(
        event_name = "estimate.created",
        correlation_id = %context.correlation_id,
        estimate_id = stored.id.0,
        estimate_number = stored.estimate_number.as_deref().unwrap_or_default(),
        actor = %context.actor(),
        "estimate created"
    );
    Ok((StatusCode::CREATED, Json(EstimateView::new(stored, context.identity.as_ref()))))
}

pub async fn get_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<Json<EstimateView>, ApiError> {
    let estimate = load_estimate(&state, EstimateId(id)).await?;
    Ok(Json(EstimateView::new(estimate, context.identity.as_ref())))
}

pub async fn update_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(payload): Json<EstimatePayload>,
) -> Result<Json<EstimateView>, ApiError> {
    payload.validate()?;
    let mut estimate = load_estimate(&state, EstimateId(id)).await?;
    if !estimate.status.is_editable() {
        return Err(ApiError::from(DomainError::NotEditable { status: estimate.status })
            .with_correlation_id(&context.correlation_id));
    }
    if let Some(expected) = payload.lock_version {
        if expected != estimate.lock_version {
            return Err(ApiError::conflict(format!(
                "estimate `{id}` was changed by someone else (version {expected} is stale)"
            ))
            .with_correlation_id(&context.correlation_id));
        }
    }

    payload.apply_to(&mut estimate);
    apply_catalog_defaults(&state, &mut estimate.items).await?;
    estimate.recalculate_totals();

    let saved = state
        .estimates
        .update(&estimate)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;
    info!(
        event_name = "estimate.updated",
        correlation_id = %context.correlation_id,
        estimate_id = id,
        lock_version = saved.lock_version,
        actor = %context.actor(),
        "estimate updated"
    );
    Ok(Json(EstimateView::new(saved, context.identity.as_ref())))
}

pub async fn delete_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let estimate = load_estimate(&state, EstimateId(id)).await?;
    if !estimate.status.is_editable() {
        return Err(ApiError::from(DomainError::NotEditable { status: estimate.status })
            .with_correlation_id(&context.correlation_id));
    }

    if !state.estimates.delete(estimate.id).await? {
        return Err(ApiError::not_found(format!("estimate `{id}` not found")));
    }
    info!(
        event_name = "estimate.deleted",
        correlation_id = %context.correlation_id,
        estimate_id = id,
        actor = %context.actor(),
        "estimate deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<EstimateView>), ApiError> {
    let source = load_estimate(&state, EstimateId(id)).await?;
    let stored = insert_numbered(&state, source.duplicate(), None, None).await?;
    info!(
        event_name = "estimate.duplicated",
        correlation_id = %context.correlation_id,
        estimate_id = stored.id.0,
        source_estimate_id = id,
        "estimate duplicated"
    );
    Ok((StatusCode::CREATED, Json(EstimateView::new(stored, context.identity.as_ref()))))
}

/// Loads the estimate, applies one workflow transition and stores the result.
/// Nothing is written when the transition is refused, and an accepted transition
/// is audited as a success only once the store accepts it.
async fn transition<F>(
    state: &AppState,
    context: &RequestContext,
    id: i64,
    apply: F,
) -> Result<Json<ApprovalResponse>, ApiError>
where
    F: FnOnce(&Workflow, &mut Estimate) -> Result<ApprovalOutcome, ApprovalError>,
{
    let mut estimate = load_estimate(state, EstimateId(id)).await?;
    let outcome = apply(&state.workflow, &mut estimate)
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;
    let saved = match state.estimates.update(&estimate).await {
        Ok(saved) => {
            state.workflow.record_persisted(&outcome);
            saved
        }
        Err(error) => {
            state.workflow.record_not_persisted(&outcome, &error.to_string());
            return Err(ApiError::from(error).with_correlation_id(&context.correlation_id));
        }
    };

    Ok(Json(ApprovalResponse {
        outcome,
        estimate: EstimateView::new(saved, context.identity.as_ref()),
    }))
}

pub async fn submit_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let actor = context.caller()?.to_string();
    let mode = if request.resubmit {
        SubmitMode::Resubmit
    } else {
        SubmitMode::Fresh(request.approvers)
    };
    transition(&state, &context, id, |workflow, estimate| {
        workflow.submit_for_approval(estimate, mode, &actor, &context.correlation_id)
    })
    .await
}

pub async fn cancel_submission(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let actor = context.caller()?.to_string();
    let mode = if request.drop_flow { CancelMode::DropFlow } else { CancelMode::ClearDecisions };
    transition(&state, &context, id, |workflow, estimate| {
        workflow.cancel_submission(estimate, mode, &actor, &context.correlation_id)
    })
    .await
}

pub async fn approve_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let caller = context.caller()?.clone();
    transition(&state, &context, id, |workflow, estimate| {
        workflow.approve(estimate, &caller, &context.correlation_id)
    })
    .await
}

pub async fn reject_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let caller = context.caller()?.clone();
    transition(&state, &context, id, |workflow, estimate| {
        workflow.reject(estimate, &caller, &request.reason, &context.correlation_id)
    })
    .await
}

pub async fn check_requirements(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<RequirementsCheckRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let caller = context.caller()?.clone();
    transition(&state, &context, id, |workflow, estimate| {
        workflow.mark_requirement_reviewed(
            estimate,
            &caller,
            request.step_index,
            request.checked,
            &context.correlation_id,
        )
    })
    .await
}

pub async fn confirm_order(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<ConfirmOrderRequest>,
) -> Result<Json<EstimateView>, ApiError> {
    let mut estimate = load_estimate(&state, EstimateId(id)).await?;
    if estimate.status != EstimateStatus::Sent {
        let refused =
            ApprovalError::InvalidState { status: estimate.status, operation: "confirm the order of" };
        return Err(ApiError::from(refused).with_correlation_id(&context.correlation_id));
    }

    estimate.is_order_confirmed = request.confirmed;
    let saved = state
        .estimates
        .update(&estimate)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;
    info!(
        event_name = "estimate.order.confirmed",
        correlation_id = %context.correlation_id,
        estimate_id = id,
        confirmed = request.confirmed,
        actor = %context.actor(),
        "order confirmation updated"
    );
    Ok(Json(EstimateView::new(saved, context.identity.as_ref())))
}

pub async fn convert_to_invoice(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(request): Json<InvoiceRequest>,
) -> Result<(StatusCode, Json<LocalInvoice>), ApiError> {
    let estimate = load_estimate(&state, EstimateId(id)).await?;
    if let Some(existing) = state.invoices.find_by_estimate(estimate.id).await? {
        return Err(ApiError::conflict(format!(
            "estimate `{id}` was already converted to invoice {}",
            existing.invoice_number
        ))
        .with_correlation_id(&context.correlation_id));
    }

    let billing_date = request.billing_date.unwrap_or_else(|| Utc::now().date_naive());
    let prefix = DocumentNumberPrefix::new(
        &state.numbering.invoice_kind,
        &estimate.staff_id.map(|id| id.to_string()).unwrap_or_default(),
        estimate.customer_id.as_deref().unwrap_or_default(),
        billing_date,
    );
    let existing = state.invoices.numbers_with_prefix(prefix.as_str()).await?;
    let number = next_document_number(&prefix, existing.iter().map(String::as_str));

    let invoice = LocalInvoice::from_estimate(&estimate, number, billing_date, request.due_date)
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;
    let stored = state
        .invoices
        .insert(invoice)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;

    info!(
        event_name = "estimate.invoice.created",
        correlation_id = %context.correlation_id,
        estimate_id = id,
        invoice_number = %stored.invoice_number,
        actor = %context.actor(),
        "estimate converted to invoice"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

/// PDF unless `?format=html` is given or no converter is installed.
pub async fn print_estimate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PrintQuery>,
) -> Result<Response, ApiError> {
    let estimate = load_estimate(&state, EstimateId(id)).await?;
    let want_pdf = !query.format.as_deref().is_some_and(|format| format.eq_ignore_ascii_case("html"));
    let filename = format!("{}.pdf", estimate.estimate_number.as_deref().unwrap_or("estimate"));

    let rendered = state.printer.render(&estimate, want_pdf).await?;
    Ok(rendered.into_response(&filename))
}
