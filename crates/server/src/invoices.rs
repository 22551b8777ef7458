use axum::{
    extract::{Path, State},
    Json,
};
use mitsumori_core::{InvoiceId, LocalInvoice};

use crate::app::AppState;
use crate::error::ApiError;

pub async fn list_invoices(
    State(state): State<AppState>,
) -> Result<Json<Vec<LocalInvoice>>, ApiError> {
    Ok(Json(state.invoices.list().await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<LocalInvoice>, ApiError> {
    state
        .invoices
        .find_by_id(InvoiceId(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("invoice `{id}` not found")))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, State},
        http::StatusCode,
    };

    use super::{get_invoice, list_invoices};
    use crate::app::test_support;

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let state = test_support::state();
        let axum::Json(listed) = list_invoices(State(state.clone())).await.expect("list");
        assert!(listed.is_empty());

        let error = get_invoice(State(state), Path(9)).await.expect_err("missing");
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
