use std::sync::Arc;

use axum::{extract::State, Json};
use mitsumori_agent::{requirements_from_history, AgentError, AssistantRuntime, ChatMessage, DraftEstimate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::estimates::{insert_numbered, EstimateView};

#[derive(Debug, Default, Deserialize)]
pub struct RequirementsRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct RequirementsResponse {
    pub reply: String,
    pub complete: bool,
    /// Flattened conversation, ready for `/api/ai/draft-estimate`, once complete.
    pub requirements: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub requirements: Option<String>,
    /// Used when `requirements` is absent.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub customer_name: String,
    /// Store the result as a numbered draft estimate.
    #[serde(default)]
    pub save: bool,
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub draft: DraftEstimate,
    pub estimate: Option<EstimateView>,
}

fn assistant(state: &AppState) -> Result<Arc<AssistantRuntime>, ApiError> {
    state.assistant.clone().ok_or_else(|| ApiError::from(AgentError::Disabled))
}

pub async fn gather_requirements(
    State(state): State<AppState>,
    context: RequestContext,
    Json(request): Json<RequirementsRequest>,
) -> Result<Json<RequirementsResponse>, ApiError> {
    let assistant = assistant(&state)?;
    let turn = assistant
        .interview(&request.messages)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;

    let requirements = turn.complete.then(|| {
        let mut history = request.messages.clone();
        history.push(ChatMessage::assistant(turn.reply.clone()));
        requirements_from_history(&history)
    });
    info!(
        event_name = "assistant.requirements.turn",
        correlation_id = %context.correlation_id,
        turns = request.messages.len(),
        complete = turn.complete,
        "requirement interview turn"
    );
    Ok(Json(RequirementsResponse { reply: turn.reply, complete: turn.complete, requirements }))
}

pub async fn draft_estimate(
    State(state): State<AppState>,
    context: RequestContext,
    Json(request): Json<DraftRequest>,
) -> Result<Json<DraftResponse>, ApiError> {
    let assistant = assistant(&state)?;
    let requirements = request
        .requirements
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| requirements_from_history(&request.messages));
    let catalog = state.products.list_products(false).await?;

    let draft = assistant
        .draft_estimate(&requirements, &catalog)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;

    let estimate = if request.save {
        let estimate = draft.clone().into_estimate(request.customer_name.trim());
        let stored = insert_numbered(&state, estimate, None, None).await?;
        info!(
            event_name = "assistant.draft.saved",
            correlation_id = %context.correlation_id,
            estimate_id = stored.id.0,
            actor = %context.actor(),
            "assistant draft saved as estimate"
        );
        Some(EstimateView::new(stored, context.identity.as_ref()))
    } else {
        None
    };

    Ok(Json(DraftResponse { draft, estimate }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use mitsumori_agent::{AssistantRuntime, ChatMessage, GuardrailPolicy, ScriptedLlmClient};
    use mitsumori_core::EstimateStatus;

    use super::{draft_estimate, gather_requirements, DraftRequest, RequirementsRequest};
    use crate::app::{test_support, AppState};
    use crate::catalog::{create_product, ProductPayload};
    use crate::context::RequestContext;

    fn context() -> RequestContext {
        RequestContext { identity: None, correlation_id: "req-ai".to_string() }
    }

    fn with_replies(replies: &[&str]) -> AppState {
        let client = Arc::new(ScriptedLlmClient::new(replies.iter().map(|reply| reply.to_string())));
        test_support::state().with_assistant(AssistantRuntime::new(client, GuardrailPolicy::default()))
    }

    #[tokio::test]
    async fn disabled_assistant_is_unavailable() {
        let error = gather_requirements(
            State(test_support::state()),
            context(),
            Json(RequirementsRequest { messages: vec![ChatMessage::user("名刺を作りたい")] }),
        )
        .await
        .expect_err("disabled");
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn completed_interview_returns_requirements() {
        let state = with_replies(&["- 名刺 100枚\n[[REQUIREMENTS_COMPLETE]]"]);
        let Json(response) = gather_requirements(
            State(state),
            context(),
            Json(RequirementsRequest { messages: vec![ChatMessage::user("名刺を100枚")] }),
        )
        .await
        .expect("turn");

        assert!(response.complete);
        assert_eq!(response.reply, "- 名刺 100枚");
        let requirements = response.requirements.expect("requirements");
        assert!(requirements.contains("名刺を100枚"));
    }

    #[tokio::test]
    async fn saved_draft_uses_catalog_price_and_stays_draft() {
        let state = with_replies(&[
            r#"{"title": "保守契約", "items": [{"sku": "MNT-01", "name": "保守", "quantity": 12, "unit_price": 1}]}"#,
        ]);
        let _ = create_product(
            State(state.clone()),
            context(),
            Json(ProductPayload {
                sku: "MNT-01".to_string(),
                name: "保守サポート".to_string(),
                unit_price: 30_000,
                cost: 12_000,
                unit: "月".to_string(),
                tax_category: Default::default(),
                category_id: None,
                business_division: None,
                is_active: true,
            }),
        )
        .await
        .expect("product");

        let Json(response) = draft_estimate(
            State(state),
            context(),
            Json(DraftRequest {
                requirements: Some("月額保守を1年".to_string()),
                customer_name: "アクメ商事".to_string(),
                save: true,
                ..DraftRequest::default()
            }),
        )
        .await
        .expect("draft");

        assert_eq!(response.draft.items[0].unit_price, 30_000);
        let saved = response.estimate.expect("saved");
        assert_eq!(saved.estimate.status, EstimateStatus::Draft);
        assert!(saved.estimate.approval_flow.is_none());
        assert_eq!(saved.estimate.customer_name, "アクメ商事");
        assert!(saved.estimate.estimate_number.is_some());
        assert_eq!(saved.totals.subtotal, 360_000);
    }

    #[tokio::test]
    async fn empty_requirements_are_unprocessable() {
        let state = with_replies(&[]);
        let error = draft_estimate(State(state), context(), Json(DraftRequest::default()))
            .await
            .expect_err("empty");
        assert_eq!(error.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.fields(), ["messages"]);
    }
}
