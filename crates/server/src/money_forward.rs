//! Money Forward Cloud Invoice integration.
//!
//! - OAuth authorization-code flow with single-use state tokens (10 minute lifetime)
//! - access token refresh when the stored token is about to expire
//! - pushing an approved estimate as a Money Forward quote
//! - mirroring the Money Forward billing list into the local `billing` table

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mitsumori_core::config::MoneyForwardConfig;
use mitsumori_core::domain::estimate::TaxCategory;
use mitsumori_core::{Billing, Estimate, EstimateId, EstimateStatus};
use mitsumori_db::repositories::{
    MoneyForwardConnection, MoneyForwardTokenStore, RepositoryError,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::estimates::{load_estimate, EstimateView};

pub const STATE_TTL_MINUTES: i64 = 10;
const TOKEN_REFRESH_LEEWAY_SECS: i64 = 60;
const API_TIMEOUT_SECS: u64 = 30;
const BILLINGS_PER_PAGE: u32 = 100;
const MAX_BILLING_PAGES: u32 = 50;
const QUOTE_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum MoneyForwardError {
    #[error("money forward integration is disabled")]
    Disabled,
    #[error("money forward is not connected")]
    NotConnected,
    #[error("money forward integration is misconfigured: {0}")]
    Misconfigured(&'static str),
    #[error("invalid or expired oauth state token")]
    InvalidState,
    #[error("authorization code missing")]
    MissingCode,
    #[error("money forward denied authorization: {0}")]
    Denied(String),
    #[error("estimate has no money forward partner id")]
    MissingPartner,
    #[error("money forward request failed: {0}")]
    Transport(String),
    #[error("money forward returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("money forward response could not be read: {0}")]
    Decode(String),
    #[error("money forward reports {total_pages} billing pages, more than the {limit} a sync may read")]
    TooManyBillingPages { total_pages: u64, limit: u32 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub state: String,
    pub state_expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub enabled: bool,
    pub connected: bool,
    pub expired: bool,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteQuote {
    pub id: String,
    pub pdf_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

pub struct MoneyForwardClient {
    http: reqwest::Client,
    config: MoneyForwardConfig,
    tokens: Arc<dyn MoneyForwardTokenStore>,
}

impl MoneyForwardClient {
    pub fn new(
        config: MoneyForwardConfig,
        tokens: Arc<dyn MoneyForwardTokenStore>,
    ) -> Result<Self, MoneyForwardError> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|error| MoneyForwardError::Transport(error.to_string()))?;
        Ok(Self { http, config, tokens })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn ensure_enabled(&self) -> Result<(), MoneyForwardError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(MoneyForwardError::Disabled)
        }
    }

    fn client_credentials(&self) -> Result<(&str, &SecretString), MoneyForwardError> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or(MoneyForwardError::Misconfigured("money_forward.client_id is not set"))?;
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or(MoneyForwardError::Misconfigured("money_forward.client_secret is not set"))?;
        Ok((client_id, client_secret))
    }

    fn redirect_uri(&self) -> Result<&str, MoneyForwardError> {
        self.config
            .redirect_uri
            .as_deref()
            .ok_or(MoneyForwardError::Misconfigured("money_forward.redirect_uri is not set"))
    }

    pub fn authorization_url(&self, state: &str) -> Result<String, MoneyForwardError> {
        let (client_id, _) = self.client_credentials()?;
        let url = reqwest::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", client_id),
                ("redirect_uri", self.redirect_uri()?),
                ("scope", self.config.scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|_| MoneyForwardError::Misconfigured("money_forward.authorize_url is not a URL"))?;
        Ok(url.to_string())
    }

    pub async fn start_authorization(
        &self,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationStart, MoneyForwardError> {
        self.ensure_enabled()?;
        let state = Uuid::new_v4().simple().to_string();
        let authorization_url = self.authorization_url(&state)?;
        self.tokens.store_state(&state, now).await?;

        Ok(AuthorizationStart {
            authorization_url,
            state,
            state_expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
        })
    }

    /// Consumes `state` before any network call, so a replayed callback fails even when
    /// the token endpoint is unreachable.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<MoneyForwardConnection, MoneyForwardError> {
        self.ensure_enabled()?;
        let fresh = self
            .tokens
            .consume_state(state, now - Duration::minutes(STATE_TTL_MINUTES))
            .await?;
        if !fresh {
            return Err(MoneyForwardError::InvalidState);
        }
        if code.trim().is_empty() {
            return Err(MoneyForwardError::MissingCode);
        }

        let redirect_uri = self.redirect_uri()?;
        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code.trim()),
                ("redirect_uri", redirect_uri),
            ])
            .await?;
        let connection = connection_from_token(token, None, now);
        self.tokens.save_connection(&connection).await?;
        Ok(connection)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, MoneyForwardError> {
        let (client_id, client_secret) = self.client_credentials()?;
        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(client_id, Some(client_secret.expose_secret()))
            .form(form)
            .send()
            .await
            .map_err(|error| MoneyForwardError::Transport(error.to_string()))?;

        let token: TokenResponse = read_json(response).await?;
        if token.access_token.trim().is_empty() {
            return Err(MoneyForwardError::Decode("token endpoint returned an empty access token".to_string()));
        }
        Ok(token)
    }

    /// A usable access token, refreshed first when it expires within a minute.
    pub async fn access_token(&self, now: DateTime<Utc>) -> Result<SecretString, MoneyForwardError> {
        self.ensure_enabled()?;
        let connection = self.tokens.load_connection().await?.ok_or(MoneyForwardError::NotConnected)?;
        if !connection.is_expired(now, TOKEN_REFRESH_LEEWAY_SECS) {
            return Ok(connection.access_token);
        }

        let refresh_token = connection.refresh_token.clone().ok_or(MoneyForwardError::NotConnected)?;
        let token = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .await?;
        let refreshed = connection_from_token(token, Some(refresh_token), now);
        self.tokens.save_connection(&refreshed).await?;
        info!(
            event_name = "money_forward.token.refreshed",
            expires_at = ?refreshed.expires_at,
            "money forward access token refreshed"
        );
        Ok(refreshed.access_token)
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<ConnectionStatus, MoneyForwardError> {
        let connection = self.tokens.load_connection().await?;
        Ok(ConnectionStatus {
            enabled: self.config.enabled,
            connected: connection.is_some(),
            expired: connection
                .as_ref()
                .map(|connection| {
                    connection.is_expired(now, 0) && connection.refresh_token.is_none()
                })
                .unwrap_or(false),
            scope: connection.as_ref().and_then(|connection| connection.scope.clone()),
            expires_at: connection.as_ref().and_then(|connection| connection.expires_at),
            updated_at: connection.as_ref().map(|connection| connection.updated_at),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, MoneyForwardError> {
        let token = self.access_token(Utc::now()).await?;
        let response = self
            .http
            .get(format!("{}{path}", self.api_base()))
            .bearer_auth(token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|error| MoneyForwardError::Transport(error.to_string()))?;
        read_json(response).await
    }

    fn api_base(&self) -> &str {
        self.config.api_base_url.trim_end_matches('/')
    }

    async fn department_id(&self, partner_id: &str) -> Result<String, MoneyForwardError> {
        let partner = self.get_json(&format!("/partners/{partner_id}"), &[]).await?;
        partner
            .get("departments")
            .and_then(Value::as_array)
            .and_then(|departments| departments.first())
            .and_then(|department| department.get("id"))
            .and_then(value_as_string)
            .ok_or_else(|| MoneyForwardError::Decode(format!("partner `{partner_id}` has no department")))
    }

    pub async fn create_quote(&self, estimate: &Estimate) -> Result<RemoteQuote, MoneyForwardError> {
        self.ensure_enabled()?;
        let partner_id = estimate
            .customer_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(MoneyForwardError::MissingPartner)?;
        let department_id = self.department_id(partner_id).await?;
        let payload = quote_payload(estimate, &department_id, Utc::now().date_naive());

        let token = self.access_token(Utc::now()).await?;
        let response = self
            .http
            .post(format!("{}/quotes", self.api_base()))
            .bearer_auth(token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| MoneyForwardError::Transport(error.to_string()))?;
        let created: Value = read_json(response).await?;

        let id = created
            .get("id")
            .and_then(value_as_string)
            .ok_or_else(|| MoneyForwardError::Decode("created quote has no id".to_string()))?;
        Ok(RemoteQuote { id, pdf_url: created.get("pdf_url").and_then(value_as_string) })
    }

    /// Every billing visible to the connection, following pagination.
    /// Fails rather than returning a partial list when the page cap is reached.
    pub async fn fetch_billings(&self, now: DateTime<Utc>) -> Result<Vec<Billing>, MoneyForwardError> {
        self.ensure_enabled()?;
        let mut billings = Vec::new();
        let mut page = 1;

        loop {
            let body = self
                .get_json(
                    "/billings",
                    &[("page", page.to_string()), ("per_page", BILLINGS_PER_PAGE.to_string())],
                )
                .await?;
            let records = body
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| MoneyForwardError::Decode("billing list has no data array".to_string()))?;
            billings.extend(records.iter().filter_map(|record| billing_from_record(record, now)));

            let total_pages = body
                .get("pagination")
                .and_then(|pagination| pagination.get("total_pages"))
                .and_then(Value::as_u64)
                .unwrap_or(1);
            if u64::from(page) >= total_pages {
                break;
            }
            // A partial listing would soft-delete every billing on the unread pages.
            if page >= MAX_BILLING_PAGES {
                return Err(MoneyForwardError::TooManyBillingPages {
                    total_pages,
                    limit: MAX_BILLING_PAGES,
                });
            }
            page += 1;
        }

        Ok(billings)
    }
}

async fn read_json<T>(response: reqwest::Response) -> Result<T, MoneyForwardError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MoneyForwardError::Upstream { status: status.as_u16(), body });
    }
    response.json::<T>().await.map_err(|error| MoneyForwardError::Decode(error.to_string()))
}

fn connection_from_token(
    token: TokenResponse,
    previous_refresh: Option<SecretString>,
    now: DateTime<Utc>,
) -> MoneyForwardConnection {
    MoneyForwardConnection {
        access_token: SecretString::from(token.access_token),
        refresh_token: token.refresh_token.map(SecretString::from).or(previous_refresh),
        expires_at: token.expires_in.map(|seconds| now + Duration::seconds(seconds)),
        scope: token.scope,
        updated_at: now,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Money Forward amounts arrive as numbers or decimal strings.
fn value_as_yen(value: Option<&Value>) -> i64 {
    let decimal = match value {
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string()).ok(),
        Some(Value::String(text)) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    };
    decimal
        .and_then(|amount| {
            amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64()
        })
        .unwrap_or(0)
}

fn value_as_date(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok())
}

fn billing_from_record(record: &Value, now: DateTime<Utc>) -> Option<Billing> {
    let text = |key: &str| record.get(key).and_then(value_as_string);
    Some(Billing {
        mf_billing_id: text("id")?,
        billing_number: text("billing_number"),
        partner_name: text("partner_name"),
        title: text("title"),
        billing_date: value_as_date(record.get("billing_date")),
        due_date: value_as_date(record.get("due_date")),
        total_amount: value_as_yen(record.get("total_price")),
        tax_amount: value_as_yen(record.get("excise_price")),
        payment_status: text("payment_status"),
        pdf_url: text("pdf_url"),
        synced_at: now,
        deleted_at: None,
    })
}

fn excise(category: TaxCategory) -> &'static str {
    match category {
        TaxCategory::Standard => "ten_percent",
        TaxCategory::Reduced => "eight_percent_as_reduced_tax_rate",
        TaxCategory::Exempt => "untaxable",
    }
}

fn quote_payload(estimate: &Estimate, department_id: &str, today: NaiveDate) -> Value {
    let quote_date = estimate.issue_date.unwrap_or(today);
    let expired_date =
        estimate.due_date.unwrap_or_else(|| quote_date + Duration::days(QUOTE_VALIDITY_DAYS));
    let items: Vec<Value> = estimate
        .items
        .iter()
        .map(|item| {
            json!({
                "name": item.name,
                "price": item.unit_price,
                "quantity": item.quantity.normalize().to_string(),
                "unit": item.unit,
                "excise": excise(item.tax_category),
            })
        })
        .collect();

    json!({
        "department_id": department_id,
        "quote_number": estimate.estimate_number,
        "title": estimate.title,
        "quote_date": quote_date.format("%Y-%m-%d").to_string(),
        "expired_date": expired_date.format("%Y-%m-%d").to_string(),
        "note": estimate.notes,
        "memo": estimate.internal_memo,
        "items": items,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BillingSyncSummary {
    pub fetched: usize,
    pub marked_deleted: u64,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingListQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

fn with_context(error: MoneyForwardError, context: &RequestContext, event_name: &str) -> ApiError {
    warn!(
        event_name,
        correlation_id = %context.correlation_id,
        error = %error,
        "money forward operation failed"
    );
    ApiError::from(error).with_correlation_id(&context.correlation_id)
}

pub async fn oauth_start(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<AuthorizationStart>, ApiError> {
    let start = state
        .money_forward
        .start_authorization(Utc::now())
        .await
        .map_err(|error| with_context(error, &context, "money_forward.oauth.start_failed"))?;
    info!(
        event_name = "money_forward.oauth.started",
        correlation_id = %context.correlation_id,
        actor = %context.actor(),
        "money forward authorization started"
    );
    Ok(Json(start))
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    context: RequestContext,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let fail = |error| with_context(error, &context, "money_forward.oauth.callback_failed");

    if let Some(error) = query.error {
        let detail = query.error_description.filter(|value| !value.trim().is_empty());
        return Err(fail(MoneyForwardError::Denied(detail.unwrap_or(error))));
    }
    let state_token = query.state.ok_or(MoneyForwardError::InvalidState).map_err(fail)?;
    let code = query.code.unwrap_or_default();

    let now = Utc::now();
    state
        .money_forward
        .complete_authorization(&code, &state_token, now)
        .await
        .map_err(fail)?;
    info!(
        event_name = "money_forward.oauth.connected",
        correlation_id = %context.correlation_id,
        "money forward connected"
    );

    let status = state.money_forward.status(now).await.map_err(fail)?;
    Ok(Json(status))
}

pub async fn connection_status(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let status = state
        .money_forward
        .status(Utc::now())
        .await
        .map_err(|error| with_context(error, &context, "money_forward.status.failed"))?;
    Ok(Json(status))
}

/// Pushes an approved estimate as a Money Forward quote and records the link.
pub async fn push_quote(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
) -> Result<Json<EstimateView>, ApiError> {
    let mut estimate = load_estimate(&state, EstimateId(id)).await?;
    if estimate.status != EstimateStatus::Sent {
        return Err(ApiError::conflict(format!(
            "only approved estimates can be sent to money forward (status {})",
            estimate.status
        ))
        .with_correlation_id(&context.correlation_id));
    }
    if let Some(existing) = estimate.money_forward.quote_id.as_deref() {
        return Err(ApiError::conflict(format!(
            "estimate already linked to money forward quote `{existing}`"
        ))
        .with_correlation_id(&context.correlation_id));
    }

    let quote = state
        .money_forward
        .create_quote(&estimate)
        .await
        .map_err(|error| with_context(error, &context, "money_forward.quote.push_failed"))?;
    estimate.money_forward.quote_id = Some(quote.id.clone());
    estimate.money_forward.quote_pdf_url = quote.pdf_url;
    estimate.money_forward.deleted_at = None;
    let saved = state.estimates.update(&estimate).await?;

    info!(
        event_name = "money_forward.quote.pushed",
        correlation_id = %context.correlation_id,
        estimate_id = id,
        mf_quote_id = %quote.id,
        "estimate pushed to money forward"
    );
    Ok(Json(EstimateView::new(saved, context.identity.as_ref())))
}

pub async fn sync_billings(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<BillingSyncSummary>, ApiError> {
    let now = Utc::now();
    let billings = state
        .money_forward
        .fetch_billings(now)
        .await
        .map_err(|error| with_context(error, &context, "money_forward.billings.sync_failed"))?;

    state.billings.upsert_synced(&billings).await?;
    let seen: Vec<String> = billings.iter().map(|billing| billing.mf_billing_id.clone()).collect();
    let marked_deleted = state.billings.mark_missing_deleted(&seen, now).await?;

    info!(
        event_name = "money_forward.billings.synced",
        correlation_id = %context.correlation_id,
        fetched = billings.len(),
        marked_deleted,
        "money forward billings synced"
    );
    Ok(Json(BillingSyncSummary { fetched: billings.len(), marked_deleted, synced_at: now }))
}

pub async fn list_billings(
    State(state): State<AppState>,
    Query(query): Query<BillingListQuery>,
) -> Result<Json<Vec<Billing>>, ApiError> {
    Ok(Json(state.billings.list(query.include_deleted).await?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use mitsumori_core::config::{AppConfig, MoneyForwardConfig};
    use mitsumori_core::domain::estimate::{DisplayMode, EstimateItem, TaxCategory};
    use mitsumori_core::Estimate;
    use mitsumori_db::repositories::{
        InMemoryMoneyForwardTokenStore, MoneyForwardConnection, MoneyForwardTokenStore,
    };
    use rust_decimal::Decimal;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;

    use super::{billing_from_record, quote_payload, MoneyForwardClient, MoneyForwardError};

    fn config(enabled: bool) -> MoneyForwardConfig {
        MoneyForwardConfig {
            enabled,
            client_id: Some("client-123".to_string()),
            client_secret: Some(SecretString::from("shh".to_string())),
            redirect_uri: Some("https://backoffice.example.jp/api/money-forward/oauth/callback".to_string()),
            ..AppConfig::default().money_forward
        }
    }

    fn client(enabled: bool) -> (MoneyForwardClient, Arc<InMemoryMoneyForwardTokenStore>) {
        let store = Arc::new(InMemoryMoneyForwardTokenStore::default());
        let client = MoneyForwardClient::new(config(enabled), store.clone()).expect("client");
        (client, store)
    }

    #[test]
    fn authorization_url_carries_encoded_parameters() {
        let (client, _) = client(true);
        let url = client.authorization_url("abc123").expect("url");

        assert!(url.starts_with("https://api.biz.moneyforward.com/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Fbackoffice.example.jp%2Fapi%2Fmoney-forward%2Foauth%2Fcallback"
        ));
        assert!(url.contains("scope=mfc%2Finvoice%2Fdata.write"));
        assert!(url.contains("state=abc123"));
    }

    #[tokio::test]
    async fn disabled_integration_refuses_to_start() {
        let (client, _) = client(false);
        assert!(matches!(
            client.start_authorization(Utc::now()).await,
            Err(MoneyForwardError::Disabled)
        ));
    }

    #[tokio::test]
    async fn state_tokens_are_single_use_and_expire() {
        let (client, store) = client(true);
        let now = Utc::now();

        assert!(matches!(
            client.complete_authorization("code", "unknown", now).await,
            Err(MoneyForwardError::InvalidState)
        ));

        let start = client.start_authorization(now - Duration::minutes(11)).await.expect("start");
        assert!(matches!(
            client.complete_authorization("code", &start.state, now).await,
            Err(MoneyForwardError::InvalidState)
        ));
        assert!(!store.consume_state(&start.state, now - Duration::hours(1)).await.expect("consume"));
    }

    #[tokio::test]
    async fn empty_code_fails_after_consuming_state() {
        let (client, store) = client(true);
        let now = Utc::now();
        let start = client.start_authorization(now).await.expect("start");

        assert!(matches!(
            client.complete_authorization(" ", &start.state, now).await,
            Err(MoneyForwardError::MissingCode)
        ));
        assert!(!store.consume_state(&start.state, now - Duration::minutes(1)).await.expect("consume"));
    }

    #[tokio::test]
    async fn access_token_requires_a_connection_and_reuses_fresh_tokens() {
        let (client, store) = client(true);
        let now = Utc::now();
        assert!(matches!(client.access_token(now).await, Err(MoneyForwardError::NotConnected)));

        store
            .save_connection(&MoneyForwardConnection {
                access_token: SecretString::from("fresh".to_string()),
                refresh_token: None,
                expires_at: Some(now + Duration::hours(1)),
                scope: Some("mfc/invoice/data.write".to_string()),
                updated_at: now,
            })
            .await
            .expect("save");
        assert_eq!(client.access_token(now).await.expect("token").expose_secret(), "fresh");

        let status = client.status(now).await.expect("status");
        assert!(status.connected);
        assert!(!status.expired);

        let later = now + Duration::hours(2);
        assert!(matches!(client.access_token(later).await, Err(MoneyForwardError::NotConnected)));
        assert!(client.status(later).await.expect("status").expired);
    }

    #[test]
    fn quote_payload_maps_tax_categories_and_defaults_expiry() {
        let mut estimate = Estimate::new_draft("アクメ商事", "LP制作");
        estimate.estimate_number = Some("EST-7-ACME-250401-001".to_string());
        estimate.issue_date = NaiveDate::from_ymd_opt(2025, 4, 1);
        estimate.items = vec![EstimateItem {
            product_id: None,
            sku: None,
            name: "軽食".to_string(),
            quantity: Decimal::new(150, 2),
            unit_price: 1_000,
            cost: 0,
            unit: "食".to_string(),
            tax_category: TaxCategory::Reduced,
            display_mode: DisplayMode::Itemized,
            business_division: None,
        }];

        let today = NaiveDate::from_ymd_opt(2025, 5, 1).expect("date");
        let payload = quote_payload(&estimate, "dep-1", today);

        assert_eq!(payload["department_id"], "dep-1");
        assert_eq!(payload["quote_date"], "2025-04-01");
        assert_eq!(payload["expired_date"], "2025-05-01");
        assert_eq!(payload["items"][0]["excise"], "eight_percent_as_reduced_tax_rate");
        assert_eq!(payload["items"][0]["quantity"], "1.5");
    }

    #[test]
    fn billing_records_accept_string_amounts_and_need_an_id() {
        let now = Utc.with_ymd_and_hms(2025, 4, 10, 9, 0, 0).single().expect("time");
        let billing = billing_from_record(
            &json!({
                "id": "mf-b-1",
                "billing_number": "B-0001",
                "partner_name": "アクメ商事",
                "billing_date": "2025-04-01",
                "due_date": "2025-04-30T00:00:00+09:00",
                "total_price": "110000.0",
                "excise_price": 10000,
                "payment_status": "unsettled"
            }),
            now,
        )
        .expect("billing");

        assert_eq!(billing.total_amount, 110_000);
        assert_eq!(billing.tax_amount, 10_000);
        assert_eq!(billing.due_date, NaiveDate::from_ymd_opt(2025, 4, 30));
        assert_eq!(billing.synced_at, now);
        assert!(billing_from_record(&json!({"title": "no id"}), now).is_none());
    }

    /// Serves `/billings` with one record per page and the given page count.
    async fn billing_api(total_pages: u64) -> String {
        use std::collections::HashMap;

        use axum::{extract::Query, routing::get, Json, Router};

        let app = Router::new().route(
            "/billings",
            get(move |Query(query): Query<HashMap<String, String>>| async move {
                let page = query.get("page").cloned().unwrap_or_else(|| "1".to_string());
                Json(json!({
                    "data": [{"id": format!("mf-b-{page}"), "total_price": 1000}],
                    "pagination": {"total_pages": total_pages}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    async fn connected_client(api_base_url: String) -> MoneyForwardClient {
        let store = Arc::new(InMemoryMoneyForwardTokenStore::default());
        let now = Utc::now();
        store
            .save_connection(&MoneyForwardConnection {
                access_token: SecretString::from("token".to_string()),
                refresh_token: None,
                expires_at: Some(now + Duration::hours(1)),
                scope: None,
                updated_at: now,
            })
            .await
            .expect("save");
        MoneyForwardClient::new(MoneyForwardConfig { api_base_url, ..config(true) }, store)
            .expect("client")
    }

    #[tokio::test]
    async fn billing_fetch_follows_every_page() {
        let client = connected_client(billing_api(3).await).await;
        let billings = client.fetch_billings(Utc::now()).await.expect("billings");
        let ids: Vec<&str> = billings.iter().map(|billing| billing.mf_billing_id.as_str()).collect();
        assert_eq!(ids, ["mf-b-1", "mf-b-2", "mf-b-3"]);
    }

    #[tokio::test]
    async fn sync_past_the_page_cap_fails_without_deleting_unread_billings() {
        use axum::{extract::State, http::StatusCode};
        use mitsumori_db::repositories::BillingRepository;

        use crate::app::test_support;
        use crate::context::RequestContext;

        let client = connected_client(billing_api(60).await).await;
        let error = client.fetch_billings(Utc::now()).await.expect_err("too many pages");
        assert!(matches!(
            error,
            MoneyForwardError::TooManyBillingPages { total_pages: 60, limit: 50 }
        ));

        let mut state = test_support::state();
        let known = billing_from_record(&json!({"id": "mf-b-55"}), Utc::now()).expect("billing");
        state.billings.upsert_synced(&[known]).await.expect("seed");
        state.money_forward = Arc::new(client);

        let context = RequestContext { identity: None, correlation_id: "req-sync".to_string() };
        let error = super::sync_billings(State(state.clone()), context).await.expect_err("sync");
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);

        let stored = state.billings.list(true).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].deleted_at.is_none());
    }
}
