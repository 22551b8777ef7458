//! Proxy to the internal customer and user directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    Json,
};
use mitsumori_core::config::DirectoryConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::app::AppState;
use crate::context::RequestContext;
use crate::error::ApiError;

const DIRECTORY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("customer directory is not configured")]
    NotConfigured,
    #[error("customer directory request failed: {0}")]
    Transport(String),
    #[error("customer directory returned HTTP {status}")]
    Upstream { status: u16 },
    #[error("customer directory response could not be read: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCustomer {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Directory ids arrive as numbers from some endpoints and strings from others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn customers(&self, query: &str) -> Result<Vec<DirectoryCustomer>, DirectoryError>;
    async fn users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;
}

pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpDirectory {
    /// `None` when no base URL is configured.
    pub fn from_config(config: &DirectoryConfig) -> Result<Option<Self>, DirectoryError> {
        let Some(base_url) = config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
        else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DIRECTORY_TIMEOUT_SECS))
            .build()
            .map_err(|error| DirectoryError::Transport(error.to_string()))?;

        Ok(Some(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }))
    }

    async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, DirectoryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut request = self.http.get(format!("{}{path}", self.base_url)).query(query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| DirectoryError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Upstream { status: status.as_u16() });
        }
        response.json::<T>().await.map_err(|error| DirectoryError::Decode(error.to_string()))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn customers(&self, query: &str) -> Result<Vec<DirectoryCustomer>, DirectoryError> {
        self.get("/customers", &[("q", query)]).await
    }

    async fn users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.get("/users", &[]).await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerQuery {
    #[serde(default)]
    pub q: String,
}

fn directory(state: &AppState) -> Result<&Arc<dyn Directory>, DirectoryError> {
    state.directory.as_ref().ok_or(DirectoryError::NotConfigured)
}

pub async fn search_customers(
    State(state): State<AppState>,
    context: RequestContext,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<Vec<DirectoryCustomer>>, ApiError> {
    let customers = directory(&state)?.customers(query.q.trim()).await.map_err(|error| {
        warn!(
            event_name = "directory.customers.failed",
            correlation_id = %context.correlation_id,
            error = %error,
            "customer directory lookup failed"
        );
        ApiError::from(error).with_correlation_id(&context.correlation_id)
    })?;
    Ok(Json(customers))
}

pub async fn list_users(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<Vec<DirectoryUser>>, ApiError> {
    let users = directory(&state)?.users().await.map_err(|error| {
        warn!(
            event_name = "directory.users.failed",
            correlation_id = %context.correlation_id,
            error = %error,
            "user directory lookup failed"
        );
        ApiError::from(error).with_correlation_id(&context.correlation_id)
    })?;
    Ok(Json(users))
}
