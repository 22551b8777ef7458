use axum::{extract::FromRequestParts, http::request::Parts};
use mitsumori_core::Identity;
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const EXTERNAL_USER_ID_HEADER: &str = "x-external-user-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Caller identity and correlation id taken from request headers.
///
/// Authentication happens upstream; this layer only trusts the forwarded ids.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn caller(&self) -> Result<&Identity, ApiError> {
        self.identity.as_ref().ok_or_else(|| {
            ApiError::unauthenticated("caller identity is required")
                .with_correlation_id(&self.correlation_id)
        })
    }

    /// Actor label for audit records; anonymous callers are recorded as such.
    pub fn actor(&self) -> String {
        self.identity.as_ref().map(ToString::to_string).unwrap_or_else(|| "anonymous".to_string())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = header(parts, CORRELATION_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let local_id = match header(parts, USER_ID_HEADER) {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                ApiError::bad_request(format!("{USER_ID_HEADER} must be a numeric user id"))
                    .with_correlation_id(&correlation_id)
            })?),
            None => None,
        };
        let external_id = header(parts, EXTERNAL_USER_ID_HEADER).map(str::to_string);

        Ok(Self { identity: Identity::from_parts(local_id, external_id), correlation_id })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
