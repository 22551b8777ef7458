use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mitsumori_agent::AgentError;
use mitsumori_core::{ApplicationError, ApprovalError, DomainError, InterfaceError};
use mitsumori_db::repositories::RepositoryError;
use serde::Serialize;
use tracing::{error, warn};

use crate::directory::DirectoryError;
use crate::money_forward::MoneyForwardError;
use crate::print::PrintError;

/// Error returned by every JSON handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    fields: Vec<String>,
    correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), fields: Vec::new(), correlation_id: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// 422 pointing at one input field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
            fields: vec![field.into()],
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = self.correlation_id.as_deref().unwrap_or("unassigned"),
                status = self.status.as_u16(),
                error = %self.message,
                "request failed"
            );
        } else if self.status == StatusCode::CONFLICT || self.status == StatusCode::FORBIDDEN {
            warn!(
                event_name = "http.request.refused",
                correlation_id = self.correlation_id.as_deref().unwrap_or("unassigned"),
                status = self.status.as_u16(),
                error = %self.message,
                "request refused"
            );
        }

        let body = ApiErrorBody {
            error: self.message,
            field: self.fields.first().cloned(),
            fields: if self.fields.len() > 1 { self.fields } else { Vec::new() },
            correlation_id: self.correlation_id,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let correlation_id = Some(error.correlation_id().to_string())
            .filter(|value| value != "unassigned");
        let message = error.to_string();
        let (status, fields) = match error {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, Vec::new()),
            InterfaceError::Unprocessable { fields, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, fields)
            }
            InterfaceError::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, Vec::new()),
            InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, Vec::new()),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, Vec::new()),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, Vec::new()),
            InterfaceError::BadGateway { .. } => (StatusCode::BAD_GATEWAY, Vec::new()),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, Vec::new())
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()),
        };
        Self { status, message, fields, correlation_id }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self::from(InterfaceError::from(error))
    }
}

impl From<ApprovalError> for ApiError {
    fn from(error: ApprovalError) -> Self {
        Self::from(InterfaceError::from(error))
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self::from(ApplicationError::from(error))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        let application = match error {
            RepositoryError::NotFound { entity, id } => {
                ApplicationError::NotFound(format!("{entity} `{id}`"))
            }
            RepositoryError::Conflict { .. } => ApplicationError::Conflict(error.to_string()),
            RepositoryError::Database(
                ref source @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)),
            ) => ApplicationError::Persistence(source.to_string()),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
            }
        };
        Self::from(application)
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        let status = match &error {
            AgentError::Disabled | AgentError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::EmptyConversation => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::Transport(_)
            | AgentError::Upstream { .. }
            | AgentError::EmptyResponse
            | AgentError::MalformedDraft(_) => StatusCode::BAD_GATEWAY,
        };
        let mut api = Self::new(status, error.to_string());
        if matches!(error, AgentError::EmptyConversation) {
            api.fields.push("messages".to_string());
        }
        api
    }
}

impl From<MoneyForwardError> for ApiError {
    fn from(error: MoneyForwardError) -> Self {
        match error {
            MoneyForwardError::Repository(inner) => Self::from(inner),
            MoneyForwardError::Disabled | MoneyForwardError::Misconfigured(_) => {
                Self::unavailable(error.to_string())
            }
            MoneyForwardError::NotConnected => Self::conflict(error.to_string()),
            MoneyForwardError::InvalidState
            | MoneyForwardError::MissingCode
            | MoneyForwardError::Denied(_) => Self::bad_request(error.to_string()),
            MoneyForwardError::MissingPartner => Self::invalid("customer_id", error.to_string()),
            MoneyForwardError::Transport(_)
            | MoneyForwardError::Upstream { .. }
            | MoneyForwardError::Decode(_)
            | MoneyForwardError::TooManyBillingPages { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, error.to_string())
            }
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::NotConfigured => Self::unavailable(error.to_string()),
            DirectoryError::Transport(_)
            | DirectoryError::Upstream { .. }
            | DirectoryError::Decode(_) => Self::new(StatusCode::BAD_GATEWAY, error.to_string()),
        }
    }
}

impl From<PrintError> for ApiError {
    fn from(error: PrintError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};
    use mitsumori_agent::AgentError;
    use mitsumori_core::{ApprovalError, DomainError, EstimateStatus};
    use mitsumori_db::repositories::RepositoryError;

    use super::ApiError;

    async fn body_json(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes =
            axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn validation_lists_missing_fields() {
        let error = ApiError::from(ApprovalError::Validation {
            missing_fields: vec!["title".to_string(), "items[0].name".to_string()],
        });

        let (status, body) = body_json(error).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["field"], "title");
        assert_eq!(body["fields"][1], "items[0].name");
    }

    #[tokio::test]
    async fn single_field_errors_omit_the_field_list() {
        let (status, body) = body_json(ApiError::from(ApprovalError::EmptyReason)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["field"], "reason");
        assert!(body.get("fields").is_none());
    }

    #[test]
    fn approval_and_domain_errors_map_to_statuses() {
        assert_eq!(ApiError::from(ApprovalError::Unauthorized).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(ApprovalError::NoCurrentStep).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(DomainError::NotEditable { status: EstimateStatus::Pending }).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn repository_errors_map_to_statuses() {
        let conflict = RepositoryError::Conflict { entity: "estimate", id: "7".to_string() };
        assert_eq!(ApiError::from(conflict).status(), StatusCode::CONFLICT);

        let missing = RepositoryError::NotFound { entity: "estimate", id: "7".to_string() };
        assert_eq!(ApiError::from(missing).status(), StatusCode::NOT_FOUND);

        let closed = RepositoryError::Database(sqlx::Error::PoolClosed);
        assert_eq!(ApiError::from(closed).status(), StatusCode::SERVICE_UNAVAILABLE);

        let decode = RepositoryError::Decode("bad json".to_string());
        assert_eq!(ApiError::from(decode).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn assistant_errors_map_to_statuses() {
        assert_eq!(ApiError::from(AgentError::Disabled).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(AgentError::EmptyConversation).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(AgentError::MalformedDraft("no json".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
