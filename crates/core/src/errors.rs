use thiserror::Error;

use crate::{approvals::ApprovalError, domain::estimate::EstimateStatus, flows::FlowTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("estimate in status {status} cannot be converted to an invoice")]
    NotInvoiceable { status: EstimateStatus },
    #[error("estimate in status {status} cannot be edited")]
    NotEditable { status: EstimateStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<ApprovalError> for ApplicationError {
    fn from(value: ApprovalError) -> Self {
        Self::Domain(DomainError::Approval(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, fields: Vec<String>, correlation_id: String },
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("upstream failure: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unprocessable { .. } => "Some fields are missing or invalid.",
            Self::Unauthenticated { .. } => "Sign in to continue.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record was changed by someone else or is in the wrong state. Reload and try again."
            }
            Self::BadGateway { .. } => "An external service returned an error.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::Unauthenticated { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::Unauthenticated { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id.into();
        mapped
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApprovalError> for InterfaceError {
    fn from(value: ApprovalError) -> Self {
        let message = value.to_string();
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApprovalError::Validation { missing_fields } => {
                Self::Unprocessable { message, fields: missing_fields, correlation_id }
            }
            ApprovalError::EmptyReason => {
                Self::Unprocessable { message, fields: vec!["reason".to_owned()], correlation_id }
            }
            ApprovalError::EmptyFlow => Self::Unprocessable {
                message,
                fields: vec!["approval_flow".to_owned()],
                correlation_id,
            },
            ApprovalError::Unauthorized => Self::Forbidden { message, correlation_id },
            ApprovalError::StepNotFound { .. } => Self::NotFound { message, correlation_id },
            ApprovalError::NoCurrentStep
            | ApprovalError::InvalidState { .. }
            | ApprovalError::Lifecycle(_) => Self::Conflict { message, correlation_id },
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Domain(DomainError::Approval(error)) => Self::from(error),
            ApplicationError::Domain(DomainError::FlowTransition(error)) => {
                Self::from(ApprovalError::Lifecycle(error))
            }
            ApplicationError::Domain(
                error @ (DomainError::NotInvoiceable { .. } | DomainError::NotEditable { .. }),
            ) => Self::Conflict { message: error.to_string(), correlation_id },
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::NotFound(message) => Self::NotFound { message, correlation_id },
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Integration(message) => Self::BadGateway { message, correlation_id },
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::ApprovalError;
    use crate::domain::estimate::EstimateStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "unknown estimate status `archived`".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn approval_errors_map_to_distinct_interface_classes() {
        let validation = ApplicationError::from(ApprovalError::Validation {
            missing_fields: vec!["title".to_owned()],
        })
        .into_interface("req-2");
        assert!(matches!(
            validation,
            InterfaceError::Unprocessable { ref fields, .. } if fields == &vec!["title".to_owned()]
        ));

        let forbidden = ApplicationError::from(ApprovalError::Unauthorized).into_interface("req-3");
        assert!(matches!(forbidden, InterfaceError::Forbidden { .. }));
        assert_eq!(forbidden.correlation_id(), "req-3");

        let conflict = ApplicationError::from(ApprovalError::NoCurrentStep).into_interface("req-4");
        assert!(matches!(conflict, InterfaceError::Conflict { .. }));

        let reason = ApplicationError::from(ApprovalError::EmptyReason).into_interface("req-5");
        assert!(matches!(reason, InterfaceError::Unprocessable { .. }));
    }

    #[test]
    fn invoice_conversion_of_unapproved_estimate_is_conflict() {
        let interface = ApplicationError::from(DomainError::NotInvoiceable {
            status: EstimateStatus::Draft,
        })
        .into_interface("req-6");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-7");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn integration_error_maps_to_bad_gateway() {
        let interface =
            ApplicationError::Integration("money forward returned 500".to_owned()).into_interface("req-8");
        assert!(matches!(interface, InterfaceError::BadGateway { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("missing client secret".to_owned())
            .into_interface("req-9");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
