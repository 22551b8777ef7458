pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod numbering;

pub use approvals::{
    project_status, ApprovalError, ApprovalOutcome, ApprovalWorkflow, CancelMode, EstimateAction,
    StatusProjection, SubmitMode,
};
pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::approval::{ApprovalFlow, ApprovalStep, ApprovalStepDraft, CurrentStep, StepDecision};
pub use domain::estimate::{Estimate, EstimateId, EstimateItem, EstimateStatus, TaxCategory};
pub use domain::identity::{ApproverRef, Identity};
pub use domain::invoice::{Billing, InvoiceId, InvoiceStatus, LocalInvoice};
pub use domain::maintenance::{MaintenanceFee, MaintenanceFeeId, MaintenanceSummary};
pub use domain::product::{Category, CategoryId, Product, ProductId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use numbering::{next_document_number, DocumentNumberPrefix};
