pub mod projection;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalFlow, ApprovalStepDraft, StepDecision};
use crate::domain::estimate::{Estimate, EstimateStatus};
use crate::domain::identity::Identity;
use crate::flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError, SequentialApprovalFlow,
};

pub use projection::{project_status, EstimateAction, StatusProjection};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// First submission with a newly chosen list of approvers.
    Fresh(Vec<ApprovalStepDraft>),
    /// Re-run the existing flow from the first step.
    Resubmit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelMode {
    ClearDecisions,
    DropFlow,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub status: EstimateStatus,
    pub current_index: Option<usize>,
    pub waiting_on_name: Option<String>,
    pub actions: Vec<FlowAction>,
    /// Emitted by `record_persisted` or `record_not_persisted` once the write settles.
    #[serde(skip)]
    audit: AuditEvent,
}

impl ApprovalOutcome {
    fn from_estimate(estimate: &Estimate, actions: Vec<FlowAction>, audit: AuditEvent) -> Self {
        let projection = project_status(estimate, None);
        Self {
            status: estimate.status,
            current_index: projection.current_index,
            waiting_on_name: projection.waiting_on_name,
            actions,
            audit,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("required fields are missing: {}", .missing_fields.join(", "))]
    Validation { missing_fields: Vec<String> },
    #[error("caller is not the approver for this step")]
    Unauthorized,
    #[error("no approval step is waiting for a decision")]
    NoCurrentStep,
    #[error("a rejection reason is required")]
    EmptyReason,
    #[error("cannot {operation} an estimate in status {status}")]
    InvalidState { status: EstimateStatus, operation: &'static str },
    #[error("approval flow has no steps")]
    EmptyFlow,
    #[error("approval step {index} does not exist")]
    StepNotFound { index: usize },
    #[error(transparent)]
    Lifecycle(#[from] FlowTransitionError),
}

impl ApprovalError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Unauthorized => "unauthorized",
            Self::NoCurrentStep => "no_current_step",
            Self::EmptyReason => "empty_reason",
            Self::InvalidState { .. } => "invalid_state",
            Self::EmptyFlow => "empty_flow",
            Self::StepNotFound { .. } => "step_not_found",
            Self::Lifecycle(_) => "lifecycle",
        }
    }

    fn from_lifecycle(error: FlowTransitionError, operation: &'static str) -> Self {
        match error {
            FlowTransitionError::MissingRequiredFields { missing_fields, .. } => {
                Self::Validation { missing_fields }
            }
            FlowTransitionError::InvalidTransition { state, .. } => {
                Self::InvalidState { status: state, operation }
            }
        }
    }
}

/// Applies approval transitions to estimates.
///
/// Every transition runs against a copy of the estimate and is written back only
/// when all checks pass, so a failed call leaves the estimate untouched.
/// Refused transitions are audited immediately. Accepted ones are audited by the
/// caller through `record_persisted` / `record_not_persisted` after storing the estimate.
pub struct ApprovalWorkflow<S> {
    engine: FlowEngine<SequentialApprovalFlow>,
    sink: S,
}

impl<S> ApprovalWorkflow<S>
where
    S: AuditSink,
{
    pub fn new(sink: S) -> Self {
        Self { engine: FlowEngine::default(), sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn record_persisted(&self, outcome: &ApprovalOutcome) {
        self.sink.emit(outcome.audit.clone());
    }

    pub fn record_not_persisted(&self, outcome: &ApprovalOutcome, error: &str) {
        let mut event = outcome.audit.clone().with_metadata("persist_error", error);
        event.outcome = AuditOutcome::Failed;
        self.sink.emit(event);
    }

    pub fn submit_for_approval(
        &self,
        estimate: &mut Estimate,
        mode: SubmitMode,
        actor: &str,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.commit(estimate, "submit", actor, correlation_id, |working| {
            let context = FlowContext { missing_required_fields: working.missing_required_fields() };
            let outcome = self
                .engine
                .apply(&working.status, &FlowEvent::Submit, &context)
                .map_err(|error| ApprovalError::from_lifecycle(error, "submit"))?;

            let flow = match mode {
                SubmitMode::Fresh(drafts) => {
                    if drafts.is_empty() {
                        return Err(ApprovalError::EmptyFlow);
                    }
                    ApprovalFlow::from_drafts(drafts)
                }
                SubmitMode::Resubmit => {
                    let mut flow = working
                        .approval_flow
                        .clone()
                        .filter(|flow| !flow.is_empty())
                        .ok_or(ApprovalError::EmptyFlow)?;
                    flow.reset_decisions();
                    flow
                }
            };

            working.approval_flow = Some(flow);
            working.status = outcome.to;
            Ok(outcome.actions)
        })
    }

    pub fn approve(
        &self,
        estimate: &mut Estimate,
        caller: &Identity,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.commit(estimate, "approve", &caller.to_string(), correlation_id, |working| {
            let index = authorize_current(working, caller, "approve")?;
            let flow = current_flow_mut(working)?;
            if let Some(step) = flow.step_mut(index) {
                step.decision = StepDecision::Approved { at: Utc::now() };
            }
            let event = if flow.is_fully_approved() {
                FlowEvent::FinalApproval
            } else {
                FlowEvent::StepApproved
            };

            let outcome = self.engine.apply(&working.status, &event, &FlowContext::default())?;
            working.status = outcome.to;
            Ok(outcome.actions)
        })
    }

    pub fn reject(
        &self,
        estimate: &mut Estimate,
        caller: &Identity,
        reason: &str,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.commit(estimate, "reject", &caller.to_string(), correlation_id, |working| {
            let index = authorize_current(working, caller, "reject")?;
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(ApprovalError::EmptyReason);
            }

            let flow = current_flow_mut(working)?;
            if let Some(step) = flow.step_mut(index) {
                step.decision = StepDecision::Rejected { at: Utc::now(), reason: reason.to_string() };
            }

            let outcome =
                self.engine.apply(&working.status, &FlowEvent::StepRejected, &FlowContext::default())?;
            working.status = outcome.to;
            Ok(outcome.actions)
        })
    }

    pub fn cancel_submission(
        &self,
        estimate: &mut Estimate,
        mode: CancelMode,
        actor: &str,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.commit(estimate, "cancel", actor, correlation_id, |working| {
            let outcome = self
                .engine
                .apply(&working.status, &FlowEvent::Cancel, &FlowContext::default())
                .map_err(|error| ApprovalError::from_lifecycle(error, "cancel"))?;

            match mode {
                CancelMode::ClearDecisions => {
                    if let Some(flow) = working.approval_flow.as_mut() {
                        flow.reset_decisions();
                    }
                }
                CancelMode::DropFlow => working.approval_flow = None,
            }
            working.status = outcome.to;
            Ok(outcome.actions)
        })
    }

    /// Toggles the "requirement document reviewed" flag on a step owned by `caller`.
    /// Allowed whether or not that step is the current one.
    pub fn mark_requirement_reviewed(
        &self,
        estimate: &mut Estimate,
        caller: &Identity,
        step_index: usize,
        checked: bool,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.commit(estimate, "requirements_check", &caller.to_string(), correlation_id, |working| {
            let step = working
                .approval_flow
                .as_mut()
                .and_then(|flow| flow.step_mut(step_index))
                .ok_or(ApprovalError::StepNotFound { index: step_index })?;
            if !step.approver.matches(caller) {
                return Err(ApprovalError::Unauthorized);
            }

            step.requirements.checked = checked;
            step.requirements.checked_at = checked.then(Utc::now);
            Ok(Vec::new())
        })
    }

    fn commit<F>(
        &self,
        estimate: &mut Estimate,
        transition: &'static str,
        actor: &str,
        correlation_id: &str,
        apply: F,
    ) -> Result<ApprovalOutcome, ApprovalError>
    where
        F: FnOnce(&mut Estimate) -> Result<Vec<FlowAction>, ApprovalError>,
    {
        let from = estimate.status;
        let mut working = estimate.clone();
        let event_type = format!("estimate.approval.{transition}");

        match apply(&mut working) {
            Ok(actions) => {
                working.updated_at = Utc::now();
                let audit = AuditEvent::new(
                    Some(working.id),
                    correlation_id,
                    event_type,
                    AuditCategory::Approval,
                    actor,
                    AuditOutcome::Success,
                )
                .with_metadata("from", from.as_str())
                .with_metadata("to", working.status.as_str());
                let outcome = ApprovalOutcome::from_estimate(&working, actions, audit);
                *estimate = working;
                Ok(outcome)
            }
            Err(error) => {
                self.sink.emit(
                    AuditEvent::new(
                        Some(estimate.id),
                        correlation_id,
                        event_type,
                        AuditCategory::Approval,
                        actor,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("status", from.as_str())
                    .with_metadata("error_kind", error.kind())
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }
}

/// The current step index, once the caller is confirmed as its approver.
fn authorize_current(
    estimate: &Estimate,
    caller: &Identity,
    operation: &'static str,
) -> Result<usize, ApprovalError> {
    let flow = estimate
        .approval_flow
        .as_ref()
        .filter(|flow| !flow.is_halted())
        .ok_or(ApprovalError::NoCurrentStep)?;
    let index = flow.current_index().ok_or(ApprovalError::NoCurrentStep)?;

    if estimate.status != EstimateStatus::Pending {
        return Err(ApprovalError::InvalidState { status: estimate.status, operation });
    }

    let is_caller = flow.steps().get(index).map(|step| step.approver.matches(caller));
    if is_caller != Some(true) {
        return Err(ApprovalError::Unauthorized);
    }
    Ok(index)
}

fn current_flow_mut(estimate: &mut Estimate) -> Result<&mut ApprovalFlow, ApprovalError> {
    estimate.approval_flow.as_mut().ok_or(ApprovalError::NoCurrentStep)
}
