use thiserror::Error;

use crate::domain::estimate::EstimateStatus;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn transition(
        &self,
        current: &EstimateStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct SequentialApprovalFlow;

impl FlowDefinition for SequentialApprovalFlow {
    fn transition(
        &self,
        current: &EstimateStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_sequential(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn apply(
        &self,
        current: &EstimateStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<SequentialApprovalFlow> {
    fn default() -> Self {
        Self::new(SequentialApprovalFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state}: {missing_fields:?}")]
    MissingRequiredFields { state: EstimateStatus, missing_fields: Vec<String> },
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: EstimateStatus, event: FlowEvent },
}

fn transition_sequential(
    current: &EstimateStatus,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use EstimateStatus::{Draft, Pending, Rejected, Sent};
    use FlowAction::{
        ClearApprovalState, EnableInvoiceConversion, MarkSent, NotifyNextApprover,
        NotifyRequester,
    };
    use FlowEvent::{Cancel, FinalApproval, StepApproved, StepRejected, Submit};

    let (to, actions) = match (current, event) {
        (Draft, Submit) | (Rejected, Submit) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: *current,
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (Pending, vec![NotifyNextApprover])
        }
        (Pending, StepApproved) => (Pending, vec![NotifyNextApprover]),
        (Pending, FinalApproval) => (Sent, vec![MarkSent, EnableInvoiceConversion, NotifyRequester]),
        (Pending, StepRejected) => (Rejected, vec![NotifyRequester]),
        (Pending, Cancel) => (Draft, vec![ClearApprovalState]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            })
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::domain::estimate::EstimateStatus;
    use crate::flows::engine::{FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent};

    #[test]
    fn submit_moves_draft_and_rejected_into_pending() {
        let engine = FlowEngine::default();
        for from in [EstimateStatus::Draft, EstimateStatus::Rejected] {
            let outcome =
                engine.apply(&from, &FlowEvent::Submit, &FlowContext::default()).expect("submit");
            assert_eq!(outcome.to, EstimateStatus::Pending);
            assert_eq!(outcome.actions, vec![FlowAction::NotifyNextApprover]);
        }
    }

    #[test]
    fn submit_with_missing_fields_is_refused() {
        let engine = FlowEngine::default();
        let context = FlowContext { missing_required_fields: vec!["title".to_string()] };
        let error = engine
            .apply(&EstimateStatus::Draft, &FlowEvent::Submit, &context)
            .expect_err("missing title");
        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn final_approval_sends_and_rejection_rejects() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        let sent = engine
            .apply(&EstimateStatus::Pending, &FlowEvent::FinalApproval, &context)
            .expect("final approval");
        assert_eq!(sent.to, EstimateStatus::Sent);
        assert!(sent.actions.contains(&FlowAction::EnableInvoiceConversion));

        let rejected = engine
            .apply(&EstimateStatus::Pending, &FlowEvent::StepRejected, &context)
            .expect("rejection");
        assert_eq!(rejected.to, EstimateStatus::Rejected);

        let stays = engine
            .apply(&EstimateStatus::Pending, &FlowEvent::StepApproved, &context)
            .expect("intermediate approval");
        assert_eq!(stays.to, EstimateStatus::Pending);
    }

    #[test]
    fn events_outside_pending_are_invalid() {
        let engine = FlowEngine::default();
        for (state, event) in [
            (EstimateStatus::Sent, FlowEvent::StepApproved),
            (EstimateStatus::Draft, FlowEvent::Cancel),
            (EstimateStatus::Rejected, FlowEvent::StepRejected),
            (EstimateStatus::Pending, FlowEvent::Submit),
        ] {
            let error = engine
                .apply(&state, &event, &FlowContext::default())
                .expect_err("transition should be refused");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        }
    }
}
