use serde::{Deserialize, Serialize};

use crate::domain::estimate::{Estimate, EstimateStatus};
use crate::domain::identity::Identity;

/// UI actions a caller may take on an estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateAction {
    Edit,
    Submit,
    Cancel,
    Approve,
    Reject,
    CheckRequirements,
    ConvertToInvoice,
    Duplicate,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusProjection {
    pub status: EstimateStatus,
    pub current_index: Option<usize>,
    pub waiting_on_name: Option<String>,
    pub is_caller_current: bool,
    pub actions: Vec<EstimateAction>,
}

/// Reconciles the stored status with the approval flow and lists what `caller` may do.
///
/// A pending estimate whose flow is fully approved reads as `sent`, one whose flow
/// holds a rejection reads as `rejected`. Halted flows expose no current step.
pub fn project_status(estimate: &Estimate, caller: Option<&Identity>) -> StatusProjection {
    let flow = estimate.approval_flow.as_ref();
    let halted = flow.map(|flow| flow.is_halted()).unwrap_or(false);
    let fully_approved = flow.map(|flow| flow.is_fully_approved()).unwrap_or(false);

    let status = match estimate.status {
        EstimateStatus::Pending if halted => EstimateStatus::Rejected,
        EstimateStatus::Pending if fully_approved => EstimateStatus::Sent,
        other => other,
    };

    let current = match (status, flow) {
        (EstimateStatus::Pending, Some(flow)) => {
            flow.current_index().and_then(|index| flow.steps().get(index).map(|step| (index, step)))
        }
        _ => None,
    };
    let is_caller_current = match (current, caller) {
        (Some((_, step)), Some(caller)) => step.approver.matches(caller),
        _ => false,
    };
    let owns_a_step = match (flow, caller) {
        (Some(flow), Some(caller)) => !flow.steps_for(caller).is_empty(),
        _ => false,
    };

    let mut actions = Vec::new();
    if status.is_editable() {
        actions.extend([EstimateAction::Edit, EstimateAction::Submit]);
    }
    if status == EstimateStatus::Pending {
        actions.push(EstimateAction::Cancel);
        if is_caller_current {
            actions.extend([EstimateAction::Approve, EstimateAction::Reject]);
        }
    }
    if owns_a_step {
        actions.push(EstimateAction::CheckRequirements);
    }
    if status == EstimateStatus::Sent {
        actions.push(EstimateAction::ConvertToInvoice);
    }
    actions.push(EstimateAction::Duplicate);
    if status.is_editable() {
        actions.push(EstimateAction::Delete);
    }

    StatusProjection {
        status,
        current_index: current.map(|(index, _)| index),
        waiting_on_name: current.map(|(_, step)| step.name.clone()),
        is_caller_current,
        actions,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{project_status, EstimateAction};
    use crate::domain::approval::{ApprovalFlow, ApprovalStep, StepDecision};
    use crate::domain::estimate::{Estimate, EstimateStatus};
    use crate::domain::identity::{ApproverRef, Identity};

    fn pending_with(steps: Vec<ApprovalStep>) -> Estimate {
        let mut estimate = Estimate::new_draft("株式会社サンプル", "保守契約");
        estimate.status = EstimateStatus::Pending;
        estimate.approval_flow = Some(ApprovalFlow::new(steps));
        estimate
    }

    #[test]
    fn current_approver_gets_approve_and_reject() {
        let estimate = pending_with(vec![
            ApprovalStep::new(ApproverRef::Local(1), "A"),
            ApprovalStep::new(ApproverRef::Local(2), "B"),
        ]);

        let first = project_status(&estimate, Some(&Identity::LocalId { id: 1 }));
        assert_eq!(first.status, EstimateStatus::Pending);
        assert_eq!(first.current_index, Some(0));
        assert_eq!(first.waiting_on_name.as_deref(), Some("A"));
        assert!(first.actions.contains(&EstimateAction::Approve));

        let second = project_status(&estimate, Some(&Identity::LocalId { id: 2 }));
        assert!(!second.is_caller_current);
        assert!(!second.actions.contains(&EstimateAction::Approve));
        assert!(second.actions.contains(&EstimateAction::CheckRequirements));
    }

    #[test]
    fn pending_with_rejection_reads_as_rejected_without_current_step() {
        let mut rejected = ApprovalStep::new(ApproverRef::Local(1), "A");
        rejected.decision = StepDecision::Rejected { at: Utc::now(), reason: "予算不足".into() };
        let estimate = pending_with(vec![rejected, ApprovalStep::new(ApproverRef::Local(2), "B")]);

        let projection = project_status(&estimate, Some(&Identity::LocalId { id: 2 }));
        assert_eq!(projection.status, EstimateStatus::Rejected);
        assert_eq!(projection.current_index, None);
        assert!(projection.actions.contains(&EstimateAction::Edit));
    }

    #[test]
    fn fully_approved_reads_as_sent_and_offers_invoice_conversion() {
        let mut approved = ApprovalStep::new(ApproverRef::Local(1), "A");
        approved.decision = StepDecision::Approved { at: Utc::now() };
        let estimate = pending_with(vec![approved]);

        let projection = project_status(&estimate, None);
        assert_eq!(projection.status, EstimateStatus::Sent);
        assert!(projection.actions.contains(&EstimateAction::ConvertToInvoice));
        assert!(!projection.actions.contains(&EstimateAction::Delete));
    }

    #[test]
    fn draft_without_flow_is_editable() {
        let estimate = Estimate::new_draft("顧客", "件名");
        let projection = project_status(&estimate, None);
        assert_eq!(
            projection.actions,
            vec![
                EstimateAction::Edit,
                EstimateAction::Submit,
                EstimateAction::Duplicate,
                EstimateAction::Delete
            ]
        );
    }
}
