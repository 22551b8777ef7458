use serde::{Deserialize, Serialize};

use crate::domain::estimate::EstimateStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    Submit,
    StepApproved,
    FinalApproval,
    StepRejected,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    NotifyNextApprover,
    NotifyRequester,
    MarkSent,
    EnableInvoiceConversion,
    ClearApprovalState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: EstimateStatus,
    pub to: EstimateStatus,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
