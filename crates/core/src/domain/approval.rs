use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::identity::{ApproverRef, Identity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum StepDecision {
    Pending,
    Approved { at: DateTime<Utc> },
    Rejected { at: DateTime<Utc>, reason: String },
}

impl StepDecision {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementCheck {
    pub checked: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub approver: ApproverRef,
    pub name: String,
    pub decision: StepDecision,
    pub requirements: RequirementCheck,
}

impl ApprovalStep {
    pub fn new(approver: ApproverRef, name: impl Into<String>) -> Self {
        Self {
            approver,
            name: name.into(),
            decision: StepDecision::Pending,
            requirements: RequirementCheck::default(),
        }
    }
}

/// Approver chosen when submitting an estimate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepDraft {
    pub id: ApproverRef,
    pub name: String,
}

/// Result of scanning a flow for the step awaiting a decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CurrentStep {
    pub current_index: Option<usize>,
    pub is_caller_current: bool,
    pub waiting_on_name: Option<String>,
}

/// Ordered approvers attached to one estimate.
///
/// Stored as the legacy JSON array of step objects; see [`ApprovalStepRecord`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ApprovalStepRecord>", into = "Vec<ApprovalStepRecord>")]
pub struct ApprovalFlow {
    steps: Vec<ApprovalStep>,
}

impl ApprovalFlow {
    pub fn new(steps: Vec<ApprovalStep>) -> Self {
        Self { steps }
    }

    pub fn from_drafts(drafts: Vec<ApprovalStepDraft>) -> Self {
        Self::new(drafts.into_iter().map(|draft| ApprovalStep::new(draft.id, draft.name)).collect())
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the first step without a decision.
    pub fn current_index(&self) -> Option<usize> {
        self.steps.iter().position(|step| step.decision.is_pending())
    }

    /// Index of the step that rejected the estimate, if any. Processing stops there.
    pub fn rejected_index(&self) -> Option<usize> {
        self.steps.iter().position(|step| step.decision.is_rejected())
    }

    pub fn is_halted(&self) -> bool {
        self.rejected_index().is_some()
    }

    /// True when the flow has steps and every one of them approved.
    pub fn is_fully_approved(&self) -> bool {
        !self.steps.is_empty()
            && self.steps.iter().all(|step| matches!(step.decision, StepDecision::Approved { .. }))
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.current_index().and_then(|index| self.steps.get(index))
    }

    pub fn resolve(&self, caller: &Identity) -> CurrentStep {
        let current_index = self.current_index();
        let current = current_index.and_then(|index| self.steps.get(index));

        CurrentStep {
            current_index,
            is_caller_current: current.map(|step| step.approver.matches(caller)).unwrap_or(false),
            waiting_on_name: current.map(|step| step.name.clone()),
        }
    }

    /// Steps whose approver is the caller, in flow order.
    pub fn steps_for(&self, caller: &Identity) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.approver.matches(caller))
            .map(|(index, _)| index)
            .collect()
    }

    /// Clears every decision and requirement check, keeping the approvers.
    pub fn reset_decisions(&mut self) {
        for step in &mut self.steps {
            step.decision = StepDecision::Pending;
            step.requirements = RequirementCheck::default();
        }
    }

    pub(crate) fn step_mut(&mut self, index: usize) -> Option<&mut ApprovalStep> {
        self.steps.get_mut(index)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowDecodeError {
    #[error("step {index}: unreadable {field} timestamp `{value}`")]
    Timestamp { index: usize, field: &'static str, value: String },
}

/// Persisted shape of one approval step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepRecord {
    pub id: ApproverRef,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, deserialize_with = "loose_bool", skip_serializing_if = "Option::is_none")]
    pub requirements_checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_checked_at: Option<String>,
}

impl TryFrom<Vec<ApprovalStepRecord>> for ApprovalFlow {
    type Error = FlowDecodeError;

    fn try_from(records: Vec<ApprovalStepRecord>) -> Result<Self, Self::Error> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| step_from_record(index, record))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

impl From<ApprovalFlow> for Vec<ApprovalStepRecord> {
    fn from(flow: ApprovalFlow) -> Self {
        flow.steps.into_iter().map(record_from_step).collect()
    }
}

fn step_from_record(
    index: usize,
    record: ApprovalStepRecord,
) -> Result<ApprovalStep, FlowDecodeError> {
    let approved_at = decode_timestamp(index, "approved_at", record.approved_at)?;
    let rejected_at = decode_timestamp(index, "rejected_at", record.rejected_at)?;
    let checked_at =
        decode_timestamp(index, "requirements_checked_at", record.requirements_checked_at)?;

    let decision = match (rejected_at, approved_at) {
        (Some(at), _) => {
            StepDecision::Rejected { at, reason: record.rejection_reason.unwrap_or_default() }
        }
        (None, Some(at)) => StepDecision::Approved { at },
        (None, None) => StepDecision::Pending,
    };

    Ok(ApprovalStep {
        approver: record.id,
        name: record.name,
        decision,
        requirements: RequirementCheck {
            checked: record.requirements_checked.unwrap_or(false),
            checked_at,
        },
    })
}

fn record_from_step(step: ApprovalStep) -> ApprovalStepRecord {
    let (approved_at, rejected_at, rejection_reason) = match step.decision {
        StepDecision::Pending => (None, None, None),
        StepDecision::Approved { at } => (Some(at.to_rfc3339()), None, None),
        StepDecision::Rejected { at, reason } => (None, Some(at.to_rfc3339()), Some(reason)),
    };
    let requirements_checked =
        (step.requirements.checked || step.requirements.checked_at.is_some())
            .then_some(step.requirements.checked);

    ApprovalStepRecord {
        id: step.approver,
        name: step.name,
        approved_at,
        rejected_at,
        rejection_reason,
        requirements_checked,
        requirements_checked_at: step.requirements.checked_at.map(|at| at.to_rfc3339()),
    }
}

/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS` form (read as UTC).
/// Blank values are treated as absent.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn decode_timestamp(
    index: usize,
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, FlowDecodeError> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or(FlowDecodeError::Timestamp { index, field, value: raw }),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::Number(number)) => Some(number.as_i64().map(|n| n != 0).unwrap_or(false)),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "1" | "true" | "yes" | "on" => Some(true),
            _ => Some(false),
        },
        Some(_) => Some(false),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ApprovalFlow, ApprovalStep, StepDecision};
    use crate::domain::identity::{ApproverRef, Identity};

    fn two_step_flow() -> ApprovalFlow {
        ApprovalFlow::new(vec![
            ApprovalStep::new(ApproverRef::Local(1), "A"),
            ApprovalStep::new(ApproverRef::Local(2), "B"),
        ])
    }

    #[test]
    fn current_index_is_first_undecided_step() {
        let mut flow = two_step_flow();
        assert_eq!(flow.current_index(), Some(0));

        flow.steps[0].decision = StepDecision::Approved { at: Utc::now() };
        assert_eq!(flow.current_index(), Some(1));

        flow.steps[1].decision = StepDecision::Approved { at: Utc::now() };
        assert_eq!(flow.current_index(), None);
        assert!(flow.is_fully_approved());
    }

    #[test]
    fn empty_flow_has_no_current_step() {
        let flow = ApprovalFlow::default();
        assert_eq!(flow.current_index(), None);
        assert!(!flow.is_fully_approved());
    }

    #[test]
    fn resolve_reports_waiting_name_and_caller_match() {
        let flow = two_step_flow();

        let first = flow.resolve(&Identity::LocalId { id: 1 });
        assert_eq!(first.current_index, Some(0));
        assert!(first.is_caller_current);
        assert_eq!(first.waiting_on_name.as_deref(), Some("A"));

        let second = flow.resolve(&Identity::LocalId { id: 2 });
        assert!(!second.is_caller_current);
    }

    #[test]
    fn decodes_legacy_shape_with_blank_and_null_fields() {
        let raw = r#"[
            {"id": 1, "name": "A", "approved_at": "2025-04-01 09:30:00", "rejected_at": ""},
            {"id": "ext-77", "name": null, "approved_at": null, "requirements_checked": "1",
             "requirements_checked_at": "2025-04-02T10:00:00+09:00"},
            {"id": "3", "name": "C"}
        ]"#;

        let flow = ApprovalFlow::from_json(raw).expect("legacy flow should decode");
        assert_eq!(flow.len(), 3);
        assert_eq!(
            flow.steps()[0].decision,
            StepDecision::Approved { at: Utc.with_ymd_and_hms(2025, 4, 1, 9, 30, 0).unwrap() }
        );
        assert_eq!(flow.steps()[1].approver, ApproverRef::External("ext-77".to_string()));
        assert_eq!(flow.steps()[1].name, "");
        assert!(flow.steps()[1].requirements.checked);
        assert_eq!(
            flow.steps()[1].requirements.checked_at,
            Some(Utc.with_ymd_and_hms(2025, 4, 2, 1, 0, 0).unwrap())
        );
        assert_eq!(flow.current_index(), Some(1));
    }

    #[test]
    fn rejected_timestamp_takes_precedence() {
        let raw = r#"[{"id": 1, "name": "A", "approved_at": "2025-04-01 09:30:00",
                       "rejected_at": "2025-04-01 10:00:00", "rejection_reason": "price"}]"#;
        let flow = ApprovalFlow::from_json(raw).expect("decode");
        assert!(matches!(
            &flow.steps()[0].decision,
            StepDecision::Rejected { reason, .. } if reason == "price"
        ));
        assert_eq!(flow.rejected_index(), Some(0));
        assert!(flow.is_halted());
    }

    #[test]
    fn unreadable_timestamp_is_a_decode_error() {
        let raw = r#"[{"id": 1, "name": "A", "approved_at": "yesterday"}]"#;
        assert!(ApprovalFlow::from_json(raw).is_err());
    }

    #[test]
    fn persisted_round_trip_preserves_current_index() {
        let mut flow = two_step_flow();
        flow.steps[0].decision = StepDecision::Approved { at: Utc::now() };
        flow.steps[1].requirements.checked = true;
        flow.steps[1].requirements.checked_at = Some(Utc::now());

        let json = flow.to_json().expect("encode");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value[0]["id"], 1);
        assert!(value[0]["approved_at"].is_string());
        assert!(value[1].get("approved_at").is_none());

        let decoded = ApprovalFlow::from_json(&json).expect("decode");
        assert_eq!(decoded.current_index(), flow.current_index());
        assert!(decoded.steps()[1].requirements.checked);
    }

    #[test]
    fn reset_clears_decisions_and_checks() {
        let mut flow = two_step_flow();
        flow.steps[0].decision = StepDecision::Rejected { at: Utc::now(), reason: "no".into() };
        flow.steps[0].requirements.checked = true;

        flow.reset_decisions();

        assert_eq!(flow.current_index(), Some(0));
        assert!(!flow.is_halted());
        assert!(!flow.steps()[0].requirements.checked);
    }
}
