use std::fmt;

use serde::{Deserialize, Serialize};

/// Who is acting, as supplied by the authentication layer.
///
/// Users can be known locally (numeric id from our own user table), by an
/// id issued by the external user directory, or both.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    LocalId { id: i64 },
    ExternalId { id: String },
    Both { local_id: i64, external_id: String },
}

impl Identity {
    /// Builds an identity from the two optional identifiers carried by a request.
    /// Blank external ids are treated as missing.
    pub fn from_parts(local_id: Option<i64>, external_id: Option<String>) -> Option<Self> {
        let external_id =
            external_id.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        match (local_id, external_id) {
            (Some(local_id), Some(external_id)) => Some(Self::Both { local_id, external_id }),
            (Some(id), None) => Some(Self::LocalId { id }),
            (None, Some(id)) => Some(Self::ExternalId { id }),
            (None, None) => None,
        }
    }

    pub fn local_id(&self) -> Option<i64> {
        match self {
            Self::LocalId { id } => Some(*id),
            Self::Both { local_id, .. } => Some(*local_id),
            Self::ExternalId { .. } => None,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::ExternalId { id } => Some(id),
            Self::Both { external_id, .. } => Some(external_id),
            Self::LocalId { .. } => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalId { id } => write!(f, "local:{id}"),
            Self::ExternalId { id } => write!(f, "external:{id}"),
            Self::Both { local_id, external_id } => {
                write!(f, "local:{local_id}/external:{external_id}")
            }
        }
    }
}

/// The approver identifier stored on an approval step.
///
/// JSON numbers decode as local user ids, JSON strings as external directory ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApproverRef {
    Local(i64),
    External(String),
}

impl ApproverRef {
    /// The identifier interpreted as a string, regardless of how it was stored.
    pub fn as_text(&self) -> String {
        match self {
            Self::Local(id) => id.to_string(),
            Self::External(id) => id.clone(),
        }
    }

    /// The identifier interpreted as a local numeric id, when it is one.
    pub fn as_local_id(&self) -> Option<i64> {
        match self {
            Self::Local(id) => Some(*id),
            Self::External(id) => {
                let trimmed = id.trim();
                if !trimmed.is_empty() && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
                    trimmed.parse().ok()
                } else {
                    None
                }
            }
        }
    }

    /// External ids are compared first. A caller that carries an external id only
    /// falls back to its local id for refs stored as numbers, so numeric-looking
    /// directory ids never collide with local user ids.
    pub fn matches(&self, identity: &Identity) -> bool {
        match identity {
            Identity::ExternalId { id } => self.as_text() == *id,
            Identity::LocalId { id } => self.as_local_id() == Some(*id),
            Identity::Both { local_id, external_id } => {
                if self.as_text() == *external_id {
                    return true;
                }
                matches!(self, Self::Local(stored) if stored == local_id)
            }
        }
    }
}

impl fmt::Display for ApproverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::{ApproverRef, Identity};

    #[test]
    fn from_parts_drops_blank_external_ids() {
        assert_eq!(
            Identity::from_parts(Some(3), Some("  ".to_string())),
            Some(Identity::LocalId { id: 3 })
        );
        assert_eq!(Identity::from_parts(None, Some(String::new())), None);
        assert_eq!(
            Identity::from_parts(Some(3), Some(" u-9 ".to_string())),
            Some(Identity::Both { local_id: 3, external_id: "u-9".to_string() })
        );
    }

    #[test]
    fn local_caller_matches_numeric_and_digit_string_refs() {
        let caller = Identity::LocalId { id: 12 };
        assert!(ApproverRef::Local(12).matches(&caller));
        assert!(ApproverRef::External("12".to_string()).matches(&caller));
        assert!(!ApproverRef::External("12a".to_string()).matches(&caller));
        assert!(!ApproverRef::Local(13).matches(&caller));
    }

    #[test]
    fn external_caller_compares_string_forms() {
        let caller = Identity::ExternalId { id: "abc-1".to_string() };
        assert!(ApproverRef::External("abc-1".to_string()).matches(&caller));
        assert!(!ApproverRef::External("abc-2".to_string()).matches(&caller));

        let numeric = Identity::ExternalId { id: "42".to_string() };
        assert!(ApproverRef::Local(42).matches(&numeric));
    }

    #[test]
    fn external_id_wins_over_colliding_local_id() {
        let step = ApproverRef::External("42".to_string());

        let owner = Identity::Both { local_id: 7, external_id: "42".to_string() };
        assert!(step.matches(&owner));

        let colliding = Identity::Both { local_id: 42, external_id: "zz-9".to_string() };
        assert!(!step.matches(&colliding), "local id must not claim an external-id step");
    }

    #[test]
    fn both_caller_still_matches_numeric_local_refs() {
        let caller = Identity::Both { local_id: 5, external_id: "ext-5".to_string() };
        assert!(ApproverRef::Local(5).matches(&caller));
    }

    #[test]
    fn approver_ref_decodes_numbers_and_strings() {
        let local: ApproverRef = serde_json::from_str("7").expect("number");
        let external: ApproverRef = serde_json::from_str("\"7\"").expect("string");
        assert_eq!(local, ApproverRef::Local(7));
        assert_eq!(external, ApproverRef::External("7".to_string()));
    }
}
