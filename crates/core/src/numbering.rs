//! Human-readable document numbers: `{KIND}-{staff}-{client}-{yyMMdd}-{seq}`.

use std::fmt;

use chrono::NaiveDate;

/// Everything in a document number except the trailing sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentNumberPrefix(String);

impl DocumentNumberPrefix {
    pub fn new(kind: &str, staff_code: &str, client_code: &str, date: NaiveDate) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            component(kind),
            component(staff_code),
            component(client_code),
            date.format("%y%m%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence part of `number` when it was issued under this prefix.
    pub fn sequence_of(&self, number: &str) -> Option<u32> {
        let rest = number.strip_prefix(self.0.as_str())?.strip_prefix('-')?;
        if rest.is_empty() || !rest.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for DocumentNumberPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        "X".to_string()
    } else {
        cleaned
    }
}

/// One past the highest sequence already used under `prefix`, padded to three digits.
///
/// Numbers with another prefix or an unparseable sequence are ignored. Callers must
/// still rely on the unique index on the number column when writers race.
pub fn next_document_number<'a, I>(prefix: &DocumentNumberPrefix, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let next = existing
        .into_iter()
        .filter_map(|number| prefix.sequence_of(number))
        .max()
        .map(|highest| highest.saturating_add(1))
        .unwrap_or(1);
    format!("{prefix}-{next:03}")
}
