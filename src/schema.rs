//! Pipeline data model: document types, extracted fields, decisions and the
//! flat result record returned to callers.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Sentinel written to `explainability_map` when no artifact was produced.
pub const NO_ARTIFACT: &str = "N/A";

/// Coarse document type assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Resume,
    Report,
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Resume => "resume",
            Self::Report => "report",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a single extracted field.
///
/// `Missing` means the pattern did not match at all, which is different from
/// a label that matched with nothing after it (`Text("")`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Missing,
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list value; a scalar counts as a one-item list.
    pub fn items(&self) -> Vec<&str> {
        match self {
            Self::Missing => Vec::new(),
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(Self::Text).unwrap_or(Self::Missing)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("not found"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Ordered field name → value mapping. Keeps insertion (schema) order so
/// serialized output and overlay rows are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    entries: Vec<(String, FieldValue)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing the value in place if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of fields holding an actual value.
    pub fn found_count(&self) -> usize {
        self.entries.iter().filter(|(_, v)| !v.is_missing()).count()
    }
}

#[cfg(test)]
impl<K: Into<String>> FromIterator<(K, FieldValue)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Outcome label produced by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionLabel {
    Approved,
    Rejected,
    #[serde(rename = "Needs Review")]
    NeedsReview,
    Shortlisted,
    Analyzed,
}

impl DecisionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::NeedsReview => "Needs Review",
            Self::Shortlisted => "Shortlisted",
            Self::Analyzed => "Analyzed",
        }
    }
}

impl fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision label with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub label: DecisionLabel,
    pub confidence: f64,
}

impl Decision {
    pub const fn new(label: DecisionLabel, confidence: f64) -> Self {
        Self { label, confidence }
    }

    /// Used for every case the rules do not cover.
    pub const fn fallback() -> Self {
        Self::new(DecisionLabel::NeedsReview, 0.75)
    }
}

/// Final pipeline output for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub document_type: DocumentType,
    pub fields: FieldSet,
    pub decision: Decision,
    /// Caller-relative artifact reference, `None` when rendering failed.
    pub explainability: Option<String>,
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("ResultRecord", 5)?;
        record.serialize_field("document_type", &self.document_type)?;
        record.serialize_field("fields_extracted", &self.fields)?;
        record.serialize_field("decision", &self.decision.label)?;
        record.serialize_field("confidence_score", &self.decision.confidence)?;
        record.serialize_field(
            "explainability_map",
            self.explainability.as_deref().unwrap_or(NO_ARTIFACT),
        )?;
        record.end()
    }
}
