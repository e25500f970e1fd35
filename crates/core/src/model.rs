use kursiyer_common::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

pub type SchoolId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassKey {
    #[serde(rename = "B")]
    B,
    #[serde(rename = "A1")]
    A1,
    #[serde(rename = "A2")]
    A2,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "FARK_A1")]
    FarkA1,
    #[serde(rename = "FARK_A2")]
    FarkA2,
    #[serde(rename = "BAKANLIK_A1")]
    BakanlikA1,
}

impl ClassKey {
    pub const ALL: [ClassKey; 8] = [
        ClassKey::B,
        ClassKey::A1,
        ClassKey::A2,
        ClassKey::C,
        ClassKey::D,
        ClassKey::FarkA1,
        ClassKey::FarkA2,
        ClassKey::BakanlikA1,
    ];

    pub const LICENSE: [ClassKey; 5] = [
        ClassKey::B,
        ClassKey::A1,
        ClassKey::A2,
        ClassKey::C,
        ClassKey::D,
    ];

    pub const DIFFERENCE: [ClassKey; 3] =
        [ClassKey::FarkA1, ClassKey::FarkA2, ClassKey::BakanlikA1];

    /// Key as stored in the document store.
    pub fn as_str(self) -> &'static str {
        match self {
            ClassKey::B => "B",
            ClassKey::A1 => "A1",
            ClassKey::A2 => "A2",
            ClassKey::C => "C",
            ClassKey::D => "D",
            ClassKey::FarkA1 => "FARK_A1",
            ClassKey::FarkA2 => "FARK_A2",
            ClassKey::BakanlikA1 => "BAKANLIK_A1",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ClassKey::B => "B Sınıfı",
            ClassKey::A1 => "A1 Sınıfı",
            ClassKey::A2 => "A2 Sınıfı",
            ClassKey::C => "C Sınıfı",
            ClassKey::D => "D Sınıfı",
            ClassKey::FarkA1 => "Fark A1",
            ClassKey::FarkA2 => "Fark A2",
            ClassKey::BakanlikA1 => "Bakanlık A1",
        }
    }

    /// Narrow column header: difference classes lose their `FARK_`/`BAKANLIK_` prefix.
    pub fn column_label(self) -> &'static str {
        match self {
            ClassKey::FarkA1 | ClassKey::BakanlikA1 => "A1",
            ClassKey::FarkA2 => "A2",
            other => other.as_str(),
        }
    }

    /// Exact match on the stored key. Store keys are case-sensitive; `FromStr` is the lenient
    /// parser for user input.
    pub fn from_stored(key: &str) -> Option<ClassKey> {
        ClassKey::ALL.into_iter().find(|class| class.as_str() == key)
    }

    pub fn is_difference(self) -> bool {
        Self::DIFFERENCE.contains(&self)
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ClassKey::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| SyncError::UnknownClass(s.to_string()))
    }
}

/// Candidate counts keyed by the raw class key string.
///
/// Keys outside [`ClassKey::ALL`] are kept as delivered so totals stay faithful to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidates(BTreeMap<String, u64>);

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, class: ClassKey) -> u64 {
        self.count_raw(class.as_str())
    }

    pub fn count_raw(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, class: ClassKey, count: u64) {
        self.0.insert(class.as_str().to_string(), count);
    }

    pub fn set_raw(&mut self, key: impl Into<String>, count: u64) {
        self.0.insert(key.into(), count);
    }

    /// Copy of `self` with `delta` applied to `class`, clamped at zero.
    pub fn with_delta(&self, class: ClassKey, delta: i64) -> Candidates {
        let current = self.count(class);
        let next = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        let mut updated = self.clone();
        updated.set(class, next);
        updated
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        Value::Object(map)
    }

    /// Lenient read of a stored candidates object. Negative numbers clamp to zero, fractions
    /// truncate, non-numeric entries are dropped.
    pub fn from_json(value: &Value) -> Candidates {
        let mut out = Candidates::new();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                warn!("candidates is not an object, treating as empty: {}", value);
            }
            return out;
        };
        for (key, raw) in obj {
            let count = if let Some(n) = raw.as_u64() {
                n
            } else if let Some(n) = raw.as_i64() {
                n.max(0) as u64
            } else if let Some(f) = raw.as_f64() {
                if f.is_finite() && f > 0.0 { f as u64 } else { 0 }
            } else {
                warn!("dropping non-numeric candidate count {}={}", key, raw);
                continue;
            };
            out.0.insert(key.clone(), count);
        }
        out
    }
}

impl FromIterator<(ClassKey, u64)> for Candidates {
    fn from_iter<I: IntoIterator<Item = (ClassKey, u64)>>(iter: I) -> Self {
        let mut out = Candidates::new();
        for (class, count) in iter {
            out.set(class, count);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    pub id: SchoolId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub candidates: Candidates,
}

impl School {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            candidates: Candidates::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Candidates) -> Self {
        self.candidates = candidates;
        self
    }

    /// Builds a school from a stored document; the id comes from the document key.
    pub fn from_document(id: &str, doc: &Value) -> School {
        let text = |field: &str| {
            doc.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        School {
            id: id.to_string(),
            name: text("name"),
            email: text("email"),
            candidates: doc
                .get("candidates")
                .map(Candidates::from_json)
                .unwrap_or_default(),
        }
    }

    /// Stored form, without the id (the id is the document key).
    pub fn to_document(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "email": self.email,
            "candidates": self.candidates.to_json(),
        })
    }
}
