//! Determiner tuples: the identifying key of one ingestible unit
//!
//! Determiners are ordered from least to most specific (for example
//! `visit`, `raft`, `sensor`). A later determiner is only meaningful once
//! every earlier one is fixed, so partial keys are always leading prefixes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a determiner's captured text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeterminerKind {
    /// Parsed as a 64-bit integer, stored as Bigint
    Int,
    /// Kept verbatim, stored as Text
    #[default]
    Text,
}

impl DeterminerKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            DeterminerKind::Int => "Bigint",
            DeterminerKind::Text => "Text",
        }
    }

    /// Interpret captured path text according to this kind.
    pub fn parse(self, raw: &str) -> Option<DeterminerValue> {
        match self {
            DeterminerKind::Int => raw.parse().ok().map(DeterminerValue::Int),
            DeterminerKind::Text => Some(DeterminerValue::Text(raw.to_string())),
        }
    }
}

/// One determiner value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeterminerValue {
    Int(i64),
    Text(String),
}

impl DeterminerValue {
    pub fn kind(&self) -> DeterminerKind {
        match self {
            DeterminerValue::Int(_) => DeterminerKind::Int,
            DeterminerValue::Text(_) => DeterminerKind::Text,
        }
    }
}

impl fmt::Display for DeterminerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeterminerValue::Int(v) => write!(f, "{}", v),
            DeterminerValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for DeterminerValue {
    fn from(v: i64) -> Self {
        DeterminerValue::Int(v)
    }
}

impl From<i32> for DeterminerValue {
    fn from(v: i32) -> Self {
        DeterminerValue::Int(i64::from(v))
    }
}

impl From<&str> for DeterminerValue {
    fn from(v: &str) -> Self {
        DeterminerValue::Text(v.to_string())
    }
}

impl From<String> for DeterminerValue {
    fn from(v: String) -> Self {
        DeterminerValue::Text(v)
    }
}

/// Ordered determiner tuple, e.g. `(visit=210472, raft=01, sensor=20)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Determiners {
    entries: Vec<(String, DeterminerValue)>,
}

impl Determiners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next, more specific determiner.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DeterminerValue>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: DeterminerValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&DeterminerValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeterminerValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `self` is a leading prefix of `full`, name for name and
    /// value for value.
    pub fn is_prefix_of(&self, full: &Determiners) -> bool {
        self.entries.len() <= full.entries.len()
            && self
                .entries
                .iter()
                .zip(full.entries.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for Determiners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching() {
        let full = Determiners::new()
            .with("visit", 210472)
            .with("raft", "01")
            .with("sensor", "20");
        let unit = Determiners::new().with("visit", 210472);
        let other = Determiners::new().with("visit", 210473);
        let skipped = Determiners::new().with("raft", "01");

        assert!(unit.is_prefix_of(&full));
        assert!(full.is_prefix_of(&full));
        assert!(Determiners::new().is_prefix_of(&full));
        assert!(!other.is_prefix_of(&full));
        assert!(!skipped.is_prefix_of(&full));
        assert!(!full.is_prefix_of(&unit));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            DeterminerKind::Int.parse("00210472"),
            Some(DeterminerValue::Int(210472))
        );
        assert_eq!(DeterminerKind::Int.parse("R01"), None);
        assert_eq!(
            DeterminerKind::Text.parse("01"),
            Some(DeterminerValue::Text("01".to_string()))
        );
    }

    #[test]
    fn test_display() {
        let d = Determiners::new().with("visit", 5).with("raft", "22");
        assert_eq!(d.to_string(), "visit=5, raft=22");
    }
}
