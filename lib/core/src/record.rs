use crate::row::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of a [`MatchRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Unmatched,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final output unit: a matched pair or a single unmatched row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub a: Option<Row>,
    pub b: Option<Row>,
    pub match_type: MatchType,
    pub score: Option<f32>,
}

impl MatchRecord {
    pub fn exact(a: Row, b: Row) -> Self {
        Self {
            a: Some(a),
            b: Some(b),
            match_type: MatchType::Exact,
            score: Some(1.0),
        }
    }

    pub fn fuzzy(a: Row, b: Row, score: f32) -> Self {
        Self {
            a: Some(a),
            b: Some(b),
            match_type: MatchType::Fuzzy,
            score: Some(score),
        }
    }

    /// An unmatched row, placed on the side its column says
    pub fn unmatched(row: Row) -> Self {
        let (a, b) = match row.column {
            crate::Column::A => (Some(row), None),
            crate::Column::B => (None, Some(row)),
        };
        Self {
            a,
            b,
            match_type: MatchType::Unmatched,
            score: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.match_type != MatchType::Unmatched
    }
}
