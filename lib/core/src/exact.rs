//! Exact matcher
//!
//! Pairs rows whose normalized values are equal. Pairing within a value
//! group follows original ordinal order on both sides; whatever is left over
//! on the longer side falls through to fuzzy resolution.

use crate::normalize::{normalize, NormalizeOptions, NormalizedValue};
use crate::record::MatchRecord;
use crate::row::Row;
use ahash::AHashMap;
use std::collections::VecDeque;

/// Exact matches plus the rows left for fuzzy resolution
#[derive(Debug, Clone, Default)]
pub struct ExactOutcome {
    /// In A-ordinal order
    pub matches: Vec<MatchRecord>,
    pub remainder_a: Vec<Row>,
    pub remainder_b: Vec<Row>,
}

pub fn exact_match(a: Vec<Row>, b: Vec<Row>, opts: &NormalizeOptions) -> ExactOutcome {
    // normalized B value -> queue of B positions, ordinal order
    let mut index: AHashMap<NormalizedValue, VecDeque<usize>> = AHashMap::with_capacity(b.len());
    for (pos, row) in b.iter().enumerate() {
        let key = normalize(&row.value, opts);
        if !key.is_empty() {
            index.entry(key).or_default().push_back(pos);
        }
    }

    let mut b_slots: Vec<Option<Row>> = b.into_iter().map(Some).collect();
    let mut matches = Vec::new();
    let mut remainder_a = Vec::new();

    for row in a {
        let key = normalize(&row.value, opts);
        let partner = if key.is_empty() {
            None
        } else {
            index.get_mut(&key).and_then(|queue| queue.pop_front())
        };

        match partner.and_then(|pos| b_slots[pos].take()) {
            Some(b_row) => matches.push(MatchRecord::exact(row, b_row)),
            None => remainder_a.push(row),
        }
    }

    let remainder_b: Vec<Row> = b_slots.into_iter().flatten().collect();

    tracing::debug!(
        exact = matches.len(),
        remainder_a = remainder_a.len(),
        remainder_b = remainder_b.len(),
        "exact matching finished"
    );

    ExactOutcome {
        matches,
        remainder_a,
        remainder_b,
    }
}
