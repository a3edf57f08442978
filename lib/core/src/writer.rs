//! Result writer
//!
//! Merges exact and fuzzy output into the final record order, checks the
//! coverage invariant, and serializes to CSV.

use crate::assign::Assignment;
use crate::record::{MatchRecord, MatchType};
use crate::row::{Row, RowId};
use crate::{Error, Result};
use ahash::AHashSet;

pub const MATCH_TYPE_HEADER: &str = "match_type";
pub const SCORE_HEADER: &str = "score";

/// Build the ordered record list.
///
/// Order: exact matches (A-ordinal order, as produced by the exact
/// matcher), fuzzy matches in resolution order, unmatched A rows by
/// ordinal, unmatched B rows by ordinal.
pub fn merge_records(
    exact: Vec<MatchRecord>,
    remainder_a: Vec<Row>,
    remainder_b: Vec<Row>,
    assignment: &Assignment,
) -> Result<Vec<MatchRecord>> {
    let total = exact.len() + remainder_a.len() + remainder_b.len();
    let mut records = Vec::with_capacity(total);
    records.extend(exact);

    let mut slots_a: Vec<Option<Row>> = remainder_a.into_iter().map(Some).collect();
    let mut slots_b: Vec<Option<Row>> = remainder_b.into_iter().map(Some).collect();

    for pair in &assignment.pairs {
        let a = take_slot(&mut slots_a, pair.a, "A")?;
        let b = take_slot(&mut slots_b, pair.b, "B")?;
        records.push(MatchRecord::fuzzy(a, b, pair.score));
    }
    for &i in &assignment.unmatched_a {
        records.push(MatchRecord::unmatched(take_slot(&mut slots_a, i, "A")?));
    }
    for &j in &assignment.unmatched_b {
        records.push(MatchRecord::unmatched(take_slot(&mut slots_b, j, "B")?));
    }

    if let Some(row) = slots_a.iter().chain(slots_b.iter()).flatten().next() {
        return Err(Error::InternalInvariant(format!(
            "row {} was never resolved",
            row.id()
        )));
    }
    Ok(records)
}

fn take_slot(slots: &mut [Option<Row>], idx: usize, side: &str) -> Result<Row> {
    slots
        .get_mut(idx)
        .and_then(Option::take)
        .ok_or_else(|| {
            Error::InternalInvariant(format!("remainder {} index {} missing or reused", side, idx))
        })
}

/// Every expected row appears in exactly one record, and nothing else does
pub fn verify_coverage<I>(records: &[MatchRecord], expected: I) -> Result<()>
where
    I: IntoIterator<Item = RowId>,
{
    let expected: AHashSet<RowId> = expected.into_iter().collect();
    let mut seen: AHashSet<RowId> = AHashSet::with_capacity(expected.len());

    for record in records {
        for row in record.a.iter().chain(record.b.iter()) {
            let id = row.id();
            if !expected.contains(&id) {
                return Err(Error::InternalInvariant(format!("row {} is not part of the input", id)));
            }
            if !seen.insert(id) {
                return Err(Error::InternalInvariant(format!("row {} appears in more than one record", id)));
            }
        }
        let consistent = match record.match_type {
            MatchType::Unmatched => record.a.is_some() != record.b.is_some(),
            MatchType::Exact | MatchType::Fuzzy => record.a.is_some() && record.b.is_some(),
        };
        if !consistent {
            return Err(Error::InternalInvariant(format!(
                "{} record has the wrong number of rows",
                record.match_type
            )));
        }
    }

    if seen.len() != expected.len() {
        let missing = expected.difference(&seen).min().copied();
        return Err(Error::InternalInvariant(format!(
            "{} row(s) missing from the result, first: {}",
            expected.len() - seen.len(),
            missing.map(|id| id.to_string()).unwrap_or_default()
        )));
    }
    Ok(())
}

/// Serialize records to CSV.
///
/// Columns: A value, B value, match type, score. The score column is only
/// filled for fuzzy matches.
pub fn write_csv(records: &[MatchRecord], header_a: &str, header_b: &str) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .from_writer(Vec::with_capacity(records.len() * 48));

    writer
        .write_record([header_a, header_b, MATCH_TYPE_HEADER, SCORE_HEADER])
        .map_err(std::io::Error::from)?;

    for record in records {
        let score = match (record.match_type, record.score) {
            (MatchType::Fuzzy, Some(s)) => format!("{:.6}", s),
            _ => String::new(),
        };
        writer
            .write_record([
                record.a.as_ref().map(|r| r.value.as_str()).unwrap_or(""),
                record.b.as_ref().map(|r| r.value.as_str()).unwrap_or(""),
                record.match_type.as_str(),
                score.as_str(),
            ])
            .map_err(std::io::Error::from)?;
    }

    writer.into_inner().map_err(|e| e.into_error().into())
}
