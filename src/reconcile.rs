use std::collections::BTreeSet;

use tracing::warn;

use crate::domain::{ProfileCategory, ProfileTable};
use crate::error::ProfileError;

/// How a table was brought into agreement with the expected identifier set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Accepted,
    Transposed,
}

/// Current reconciliation semantics: the table's primary axis (columns for
/// community, rows for organism) must be a subset of the expected ids. On a
/// mismatch the other axis is checked for a clean match; if it matches the
/// table is transposed, otherwise the call fails naming the unmatched ids.
///
/// The two ordered comparisons are deliberate and must stay separate: which
/// mismatches are tolerated depends on checking the primary axis first.
pub fn reconcile_current(
    table: ProfileTable,
    expected: Option<&BTreeSet<String>>,
    category: ProfileCategory,
) -> Result<(ProfileTable, Reconciliation), ProfileError> {
    let Some(expected) = expected else {
        return Ok((table, Reconciliation::Accepted));
    };

    let (primary, secondary) = match category {
        ProfileCategory::Community => (&table.col_ids, &table.row_ids),
        ProfileCategory::Organism => (&table.row_ids, &table.col_ids),
    };

    let unmatched = difference(primary, expected);
    if unmatched.is_empty() {
        return Ok((table, Reconciliation::Accepted));
    }
    warn!(
        "found unmatched ids on the {category} profile's primary axis: {}",
        unmatched.join(", ")
    );

    if difference(secondary, expected).is_empty() {
        return Ok((table.transpose(), Reconciliation::Transposed));
    }

    Err(ProfileError::IdentifierMismatch(unmatched.join(", ")))
}

/// Legacy reconciliation semantics, reversed direction from the current ones:
/// the expected set must be covered by the table's columns. On a mismatch the
/// table is transposed and the columns rechecked before failing.
pub fn reconcile_legacy(
    table: ProfileTable,
    expected: Option<&BTreeSet<String>>,
) -> Result<(ProfileTable, Reconciliation), ProfileError> {
    let Some(expected) = expected else {
        return Ok((table, Reconciliation::Accepted));
    };

    let missing = missing_from(expected, &table.col_ids);
    if missing.is_empty() {
        return Ok((table, Reconciliation::Accepted));
    }
    warn!(
        "found some unmatched set data ids in profile file columns: {}",
        missing.join(", ")
    );

    let transposed = table.transpose();
    let missing = missing_from(expected, &transposed.col_ids);
    if missing.is_empty() {
        return Ok((transposed, Reconciliation::Transposed));
    }
    warn!(
        "found some unmatched set data ids in profile file rows: {}",
        missing.join(", ")
    );

    Err(ProfileError::IdentifierMismatch(missing.join(", ")))
}

/// Axis labels not present in the expected set, in axis order.
fn difference(axis: &[String], expected: &BTreeSet<String>) -> Vec<String> {
    axis.iter()
        .filter(|label| !expected.contains(label.as_str()))
        .cloned()
        .collect()
}

/// Expected ids missing from the axis, in set order.
fn missing_from(expected: &BTreeSet<String>, axis: &[String]) -> Vec<String> {
    let axis: BTreeSet<&str> = axis.iter().map(String::as_str).collect();
    expected
        .iter()
        .filter(|id| !axis.contains(id.as_str()))
        .cloned()
        .collect()
}
