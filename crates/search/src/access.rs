//! Access filter
//!
//! Turns a caller's group claims into an index-side predicate. Trimming
//! happens inside the index so a truncated result page never contains, or
//! is shortened by, fragments the caller may not see.

use crate::filter::{quote_literal, FilterExpression};
use std::collections::BTreeSet;
use tracing::warn;

/// Separator passed to `search.in`; group IDs containing it are skipped
pub const GROUP_DELIMITER: char = '|';

/// Matches fragments with no access groups
pub const PUBLIC_ONLY: &str = "not groups/any()";

/// Build the access predicate for a caller.
///
/// - `enforce == false`: no filter, everything is visible.
/// - no groups: public fragments only.
/// - otherwise: public fragments, or fragments sharing a group with the caller.
pub fn build_filter(caller_groups: &BTreeSet<String>, enforce: bool) -> Option<FilterExpression> {
    if !enforce {
        return None;
    }

    let usable: Vec<&str> = caller_groups
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .filter(|g| {
            let ok = !g.contains(GROUP_DELIMITER);
            if !ok {
                warn!(group = %g, "Skipping group claim containing the filter delimiter");
            }
            ok
        })
        .collect();

    if usable.is_empty() {
        return Some(FilterExpression::raw(PUBLIC_ONLY));
    }

    let list = usable.join(&GROUP_DELIMITER.to_string());
    Some(FilterExpression::raw(format!(
        "{} or groups/any(g: search.in(g, {}, {}))",
        PUBLIC_ONLY,
        quote_literal(&list),
        quote_literal(&GROUP_DELIMITER.to_string()),
    )))
}
