//! Filter expressions
//!
//! Filters are OData-style predicate strings evaluated by the index. The
//! store client forwards them untouched; only this module writes them, so
//! every literal is quoted here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque predicate forwarded to the fragment index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpression(String);

impl FilterExpression {
    /// Wrap an already well-formed predicate
    pub fn raw(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Both predicates must hold
    pub fn and(self, other: FilterExpression) -> FilterExpression {
        FilterExpression(format!("({}) and ({})", self.0, other.0))
    }

    /// `category eq '<category>'`
    pub fn category_eq(category: &str) -> Self {
        Self(format!("category eq {}", quote_literal(category)))
    }

    /// `category ne '<category>'`
    pub fn category_ne(category: &str) -> Self {
        Self(format!("category ne {}", quote_literal(category)))
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Conjunction of optional clauses.
///
/// The access predicate and every narrowing clause are ANDed, so nothing
/// added here can widen what the caller may see.
#[derive(Debug, Default, Clone)]
pub struct FilterBuilder {
    clauses: Vec<FilterExpression>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause when present
    pub fn clause(mut self, clause: Option<FilterExpression>) -> Self {
        self.clauses.extend(clause);
        self
    }

    pub fn include_category(self, category: Option<&str>) -> Self {
        let clause = non_blank(category).map(FilterExpression::category_eq);
        self.clause(clause)
    }

    pub fn exclude_category(self, category: Option<&str>) -> Self {
        let clause = non_blank(category).map(FilterExpression::category_ne);
        self.clause(clause)
    }

    /// `None` when no clause was added
    pub fn build(self) -> Option<FilterExpression> {
        self.clauses.into_iter().reduce(FilterExpression::and)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
