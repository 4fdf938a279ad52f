//! Filter set accumulation and compilation
//!
//! Filters constrain the attribute bag of each event. Constraints are keyed
//! by column: re-adding a column replaces its constraint in place, so the
//! set behaves like an ordered map from column to
//! `{value, connective, negate}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tally_query::event::is_valid_identifier;
use tally_query::{Clause, Connective, Predicate};

use crate::error::{AnalyticsError, Result};

/// One attribute constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Parameter key
    pub column: String,
    /// Expected value (JSON scalar)
    pub value: serde_json::Value,
    /// How this constraint joins the ones before it
    pub connective: Connective,
    /// Match events whose bag does NOT contain `column = value`
    pub negate: bool,
}

/// Ordered, last-write-wins set of attribute constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    constraints: Vec<Constraint>,
}

impl FilterSet {
    /// Create an empty filter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the constraint for `column`, replacing any earlier one
    pub fn add(
        &mut self,
        column: impl Into<String>,
        value: impl Into<serde_json::Value>,
        connective: Connective,
        negate: bool,
    ) -> &mut Self {
        let constraint = Constraint {
            column: column.into(),
            value: value.into(),
            connective,
            negate,
        };

        match self
            .constraints
            .iter_mut()
            .find(|c| c.column == constraint.column)
        {
            Some(existing) => *existing = constraint,
            None => self.constraints.push(constraint),
        }
        self
    }

    /// `column = value`, AND-ed
    pub fn where_eq(&mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.add(column, value, Connective::And, false)
    }

    /// `column = value`, OR-ed
    pub fn or_where(&mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.add(column, value, Connective::Or, false)
    }

    /// `NOT column = value`, AND-ed
    pub fn where_not(&mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.add(column, value, Connective::And, true)
    }

    /// `NOT column = value`, OR-ed
    pub fn or_where_not(
        &mut self,
        column: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> &mut Self {
        self.add(column, value, Connective::Or, true)
    }

    /// `column = true`
    pub fn where_true(&mut self, column: impl Into<String>) -> &mut Self {
        self.where_eq(column, true)
    }

    /// `column = false`
    pub fn where_false(&mut self, column: impl Into<String>) -> &mut Self {
        self.where_eq(column, false)
    }

    /// AND one equality constraint per entry
    pub fn where_all<K, V, I>(&mut self, entries: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (column, value) in entries {
            self.where_eq(column, value);
        }
        self
    }

    /// Constraint currently set for `column`
    pub fn get(&self, column: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.column == column)
    }

    /// Constraints in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    /// Number of constraints
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Check if no constraint is set
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Compile into a store predicate
    ///
    /// Columns must match the identifier pattern and values must be JSON
    /// scalars; values are bound by the store, never interpolated.
    pub fn compile(&self) -> Result<Predicate> {
        let clauses = self
            .constraints
            .iter()
            .map(|c| {
                if !is_valid_identifier(&c.column) {
                    return Err(AnalyticsError::InvalidIdentifier(c.column.clone()));
                }
                if c.value.is_object() || c.value.is_array() {
                    return Err(AnalyticsError::InvalidQuerySpec(format!(
                        "filter value for '{}' must be a scalar",
                        c.column
                    )));
                }
                Ok(Clause {
                    column: c.column.clone(),
                    value: c.value.clone(),
                    connective: c.connective,
                    negate: c.negate,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Predicate::new(clauses))
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for FilterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        set.where_all(iter);
        set
    }
}

impl From<BTreeMap<String, serde_json::Value>> for FilterSet {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        map.into_iter().collect()
    }
}

/// Canonical text form of a predicate for cache keys
///
/// Clauses are written `column[!]=json(value)`, sorted within each
/// OR-separated group, and groups are sorted, so reordering AND-ed filters
/// does not change the key.
pub fn canonical(predicate: &Predicate) -> String {
    let mut groups: Vec<String> = predicate
        .disjuncts()
        .into_iter()
        .map(|group| {
            let mut tuples: Vec<String> = group
                .iter()
                .map(|clause| {
                    format!(
                        "{}{}={}",
                        clause.column,
                        if clause.negate { "!" } else { "" },
                        clause.value
                    )
                })
                .collect();
            tuples.sort();
            tuples.join("&")
        })
        .collect();
    groups.sort();
    groups.join("|")
}
