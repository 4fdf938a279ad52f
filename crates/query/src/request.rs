//! Structured store query
//!
//! The analytics layer compiles a query spec into a [`StoreQuery`]; each
//! backend translates it into its own dialect. Values never travel as SQL
//! text, only as bound parameters or in-process comparisons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Parameters;
use crate::granularity::Granularity;

/// Name of the numeric column aggregated by default
pub const VALUE_COLUMN: &str = "value";

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Sum of values
    Sum,
    /// Number of events
    Count,
    /// Mean of values
    Avg,
    /// Smallest value
    Min,
    /// Largest value
    Max,
}

impl Aggregate {
    /// Look up an aggregate token (case-insensitive)
    pub fn from_token(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "avg" | "average" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    /// Canonical token
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar expression computed per bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateExpr {
    /// Aggregate applied over a numeric column
    Column {
        /// Function to apply
        function: Aggregate,
        /// Column name
        column: String,
    },
    /// Number of distinct values of a parameter key
    DistinctParameter {
        /// Parameter key
        key: String,
    },
}

/// How a clause joins the clauses before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    /// Both sides must hold
    #[default]
    And,
    /// Either side may hold
    Or,
}

impl Connective {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// One containment test against the attribute bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Parameter key
    pub column: String,
    /// Expected JSON value
    pub value: serde_json::Value,
    /// Join with the preceding clause (ignored on the first clause)
    pub connective: Connective,
    /// Invert the test
    pub negate: bool,
}

impl Clause {
    /// Evaluate against one event's parameters
    ///
    /// A negated clause matches events that lack the key entirely.
    pub fn matches(&self, parameters: &Parameters) -> bool {
        let contains = parameters.get(&self.column) == Some(&self.value);
        contains != self.negate
    }
}

/// Compiled filter predicate
///
/// Clauses chain left to right by their connectives with SQL precedence:
/// AND binds tighter than OR. An empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Clauses in insertion order
    pub clauses: Vec<Clause>,
}

impl Predicate {
    /// Create a predicate from clauses
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Check if there are no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Split into OR-separated groups of AND-ed clauses
    pub fn disjuncts(&self) -> Vec<&[Clause]> {
        let mut groups = Vec::new();
        let mut start = 0;
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 && clause.connective == Connective::Or {
                groups.push(&self.clauses[start..i]);
                start = i;
            }
        }
        if start < self.clauses.len() {
            groups.push(&self.clauses[start..]);
        }
        groups
    }

    /// Evaluate against one event's parameters
    pub fn matches(&self, parameters: &Parameters) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        self.disjuncts()
            .iter()
            .any(|group| group.iter().all(|clause| clause.matches(parameters)))
    }
}

/// Grouped aggregate query over the fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    /// Metric to scan
    pub metric_name: String,
    /// Range start (inclusive)
    pub start: DateTime<Utc>,
    /// Range end (inclusive)
    pub end: DateTime<Utc>,
    /// Label rows per bucket; `None` aggregates the whole range into one row
    pub bucket: Option<Granularity>,
    /// Scalar expression per bucket
    pub aggregate: AggregateExpr,
    /// Attribute filter
    pub predicate: Predicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clause(column: &str, value: serde_json::Value, connective: Connective, negate: bool) -> Clause {
        Clause {
            column: column.to_string(),
            value,
            connective,
            negate,
        }
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_aggregate_tokens() {
        assert_eq!(Aggregate::from_token("SUM"), Some(Aggregate::Sum));
        assert_eq!(Aggregate::from_token("count"), Some(Aggregate::Count));
        assert_eq!(Aggregate::from_token(" Avg "), Some(Aggregate::Avg));
        assert_eq!(Aggregate::from_token("median"), None);
    }

    #[test]
    fn test_clause_matches() {
        let p = params(&[("user", json!("a")), ("paid", json!(true))]);
        assert!(clause("user", json!("a"), Connective::And, false).matches(&p));
        assert!(!clause("user", json!("b"), Connective::And, false).matches(&p));
        assert!(clause("user", json!("b"), Connective::And, true).matches(&p));
        assert!(!clause("paid", json!("true"), Connective::And, false).matches(&p));
    }

    #[test]
    fn test_negated_clause_matches_missing_key() {
        let p = params(&[]);
        assert!(clause("user", json!("a"), Connective::And, true).matches(&p));
        assert!(!clause("user", json!("a"), Connective::And, false).matches(&p));
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        assert!(Predicate::default().matches(&params(&[])));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        // plan = pro AND country = de OR plan = free
        let predicate = Predicate::new(vec![
            clause("plan", json!("pro"), Connective::And, false),
            clause("country", json!("de"), Connective::And, false),
            clause("plan", json!("free"), Connective::Or, false),
        ]);

        assert!(predicate.matches(&params(&[("plan", json!("pro")), ("country", json!("de"))])));
        assert!(predicate.matches(&params(&[("plan", json!("free")), ("country", json!("us"))])));
        assert!(!predicate.matches(&params(&[("plan", json!("pro")), ("country", json!("us"))])));
    }

    #[test]
    fn test_first_connective_is_ignored() {
        let predicate = Predicate::new(vec![clause("plan", json!("pro"), Connective::Or, false)]);
        assert!(!predicate.matches(&params(&[("plan", json!("free"))])));
        assert_eq!(predicate.disjuncts().len(), 1);
    }

    #[test]
    fn test_disjuncts() {
        let predicate = Predicate::new(vec![
            clause("a", json!(1), Connective::And, false),
            clause("b", json!(2), Connective::Or, false),
            clause("c", json!(3), Connective::And, false),
        ]);
        let groups = predicate.disjuncts();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 2);
    }
}
