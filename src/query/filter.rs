//! Metadata predicates evaluated against candidate records.
//!
//! Filters never reach into the index structure; the query engine evaluates
//! them per candidate while scanning, so the IVF lists stay metric-only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::Metadata;

/// A typed predicate tree over record metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every record.
    #[default]
    All,
    Eq {
        key: String,
        value: String,
    },
    NotEq {
        key: String,
        value: String,
    },
    In {
        key: String,
        values: Vec<String>,
    },
    Exists {
        key: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn not_eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::NotEq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Filter::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Filter::Exists { key: key.into() }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Conjunction of `key == value` for every pair.
    ///
    /// This is the shape of the map-based filter parameter of the search API.
    /// Pairs are sorted by key so the resulting tree is deterministic.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut clauses: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        clauses.sort();

        match clauses.len() {
            0 => Filter::All,
            1 => {
                let (key, value) = clauses.remove(0);
                Filter::Eq { key, value }
            }
            _ => Filter::And(
                clauses
                    .into_iter()
                    .map(|(key, value)| Filter::Eq { key, value })
                    .collect(),
            ),
        }
    }

    /// Combines two filters, dropping `All` operands.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// Evaluates the predicate.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { key, value } => metadata.get(key) == Some(value),
            Filter::NotEq { key, value } => metadata.get(key) != Some(value),
            Filter::In { key, values } => metadata
                .get(key)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
            Filter::Exists { key } => metadata.contains_key(key),
            Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
            Filter::Not(filter) => !filter.matches(metadata),
        }
    }
}

impl From<&HashMap<String, String>> for Filter {
    fn from(pairs: &HashMap<String, String>) -> Self {
        Filter::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
