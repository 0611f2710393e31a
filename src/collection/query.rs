//! Queries
//!
//! A `Query` picks candidate ids from the index (order, id range) and a
//! `Filter` decides which decrypted documents match. `skip` and `limit`
//! apply to matching documents.

use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

use crate::value::{lookup, Fields, Value};

/// Field predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    Eq(String, Value),
    /// Also matches when the field is missing
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(path.into(), value.into())
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(path.into(), value.into())
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(path.into(), value.into())
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(path.into(), value.into())
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(path.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(path.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Filter::Exists(path.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            Filter::All => other,
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut any) => {
                any.push(other);
                Filter::Or(any)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluate against a document's fields
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, expected) => lookup(fields, path) == Some(expected),
            Filter::Ne(path, expected) => lookup(fields, path) != Some(expected),
            Filter::Gt(path, bound) => ordered(fields, path, bound, |o| o == Ordering::Greater),
            Filter::Gte(path, bound) => ordered(fields, path, bound, |o| o != Ordering::Less),
            Filter::Lt(path, bound) => ordered(fields, path, bound, |o| o == Ordering::Less),
            Filter::Lte(path, bound) => ordered(fields, path, bound, |o| o != Ordering::Greater),
            Filter::In(path, options) => match lookup(fields, path) {
                Some(actual) => options.iter().any(|option| option == actual),
                None => false,
            },
            Filter::Exists(path) => lookup(fields, path).is_some(),
            Filter::And(all) => all.iter().all(|f| f.matches(fields)),
            Filter::Or(any) => any.iter().any(|f| f.matches(fields)),
            Filter::Not(inner) => !inner.matches(fields),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

fn ordered(fields: &Fields, path: &str, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    // Null never takes part in range comparisons
    if bound.is_null() {
        return false;
    }
    lookup(fields, path)
        .and_then(|actual| actual.compare(bound))
        .map_or(false, accept)
}

/// Order in which `find` yields documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Order in which documents were first inserted
    #[default]
    Insertion,
    IdAscending,
    IdDescending,
}

/// What `find` returns and in which order
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order: ScanOrder,
    pub id_start: Bound<String>,
    pub id_end: Bound<String>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    /// Every document, insertion order
    pub fn all() -> Self {
        Self {
            filter: Filter::All,
            order: ScanOrder::Insertion,
            id_start: Bound::Unbounded,
            id_end: Bound::Unbounded,
            skip: 0,
            limit: None,
        }
    }

    pub fn filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::all()
        }
    }

    /// Add a condition, combined with AND
    pub fn and(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    pub fn order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    /// Restrict to ids within `range`
    pub fn ids<R: RangeBounds<String>>(mut self, range: R) -> Self {
        self.id_start = range.start_bound().cloned();
        self.id_end = range.end_bound().cloned();
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub(crate) fn id_range(&self) -> (Bound<String>, Bound<String>) {
        (self.id_start.clone(), self.id_end.clone())
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Filter> for Query {
    fn from(filter: Filter) -> Self {
        Query::filter(filter)
    }
}
