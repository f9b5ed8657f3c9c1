//! Document-store seam.
//!
//! The queue core talks to durable storage through the [`DocStore`]
//! port; the driver behind it is interchangeable. [`MemStore`] is the
//! in-process implementation used by the server default and by every
//! test. [`Gateway`] layers the typed job/perf/clientgroup operations
//! on top.

pub mod gateway;
pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One condition on a dotted field path.
#[derive(Debug, Clone)]
pub enum Cond {
    Eq(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Gt(Value),
    Lt(Value),
}

/// Conjunctive query over dotted field paths.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: BTreeMap<String, Cond>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, cond: Cond) -> Self {
        self.clauses.insert(field.into(), cond);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|(path, cond)| {
            let field = lookup(doc, path);
            match cond {
                Cond::Eq(v) => field == Some(v),
                Cond::In(vs) => field.map(|f| vs.contains(f)).unwrap_or(false),
                Cond::NotIn(vs) => field.map(|f| !vs.contains(f)).unwrap_or(true),
                Cond::Gt(v) => field
                    .map(|f| compare(f, v) == Ordering::Greater)
                    .unwrap_or(false),
                Cond::Lt(v) => field
                    .map(|f| compare(f, v) == Ordering::Less)
                    .unwrap_or(false),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Sort order applied by [`DocStore::find`].
#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Resolve a dotted path inside a document.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Total order over scalar document values; mixed kinds compare by a
/// fixed kind rank so sorting is stable. RFC 3339 timestamps order
/// correctly as strings.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Object-safe port to the document store. Each call is one logical
/// session: implementations acquire and release any underlying
/// connection on every operation, on all exit paths.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Insert or replace the document with the given id.
    async fn upsert(&self, coll: &str, id: &str, doc: Value) -> Result<()>;

    async fn find_one(&self, coll: &str, query: &Query) -> Result<Option<Value>>;

    /// Matching documents plus the total match count before paging.
    async fn find(
        &self,
        coll: &str,
        query: &Query,
        sort: Option<&Sort>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<Value>, usize)>;

    /// Set dotted fields on every document matching the query.
    /// Returns the number of documents updated.
    async fn update_fields(
        &self,
        coll: &str,
        query: &Query,
        set: Vec<(String, Value)>,
    ) -> Result<u64>;

    /// Positional array-element update: on the document with `id`,
    /// set `field` of the `array` element whose `id_field` equals
    /// `elem_id`.
    async fn update_array_element(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// Positional numeric increment on an array element field.
    async fn increment_array_element(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<()>;

    /// Read one field of the matched array element.
    async fn get_array_element_field(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
    ) -> Result<Value>;

    /// Append a value to an array field of the document with `id`.
    async fn push(&self, coll: &str, id: &str, array: &str, value: Value) -> Result<()>;

    /// Delete all matching documents, returning how many went away.
    async fn delete_many(&self, coll: &str, query: &Query) -> Result<u64>;

    /// Declare an index. Implementations may treat this as a hint.
    async fn ensure_index(&self, coll: &str, field: &str, unique: bool) -> Result<()>;
}
