//! Generic document store interface.
//!
//! Collections hold schemaless JSON documents, each addressed by its `_id`
//! field. Backends provide point lookups, predicate queries, single-document
//! atomic updates and unique/secondary indexes; joins, sorting and paging are
//! layered on top by [`crate::core::pipeline`].

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key in {collection}: {field} = {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    /// The primary document write landed but index bookkeeping did not.
    #[error("partial write on {collection}/{id}")]
    PartialWrite {
        collection: String,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("document decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("document is missing a string `_id`")]
    MissingId,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::PartialWrite { .. } | StoreError::Backend(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<(String, SortOrder)>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![(field.to_string(), SortOrder::Asc)],
            unique: true,
        }
    }

    pub fn new(name: &str, fields: &[(&str, SortOrder)]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|(f, o)| (f.to_string(), *o)).collect(),
            unique: false,
        }
    }

    pub fn leading_field(&self) -> Option<&str> {
        self.fields.first().map(|(f, _)| f.as_str())
    }

    /// Key of `doc` under this index, `None` if any indexed field is missing or null.
    pub fn key_of(&self, doc: &Value) -> Option<String> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for (field, _) in &self.fields {
            parts.push(index_key(doc.get(field)?)?);
        }
        Some(parts.join("\u{1f}"))
    }
}

/// Flatten a scalar into the string form used for index keys.
pub fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::In(field, values) => doc.get(field).is_some_and(|v| values.contains(v)),
            Filter::Gt(field, value) => doc
                .get(field)
                .is_some_and(|v| !v.is_null() && compare_values(v, value) == Ordering::Greater),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Field/value pairs an index could answer this filter with.
    pub fn index_candidates(&self) -> Option<(&str, Vec<&Value>)> {
        match self {
            Filter::Eq(field, value) => Some((field.as_str(), vec![value])),
            Filter::In(field, values) => Some((field.as_str(), values.iter().collect())),
            Filter::And(filters) => filters.iter().find_map(Filter::index_candidates),
            _ => None,
        }
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

pub fn document_id(doc: &Value) -> Result<&str, StoreError> {
    doc.get(ID_FIELD).and_then(Value::as_str).ok_or(StoreError::MissingId)
}

pub trait DocumentStore {
    fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError>;

    fn insert(&self, collection: &str, doc: Value) -> Result<(), StoreError>;

    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Matching documents in ascending `_id` order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.find(collection, filter)?.len())
    }

    /// Atomically `$set` top-level fields on one document. Returns false if it does not exist.
    fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError>;

    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Make the index bookkeeping of one document agree with the document.
    /// A no-op for backends whose writes are atomic.
    fn repair(&self, _collection: &str, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut removed = 0;
        for doc in self.find(collection, filter)? {
            if self.delete(collection, document_id(&doc)?)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// Typed access. Records are encoded and decoded here and nowhere else.

pub fn insert_record<S, T>(store: &S, collection: &str, record: &T) -> Result<(), StoreError>
where
    S: DocumentStore + ?Sized,
    T: Serialize,
{
    store.insert(collection, serde_json::to_value(record)?)
}

pub fn find_record<S, T>(store: &S, collection: &str, id: &str) -> Result<Option<T>, StoreError>
where
    S: DocumentStore + ?Sized,
    T: DeserializeOwned,
{
    store
        .find_one(collection, id)?
        .map(decode)
        .transpose()
}

pub fn find_records<S, T>(store: &S, collection: &str, filter: &Filter) -> Result<Vec<T>, StoreError>
where
    S: DocumentStore + ?Sized,
    T: DeserializeOwned,
{
    store.find(collection, filter)?.into_iter().map(decode).collect()
}

pub fn find_first<S, T>(store: &S, collection: &str, filter: &Filter) -> Result<Option<T>, StoreError>
where
    S: DocumentStore + ?Sized,
    T: DeserializeOwned,
{
    store
        .find(collection, filter)?
        .into_iter()
        .next()
        .map(decode)
        .transpose()
}

pub fn decode<T: DeserializeOwned>(doc: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(doc)?)
}

/// Build a `$set` map from `(field, value)` pairs.
pub fn set_fields<I, V>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect()
}
