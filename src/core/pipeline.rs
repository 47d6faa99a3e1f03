//! In-process aggregation over a [`DocumentStore`].
//!
//! Stages mirror the usual document-database pipeline: filter, join another
//! collection, flatten the joined array, sort, skip and limit. A leading
//! `Match` is answered by the store (and its indexes); every later stage runs
//! over the documents in memory.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::store::{compare_values, DocumentStore, Filter, SortOrder, StoreError, ID_FIELD};

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Unwind(String),
    Sort { field: String, order: SortOrder },
    Skip(usize),
    Limit(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn lookup(mut self, from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        self.stages.push(Stage::Lookup {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        });
        self
    }

    pub fn unwind(mut self, field: &str) -> Self {
        self.stages.push(Stage::Unwind(field.to_string()));
        self
    }

    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        self.stages.push(Stage::Sort {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.stages.push(Stage::Skip(n));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.stages.push(Stage::Limit(n));
        self
    }

    pub fn run<S: DocumentStore + ?Sized>(&self, store: &S, collection: &str) -> Result<Vec<Value>, StoreError> {
        let (mut docs, rest) = match self.stages.split_first() {
            Some((Stage::Match(filter), rest)) => (store.find(collection, filter)?, rest),
            _ => (store.find(collection, &Filter::All)?, self.stages.as_slice()),
        };

        for stage in rest {
            docs = apply(store, stage, docs)?;
        }
        Ok(docs)
    }
}

fn apply<S: DocumentStore + ?Sized>(store: &S, stage: &Stage, docs: Vec<Value>) -> Result<Vec<Value>, StoreError> {
    let out = match stage {
        Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => lookup(store, docs, from, local_field, foreign_field, as_field)?,
        Stage::Unwind(field) => unwind(docs, field),
        Stage::Sort { field, order } => {
            let mut docs = docs;
            sort_documents(&mut docs, field, *order);
            docs
        }
        Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
        Stage::Limit(n) => docs.into_iter().take(*n).collect(),
    };
    Ok(out)
}

fn lookup<S: DocumentStore + ?Sized>(
    store: &S,
    docs: Vec<Value>,
    from: &str,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> Result<Vec<Value>, StoreError> {
    // one query per distinct join key
    let mut joined: HashMap<String, Vec<Value>> = HashMap::new();
    let mut out = Vec::with_capacity(docs.len());

    for mut doc in docs {
        let matches = match doc.get(local_field).cloned() {
            Some(local) if !local.is_null() => {
                let cache_key = local.to_string();
                if let Some(found) = joined.get(&cache_key) {
                    found.clone()
                } else {
                    let found = if foreign_field == ID_FIELD {
                        match local.as_str() {
                            Some(id) => store.find_one(from, id)?.into_iter().collect(),
                            None => Vec::new(),
                        }
                    } else {
                        store.find(from, &Filter::Eq(foreign_field.to_string(), local))?
                    };
                    joined.insert(cache_key, found.clone());
                    found
                }
            }
            _ => Vec::new(),
        };

        if let Value::Object(map) = &mut doc {
            map.insert(as_field.to_string(), Value::Array(matches));
        }
        out.push(doc);
    }
    Ok(out)
}

fn unwind(docs: Vec<Value>, field: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match doc.get(field) {
            Some(Value::Array(items)) => items.clone(),
            _ => continue,
        };
        for item in items {
            let mut flat = doc.clone();
            if let Value::Object(map) = &mut flat {
                map.insert(field.to_string(), item);
            }
            out.push(flat);
        }
    }
    out
}

/// Stable sort on `field`; ties are broken by ascending `_id`.
pub fn sort_documents(docs: &mut [Value], field: &str, order: SortOrder) {
    docs.sort_by(|a, b| {
        let primary = compare_values(
            a.get(field).unwrap_or(&Value::Null),
            b.get(field).unwrap_or(&Value::Null),
        );
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| {
            compare_values(
                a.get(ID_FIELD).unwrap_or(&Value::Null),
                b.get(ID_FIELD).unwrap_or(&Value::Null),
            )
        })
    });
}
