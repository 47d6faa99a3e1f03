use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::core::store::{document_id, index_key, DocumentStore, Filter, IndexSpec, StoreError, ID_FIELD};

/// In-process store. Every operation runs under one lock, so each is atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

#[derive(Default)]
struct Collection {
    docs: BTreeMap<String, Value>,
    indexes: Vec<Index>,
}

struct Index {
    spec: IndexSpec,
    // leading field value -> ids
    by_leading: HashMap<String, BTreeSet<String>>,
    // full key -> id, unique indexes only
    unique_keys: HashMap<String, String>,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            by_leading: HashMap::new(),
            unique_keys: HashMap::new(),
        }
    }

    fn leading_key(&self, doc: &Value) -> Option<String> {
        index_key(doc.get(self.spec.leading_field()?)?)
    }

    fn add(&mut self, id: &str, doc: &Value) {
        if let Some(key) = self.leading_key(doc) {
            self.by_leading.entry(key).or_default().insert(id.to_string());
        }
        if self.spec.unique {
            if let Some(key) = self.spec.key_of(doc) {
                self.unique_keys.insert(key, id.to_string());
            }
        }
    }

    fn remove(&mut self, id: &str, doc: &Value) {
        if let Some(key) = self.leading_key(doc) {
            if let Some(ids) = self.by_leading.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_leading.remove(&key);
                }
            }
        }
        if self.spec.unique {
            if let Some(key) = self.spec.key_of(doc) {
                self.unique_keys.remove(&key);
            }
        }
    }

    /// Id of another document already holding `doc`'s unique key.
    fn conflict(&self, id: &str, doc: &Value) -> Option<String> {
        if !self.spec.unique {
            return None;
        }
        let key = self.spec.key_of(doc)?;
        match self.unique_keys.get(&key) {
            Some(owner) if owner != id => Some(key),
            _ => None,
        }
    }
}

impl Collection {
    fn check_unique(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError> {
        for index in &self.indexes {
            if let Some(value) = index.conflict(id, doc) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    field: index.spec.name.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    fn candidates(&self, filter: &Filter) -> Option<BTreeSet<String>> {
        let (field, values) = filter.index_candidates()?;
        let index = self
            .indexes
            .iter()
            .find(|i| i.spec.leading_field() == Some(field))?;
        let mut ids = BTreeSet::new();
        for value in values {
            if let Some(found) = index_key(value).and_then(|k| index.by_leading.get(&k)) {
                ids.extend(found.iter().cloned());
            }
        }
        Some(ids)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }
}

impl DocumentStore for MemoryStore {
    fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError> {
        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.indexes.iter().any(|i| i.spec.name == spec.name) {
            return Ok(());
        }

        let mut index = Index::new(spec);
        for (id, doc) in &coll.docs {
            if let Some(value) = index.conflict(id, doc) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    field: index.spec.name.clone(),
                    value,
                });
            }
            index.add(id, doc);
        }
        coll.indexes.push(index);
        Ok(())
    }

    fn insert(&self, collection: &str, doc: Value) -> Result<(), StoreError> {
        let id = document_id(&doc)?.to_string();
        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();

        if coll.docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: ID_FIELD.to_string(),
                value: id,
            });
        }
        coll.check_unique(collection, &id, &doc)?;

        for index in &mut coll.indexes {
            index.add(&id, &doc);
        }
        coll.docs.insert(id, doc);
        Ok(())
    }

    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.read()?;
        Ok(collections.get(collection).and_then(|c| c.docs.get(id)).cloned())
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let collections = self.read()?;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let found = match coll.candidates(filter) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| coll.docs.get(id))
                .filter(|doc| filter.matches(doc))
                .cloned()
                .collect(),
            None => coll.docs.values().filter(|doc| filter.matches(doc)).cloned().collect(),
        };
        Ok(found)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let collections = self.read()?;
        let Some(coll) = collections.get(collection) else {
            return Ok(0);
        };
        let count = match coll.candidates(filter) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| coll.docs.get(id))
                .filter(|doc| filter.matches(doc))
                .count(),
            None => coll.docs.values().filter(|doc| filter.matches(doc)).count(),
        };
        Ok(count)
    }

    fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError> {
        let mut collections = self.write()?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(old) = coll.docs.get(id).cloned() else {
            return Ok(false);
        };

        let mut updated = old.clone();
        if let Value::Object(map) = &mut updated {
            for (key, value) in fields {
                if key != ID_FIELD {
                    map.insert(key, value);
                }
            }
        }
        coll.check_unique(collection, id, &updated)?;

        for index in &mut coll.indexes {
            index.remove(id, &old);
            index.add(id, &updated);
        }
        coll.docs.insert(id.to_string(), updated);
        Ok(true)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.write()?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(old) = coll.docs.remove(id) else {
            return Ok(false);
        };
        for index in &mut coll.indexes {
            index.remove(id, &old);
        }
        Ok(true)
    }
}
