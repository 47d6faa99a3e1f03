use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use spin_sdk::key_value::Store;

use crate::core::store::{document_id, index_key, DocumentStore, Filter, IndexSpec, StoreError, ID_FIELD};

/// Byte-level key-value operations the document layer needs.
pub trait KeyValue {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

impl KeyValue for Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Store::get(self, key).map_err(|e| anyhow!("key-value get of {} failed: {:?}", key, e))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Store::set(self, key, value).map_err(|e| anyhow!("key-value set of {} failed: {:?}", key, e))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Store::delete(self, key).map_err(|e| anyhow!("key-value delete of {} failed: {:?}", key, e))
    }
}

/// Document store laid over a key-value store.
///
/// Keys per collection:
///
/// - `{collection}:{id}`: the document
/// - `{collection}:_ids`: every id in the collection
/// - `{collection}:_indexes`: registered [`IndexSpec`]s
/// - `{collection}:_idx:{index}:{leading key}`: ids whose leading indexed field has that value
/// - `{collection}:_unique:{index}:{key}`: owner of a unique key
///
/// The document key is authoritative. Lists and claims are added after a
/// document is written and removed before it is deleted, so a failure in
/// between leaves a document that is present but unlisted. The caller sees
/// [`StoreError::PartialWrite`]; inserting the same id again or calling
/// [`DocumentStore::repair`] lists it again.
pub struct KvStore<K = Store> {
    kv: K,
}

fn doc_key(collection: &str, id: &str) -> String {
    format!("{}:{}", collection, id)
}

fn ids_key(collection: &str) -> String {
    format!("{}:_ids", collection)
}

fn indexes_key(collection: &str) -> String {
    format!("{}:_indexes", collection)
}

fn unique_key(collection: &str, index: &str, key: &str) -> String {
    format!("{}:_unique:{}:{}", collection, index, key)
}

fn bucket_key(collection: &str, index: &str, leading: &str) -> String {
    format!("{}:_idx:{}:{}", collection, index, leading)
}

fn entry_key(collection: &str, spec: &IndexSpec, doc: &Value) -> Option<String> {
    let leading = index_key(doc.get(spec.leading_field()?)?)?;
    Some(bucket_key(collection, &spec.name, &leading))
}

fn marker_key(name: &str) -> String {
    format!("_meta:{}", name)
}

impl KvStore<Store> {
    pub fn open_default() -> anyhow::Result<Self> {
        let store = Store::open_default().map_err(|e| anyhow!("cannot open key-value store: {:?}", e))?;
        Ok(Self::new(store))
    }
}

impl<K: KeyValue> KvStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    #[cfg(test)]
    pub(crate) fn kv(&self) -> &K {
        &self.kv
    }

    /// Run `init` unless it already completed for `version`. Returns whether it ran.
    pub fn once<F>(&self, name: &str, version: &str, init: F) -> anyhow::Result<bool>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let key = marker_key(name);
        if self.read::<String>(&key)?.as_deref() == Some(version) {
            return Ok(false);
        }
        init()?;
        self.write(&key, version)?;
        log::info!("{} completed for {}", name, version);
        Ok(true)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.kv.set(key, &serde_json::to_vec(value)?)
    }

    fn ids(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.read(&ids_key(collection))?.unwrap_or_default())
    }

    fn indexes(&self, collection: &str) -> anyhow::Result<Vec<IndexSpec>> {
        Ok(self.read(&indexes_key(collection))?.unwrap_or_default())
    }

    fn list_add(&self, key: &str, id: &str) -> anyhow::Result<()> {
        let mut ids: Vec<String> = self.read(key)?.unwrap_or_default();
        if ids.iter().any(|existing| existing == id) {
            return Ok(());
        }
        ids.push(id.to_string());
        self.write(key, &ids)
    }

    fn list_remove(&self, key: &str, id: &str) -> anyhow::Result<()> {
        let Some(mut ids) = self.read::<Vec<String>>(key)? else {
            return Ok(());
        };
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() == before {
            Ok(())
        } else if ids.is_empty() {
            self.kv.delete(key)
        } else {
            self.write(key, &ids)
        }
    }

    fn check_unique(&self, collection: &str, id: &str, doc: &Value, specs: &[IndexSpec]) -> Result<(), StoreError> {
        for spec in specs.iter().filter(|s| s.unique) {
            let Some(key) = spec.key_of(doc) else {
                continue;
            };
            let owner: Option<String> = self.read(&unique_key(collection, &spec.name, &key))?;
            if owner.is_some_and(|owner| owner != id) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    field: spec.name.clone(),
                    value: key,
                });
            }
        }
        Ok(())
    }

    /// List `doc` everywhere it belongs. Idempotent.
    fn enter(&self, collection: &str, id: &str, doc: &Value, specs: &[IndexSpec]) -> anyhow::Result<()> {
        for spec in specs {
            if spec.unique {
                if let Some(key) = spec.key_of(doc) {
                    let claim = unique_key(collection, &spec.name, &key);
                    match self.read::<String>(&claim)? {
                        None => self.write(&claim, id)?,
                        Some(owner) if owner == id => {}
                        Some(owner) => log::warn!("{}/{}: {} = {} is held by {}", collection, id, spec.name, key, owner),
                    }
                }
            }
            if let Some(key) = entry_key(collection, spec, doc) {
                self.list_add(&key, id)?;
            }
        }
        self.list_add(&ids_key(collection), id)
    }

    /// Drop the entries and claims of `old` that `kept` does not share.
    fn leave(&self, collection: &str, id: &str, old: &Value, kept: Option<&Value>, specs: &[IndexSpec]) -> anyhow::Result<()> {
        for spec in specs {
            if let Some(key) = entry_key(collection, spec, old) {
                if kept.and_then(|doc| entry_key(collection, spec, doc)).as_ref() != Some(&key) {
                    self.list_remove(&key, id)?;
                }
            }
            if !spec.unique {
                continue;
            }
            if let Some(key) = spec.key_of(old) {
                if kept.and_then(|doc| spec.key_of(doc)).as_ref() != Some(&key) {
                    let claim = unique_key(collection, &spec.name, &key);
                    if self.read::<String>(&claim)?.as_deref() == Some(id) {
                        self.kv.delete(&claim)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn candidates(&self, collection: &str, filter: &Filter, specs: &[IndexSpec]) -> anyhow::Result<Option<Vec<String>>> {
        let Some((field, values)) = filter.index_candidates() else {
            return Ok(None);
        };
        if field == ID_FIELD {
            return Ok(Some(values.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()));
        }
        let Some(spec) = specs.iter().find(|s| s.leading_field() == Some(field)) else {
            return Ok(None);
        };
        let mut ids = Vec::new();
        for leading in values.into_iter().filter_map(index_key) {
            let bucket: Option<Vec<String>> = self.read(&bucket_key(collection, &spec.name, &leading))?;
            ids.extend(bucket.unwrap_or_default());
        }
        Ok(Some(ids))
    }

    fn partial(collection: &str, id: &str, source: anyhow::Error) -> StoreError {
        log::warn!("{}/{}: document written but bookkeeping failed: {}", collection, id, source);
        StoreError::PartialWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            source,
        }
    }
}

impl<K: KeyValue> DocumentStore for KvStore<K> {
    fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError> {
        let mut specs = self.indexes(collection)?;
        if specs.iter().any(|s| s.name == spec.name) {
            return Ok(());
        }
        let added = std::slice::from_ref(&spec);
        for doc in self.find(collection, &Filter::All)? {
            let id = document_id(&doc)?;
            self.check_unique(collection, id, &doc, added)?;
            self.enter(collection, id, &doc, added)?;
        }
        specs.push(spec);
        self.write(&indexes_key(collection), &specs)?;
        Ok(())
    }

    fn insert(&self, collection: &str, doc: Value) -> Result<(), StoreError> {
        let id = document_id(&doc)?.to_string();
        let key = doc_key(collection, &id);
        let specs = self.indexes(collection)?;

        if let Some(existing) = self.read::<Value>(&key)? {
            // an earlier insert may have stopped short of its bookkeeping
            self.enter(collection, &id, &existing, &specs)
                .map_err(|e| Self::partial(collection, &id, e))?;
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: ID_FIELD.to_string(),
                value: id,
            });
        }
        self.check_unique(collection, &id, &doc, &specs)?;

        self.write(&key, &doc)?;
        self.enter(collection, &id, &doc, &specs)
            .map_err(|e| Self::partial(collection, &id, e))
    }

    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read(&doc_key(collection, id))?)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let specs = self.indexes(collection)?;
        let mut ids = match self.candidates(collection, filter, &specs)? {
            Some(ids) => ids,
            None => self.ids(collection)?,
        };
        ids.sort();
        ids.dedup();

        let mut found = Vec::new();
        for id in ids {
            if let Some(doc) = self.find_one(collection, &id)? {
                if filter.matches(&doc) {
                    found.push(doc);
                }
            }
        }
        Ok(found)
    }

    fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError> {
        let Some(old) = self.find_one(collection, id)? else {
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
        let specs = self.indexes(collection)?;
        self.check_unique(collection, id, &updated, &specs)?;

        self.write(&doc_key(collection, id), &updated)?;

        let bookkeeping = || -> anyhow::Result<()> {
            self.leave(collection, id, &old, Some(&updated), &specs)?;
            self.enter(collection, id, &updated, &specs)
        };
        bookkeeping().map_err(|e| Self::partial(collection, id, e))?;
        Ok(true)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let Some(old) = self.find_one(collection, id)? else {
            return Ok(false);
        };
        let specs = self.indexes(collection)?;
        self.leave(collection, id, &old, None, &specs)?;
        self.list_remove(&ids_key(collection), id)?;
        self.kv.delete(&doc_key(collection, id))?;
        Ok(true)
    }

    fn repair(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let specs = self.indexes(collection)?;
        match self.find_one(collection, id)? {
            Some(doc) => self.enter(collection, id, &doc, &specs)?,
            None => self.list_remove(&ids_key(collection), id)?,
        }
        log::debug!("repaired {}/{}", collection, id);
        Ok(())
    }
}
