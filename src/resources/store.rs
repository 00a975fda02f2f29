//! In-memory document store backing the collection handlers.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::response::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Processes,
    Datasets,
    Modules,
    Jobs,
    Tasks,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Users,
        Collection::Processes,
        Collection::Datasets,
        Collection::Modules,
        Collection::Jobs,
        Collection::Tasks,
    ];

    /// Path segment and storage prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Processes => "processes",
            Collection::Datasets => "datasets",
            Collection::Modules => "modules",
            Collection::Jobs => "jobs",
            Collection::Tasks => "tasks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields managed by the store; clients cannot set them through a patch.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "owner"];

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Path key: `{id}`, `{user-id}/{id}` or `{job-id}/{id}`.
    pub key: String,
    pub owner: String,
    pub fields: Map<String, Value>,
}

impl Resource {
    pub fn to_json(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("id".into(), Value::String(self.key.clone()));
        doc.insert("owner".into(), Value::String(self.owner.clone()));
        Value::Object(doc)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("{0} already exists")]
    Exists(String),

    #[error("not found")]
    Missing,

    #[error("field {0:?} cannot be modified")]
    Reserved(String),
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::Exists(_) => ApiError::Conflict(err.to_string()),
            ResourceError::Missing => ApiError::NotFound,
            ResourceError::Reserved(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceStore {
    docs: DashMap<(Collection, String), Resource>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        collection: Collection,
        key: impl Into<String>,
        owner: impl Into<String>,
        mut fields: Map<String, Value>,
    ) -> Result<Resource, ResourceError> {
        let key = key.into();
        for name in RESERVED_FIELDS {
            fields.remove(name);
        }
        match self.docs.entry((collection, key.clone())) {
            Entry::Occupied(_) => Err(ResourceError::Exists(format!("{collection}/{key}"))),
            Entry::Vacant(slot) => {
                let resource = Resource {
                    key,
                    owner: owner.into(),
                    fields,
                };
                slot.insert(resource.clone());
                Ok(resource)
            }
        }
    }

    pub fn get(&self, collection: Collection, key: &str) -> Option<Resource> {
        self.docs
            .get(&(collection, key.to_string()))
            .map(|r| r.value().clone())
    }

    /// All documents of a collection, ordered by key.
    pub fn list(&self, collection: Collection) -> Vec<Resource> {
        let mut docs: Vec<Resource> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| entry.value().clone())
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        docs
    }

    /// Merge `fields` into a document.
    pub fn patch(
        &self,
        collection: Collection,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<Resource, ResourceError> {
        if let Some(name) = fields.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
            return Err(ResourceError::Reserved(name.clone()));
        }
        let mut doc = self
            .docs
            .get_mut(&(collection, key.to_string()))
            .ok_or(ResourceError::Missing)?;
        doc.fields.extend(fields);
        Ok(doc.clone())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = ResourceStore::new();
        let created = store
            .insert(Collection::Datasets, "u1/d1", "u1", obj(json!({"name": "iris", "owner": "x"})))
            .unwrap();
        assert_eq!(created.owner, "u1");

        let doc = store.get(Collection::Datasets, "u1/d1").unwrap().to_json();
        assert_eq!(doc, json!({"id": "u1/d1", "owner": "u1", "name": "iris"}));
        assert!(store.get(Collection::Modules, "u1/d1").is_none());
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        let store = ResourceStore::new();
        store.insert(Collection::Users, "42", "42", Map::new()).unwrap();
        let err = store
            .insert(Collection::Users, "42", "42", Map::new())
            .unwrap_err();
        assert_eq!(err, ResourceError::Exists("users/42".into()));
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }

    #[test]
    fn test_patch_merges_and_guards_reserved() {
        let store = ResourceStore::new();
        store
            .insert(Collection::Jobs, "j1", "u1", obj(json!({"a": 1, "b": 2})))
            .unwrap();

        let patched = store
            .patch(Collection::Jobs, "j1", obj(json!({"b": 3, "c": 4})))
            .unwrap();
        assert_eq!(patched.fields, obj(json!({"a": 1, "b": 3, "c": 4})));

        assert_eq!(
            store.patch(Collection::Jobs, "j1", obj(json!({"owner": "me"}))),
            Err(ResourceError::Reserved("owner".into()))
        );
        assert_eq!(
            store.patch(Collection::Jobs, "nope", Map::new()),
            Err(ResourceError::Missing)
        );
    }

    #[test]
    fn test_list_is_scoped_and_sorted() {
        let store = ResourceStore::new();
        store.insert(Collection::Jobs, "b", "u", Map::new()).unwrap();
        store.insert(Collection::Jobs, "a", "u", Map::new()).unwrap();
        store.insert(Collection::Tasks, "a/t", "u", Map::new()).unwrap();

        let keys: Vec<_> = store
            .list(Collection::Jobs)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
