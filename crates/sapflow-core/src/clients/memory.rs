//! In-process document store used for dry runs and tests

use crate::clients::data_service::{validate_delete, validate_save, DataService};
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    requests: AtomicUsize,
    closed: AtomicBool,
    /// Collections whose writes fail with `ServiceUnavailable`
    failing_writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with documents
    pub fn with_documents(self, collection: &str, documents: Vec<Value>) -> Self {
        self.collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        self
    }

    /// Make every save to `collection` fail
    pub fn failing_writes_to(self, collection: &str) -> Self {
        self.failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(collection.to_string());
        self
    }

    /// Snapshot of a collection
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls that reached the store (validation failures excluded)
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn matches(document: &Value, filter: &Map<String, Value>) -> bool {
        filter.iter().all(|(key, expected)| document.get(key) == Some(expected))
    }
}

#[async_trait]
impl DataService for MemoryStore {
    async fn query(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let empty = Map::new();
        let filter = filter.as_object().unwrap_or(&empty);

        Ok(self
            .collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map(|docs| docs.iter().filter(|d| Self::matches(d, filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn save(&self, collection: &str, records: &[Value], unique_key: &str) -> Result<()> {
        validate_save(collection, records)?;
        self.requests.fetch_add(1, Ordering::SeqCst);

        if self
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|c| c == collection)
        {
            return Err(FlowError::ServiceUnavailable(format!("Writes to {} are failing", collection)));
        }

        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let documents = collections.entry(collection.to_string()).or_default();

        for record in records {
            let mut record = record.clone();
            let key = match record.get(unique_key) {
                Some(value) => value.clone(),
                None => {
                    let id = Value::String(uuid::Uuid::new_v4().to_string());
                    if let Some(object) = record.as_object_mut() {
                        object.insert(unique_key.to_string(), id.clone());
                    }
                    id
                }
            };

            match documents.iter_mut().find(|d| d.get(unique_key) == Some(&key)) {
                Some(existing) => *existing = record,
                None => documents.push(record),
            }
        }

        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &Value, _recursive: bool) -> Result<u64> {
        validate_delete(collection, filter)?;
        self.requests.fetch_add(1, Ordering::SeqCst);

        let empty = Map::new();
        let filter = filter.as_object().unwrap_or(&empty);
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();
        documents.retain(|d| !Self::matches(d, filter));
        Ok((before - documents.len()) as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
