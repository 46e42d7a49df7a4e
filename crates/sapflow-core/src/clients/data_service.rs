//! Document-store abstraction shared by the OpenIAP client and the memory store

use crate::error::{FlowError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Authenticated handle to a document store.
///
/// Callers await one call at a time; implementations never see concurrent requests
/// from the workflow.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Documents of `collection` matching `filter` (possibly none)
    async fn query(&self, collection: &str, filter: &Value) -> Result<Vec<Value>>;

    /// Insert or update `records`, matching existing documents on `unique_key`
    async fn save(&self, collection: &str, records: &[Value], unique_key: &str) -> Result<()>;

    /// Delete documents matching `filter`, returning how many were removed
    async fn delete(&self, collection: &str, filter: &Value, recursive: bool) -> Result<u64>;

    /// Release the session. Calling it twice is harmless.
    async fn close(&self);
}

/// Reject a save batch before anything goes over the wire
pub fn validate_save(collection: &str, records: &[Value]) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(FlowError::Validation("Collection name is empty".to_string()));
    }
    if records.is_empty() {
        return Err(FlowError::Validation("Nothing to save: record list is empty".to_string()));
    }
    if let Some(pos) = records.iter().position(|r| !r.is_object()) {
        return Err(FlowError::Validation(format!("Record {} is not a JSON object", pos)));
    }
    Ok(())
}

/// Reject a delete filter before anything goes over the wire
pub fn validate_delete(collection: &str, filter: &Value) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(FlowError::Validation("Collection name is empty".to_string()));
    }
    match filter.as_object() {
        Some(map) if !map.is_empty() => Ok(()),
        _ => Err(FlowError::Validation("Delete filter must be a non-empty object".to_string())),
    }
}

/// First document returned by `query`, or `NoData` when there is none
pub async fn fetch_first<D: DataService + ?Sized>(
    data: &D,
    collection: &str,
    filter: &Value,
) -> Result<Value> {
    let documents = data.query(collection, filter).await?;
    match documents.into_iter().next() {
        Some(document) => {
            log::info!("Successfully retrieved data from {}", collection);
            Ok(document)
        }
        None => {
            log::warn!("No data retrieved from {} with query {}", collection, filter);
            Err(FlowError::NoData(format!("No documents in '{}' match {}", collection, filter)))
        }
    }
}
