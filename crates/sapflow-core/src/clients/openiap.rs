//! Type-safe OpenIAP client with compile-time authentication enforcement
//!
//! Only `OpenIapClient<Authenticated>` implements [`DataService`], so the workflow
//! cannot issue a query before `signin()` succeeded.

use crate::clients::data_service::{validate_delete, validate_save, DataService};
use crate::config::OpenIapConfig;
use crate::constants::{
    OPENIAP_DELETE_PATH, OPENIAP_QUERY_PATH, OPENIAP_SIGNIN_PATH, OPENIAP_SIGNOUT_PATH,
    OPENIAP_UPSERT_PATH,
};
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

// Type-safe authentication states
pub struct Unauthenticated;
pub struct Authenticated;

pub struct OpenIapClient<State = Unauthenticated> {
    base_url: String,
    jwt: Option<String>,
    user_name: Option<String>,
    http_client: HttpClient,
    closed: AtomicBool,
    _state: PhantomData<State>,
}

impl OpenIapClient<Unauthenticated> {
    pub fn new(config: &OpenIapConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| FlowError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.resolved_url(),
            jwt: config.resolved_jwt(),
            user_name: None,
            http_client,
            closed: AtomicBool::new(false),
            _state: PhantomData,
        })
    }

    /// Sign in and transition to the authenticated state
    pub async fn signin(self) -> Result<OpenIapClient<Authenticated>> {
        let jwt = self.jwt.clone().ok_or_else(|| {
            FlowError::Auth("No OpenIAP token configured (openiap.jwt or the jwt variable)".to_string())
        })?;

        let url = format!("{}{}", self.base_url, OPENIAP_SIGNIN_PATH);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "jwt": jwt, "validateonly": false }))
            .send()
            .await
            .map_err(|e| FlowError::ServiceUnavailable(format!("OpenIAP unreachable at {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(FlowError::Auth(format!(
                "OpenIAP signin failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: Value = response.json().await?;
        let session_jwt = body["jwt"].as_str().map(str::to_string).unwrap_or(jwt);
        let user_name = body["user"]["name"]
            .as_str()
            .or_else(|| body["user"]["username"].as_str())
            .map(str::to_string);

        log::info!("Signed in as {}", user_name.as_deref().unwrap_or("<unknown>"));
        log::info!("Successfully connected and authenticated with OpenIAP service.");

        Ok(OpenIapClient {
            base_url: self.base_url,
            jwt: Some(session_jwt),
            user_name,
            http_client: self.http_client,
            closed: AtomicBool::new(false),
            _state: PhantomData::<Authenticated>,
        })
    }
}

impl OpenIapClient<Authenticated> {
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    #[cfg(test)]
    fn with_session(base_url: &str, jwt: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            jwt: Some(jwt.to_string()),
            user_name: None,
            http_client: HttpClient::new(),
            closed: AtomicBool::new(false),
            _state: PhantomData,
        }
    }

    async fn call(&self, path: &str, payload: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FlowError::ServiceUnavailable("OpenIAP connection is closed".to_string()));
        }

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.post(&url).json(&payload);
        if let Some(jwt) = &self.jwt {
            request = request.bearer_auth(jwt);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlowError::ServiceUnavailable(format!("OpenIAP request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => FlowError::Auth(format!("OpenIAP rejected the session: {}", text)),
                _ => FlowError::ServiceUnavailable(format!("OpenIAP returned {}: {}", status, text)),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FlowError::MalformedResponse(format!("OpenIAP response to {} is not JSON: {}", path, e)))
    }
}

#[async_trait]
impl DataService for OpenIapClient<Authenticated> {
    async fn query(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let body = self
            .call(OPENIAP_QUERY_PATH, json!({ "collectionname": collection, "query": filter }))
            .await
            .map_err(|e| {
                log::error!("Error querying OpenIAP collection {} with value {}. Error: {}", collection, filter, e);
                e
            })?;

        match body.get("results").or(Some(&body)) {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(FlowError::MalformedResponse(format!(
                "Query on {} did not return a result list",
                collection
            ))),
        }
    }

    async fn save(&self, collection: &str, records: &[Value], unique_key: &str) -> Result<()> {
        validate_save(collection, records)?;

        let body = self
            .call(
                OPENIAP_UPSERT_PATH,
                json!({ "collectionname": collection, "items": records, "uniqeness": unique_key }),
            )
            .await
            .map_err(|e| {
                log::error!("Error saving data to collection {}: {}", collection, e);
                e
            })?;

        match body.get("results") {
            Some(Value::Array(items)) if !items.is_empty() => {
                log::info!("Data saved successfully to {}", collection);
                Ok(())
            }
            _ => Err(FlowError::MalformedResponse(format!(
                "Insert into {} returned no saved documents",
                collection
            ))),
        }
    }

    async fn delete(&self, collection: &str, filter: &Value, recursive: bool) -> Result<u64> {
        validate_delete(collection, filter)?;

        let body = self
            .call(
                OPENIAP_DELETE_PATH,
                json!({ "collectionname": collection, "query": filter, "recursive": recursive }),
            )
            .await?;

        let affected = body["affectedrows"].as_u64().ok_or_else(|| {
            FlowError::MalformedResponse(format!("Delete on {} did not report affected rows", collection))
        })?;
        log::info!("Deleted {} documents from {}", affected, collection);
        Ok(affected)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let url = format!("{}{}", self.base_url, OPENIAP_SIGNOUT_PATH);
        let mut request = self.http_client.post(&url);
        if let Some(jwt) = &self.jwt {
            request = request.bearer_auth(jwt);
        }

        match request.send().await {
            Ok(_) => log::info!("OpenIAP connection closed"),
            Err(e) => log::warn!("OpenIAP signout failed: {}", e),
        }
    }
}
