//! Vector store client trait and implementations.
//!
//! The external vector store is consumed purely as an upsert-by-id HTTP API:
//! given (collection, document id, text, metadata), upserting the same tuple
//! twice is a no-op on the store side. Its internals are not modeled here.
//!
//! - `HttpVectorStore` talks to the real service.
//! - `MockVectorStore` is an in-memory stand-in for tests, with failure
//!   injection per collection and a call counter for idempotence checks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lexica_core::config::IndexConfig;
use lexica_core::error::{LexicaError, Result};

/// One document ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertItem {
    /// Content-addressed document id; the store's idempotency key.
    pub id: String,
    pub text: String,
    /// Flat scalar metadata (already sanitized).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Client for the external vector store.
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    fn ensure_collection(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Upsert a batch of documents by id into a collection. The whole batch
    /// succeeds or fails together.
    fn upsert(
        &self,
        collection: &str,
        items: &[UpsertItem],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// HttpVectorStore
// ---------------------------------------------------------------------------

/// HTTP implementation of the vector store contract.
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorStore {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LexicaError::Index(format!("Failed to build client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn upsert_once(&self, collection: &str, items: &[UpsertItem]) -> Result<()> {
        let url = format!("{}/collections/{}/upsert", self.base_url, collection);
        let body = serde_json::json!({ "documents": items });
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LexicaError::Index(format!("Upsert request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| LexicaError::Index(format!("Store rejected upsert: {}", e)))?;
        Ok(())
    }
}

impl VectorStore for HttpVectorStore {
    async fn ensure_collection(&self, name: &str) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| LexicaError::Index(format!("Create collection failed: {}", e)))?;

        // An existing collection is success; creation must be idempotent.
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(LexicaError::Index(format!(
                "Create collection {} returned {}",
                name,
                response.status()
            )))
        }
    }

    async fn upsert(&self, collection: &str, items: &[UpsertItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        match self.upsert_once(collection, items).await {
            Ok(()) => Ok(()),
            Err(first) => {
                // One retry for transient failures, then give up: the rows
                // stay failed and the next scheduled run picks them up.
                warn!(collection, error = %first, "Upsert batch failed, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                self.upsert_once(collection, items).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockVectorStore
// ---------------------------------------------------------------------------

/// In-memory vector store for tests.
///
/// Stores (id → document) per collection, counts upsert calls, and can be
/// told to fail whole collections to exercise error paths.
#[derive(Debug, Default)]
pub struct MockVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, UpsertItem>>>,
    failing: Mutex<HashSet<String>>,
    upsert_calls: AtomicU64,
    documents_received: AtomicU64,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert into `collection` fail until cleared.
    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().unwrap().insert(collection.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Number of `upsert` calls that reached the store.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Total documents received across all upsert calls (re-sent documents
    /// count again).
    pub fn documents_received(&self) -> u64 {
        self.documents_received.load(Ordering::SeqCst)
    }

    /// Number of distinct documents currently held in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Fetch one stored document.
    pub fn get(&self, collection: &str, id: &str) -> Option<UpsertItem> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }
}

impl VectorStore for MockVectorStore {
    async fn ensure_collection(&self, name: &str) -> Result<()> {
        self.collections
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, items: &[UpsertItem]) -> Result<()> {
        if self.failing.lock().unwrap().contains(collection) {
            return Err(LexicaError::Index(format!(
                "mock store failing collection {}",
                collection
            )));
        }
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.documents_received
            .fetch_add(items.len() as u64, Ordering::SeqCst);

        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        for item in items {
            debug!(collection, id = %item.id, "Mock upsert");
            docs.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, text: &str) -> UpsertItem {
        UpsertItem {
            id: id.to_string(),
            text: text.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_upsert_by_id_is_idempotent() {
        let store = MockVectorStore::new();
        store.ensure_collection("c").await.unwrap();

        store.upsert("c", &[item("d1", "v1")]).await.unwrap();
        store.upsert("c", &[item("d1", "v1")]).await.unwrap();

        // Same id twice: still one document.
        assert_eq!(store.document_count("c"), 1);
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_upsert_overwrites_content() {
        let store = MockVectorStore::new();
        store.upsert("c", &[item("d1", "old")]).await.unwrap();
        store.upsert("c", &[item("d1", "new")]).await.unwrap();

        assert_eq!(store.get("c", "d1").unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let store = MockVectorStore::new();
        store.fail_collection("c");
        assert!(store.upsert("c", &[item("d1", "v")]).await.is_err());
        assert_eq!(store.document_count("c"), 0);

        store.clear_failures();
        assert!(store.upsert("c", &[item("d1", "v")]).await.is_ok());
        assert_eq!(store.document_count("c"), 1);
    }

    #[tokio::test]
    async fn test_mock_ensure_collection() {
        let store = MockVectorStore::new();
        store.ensure_collection("fresh").await.unwrap();
        assert_eq!(store.document_count("fresh"), 0);
        // Idempotent.
        store.ensure_collection("fresh").await.unwrap();
    }

    #[test]
    fn test_http_store_builds_from_config() {
        let config = IndexConfig::default();
        let store = HttpVectorStore::new(&config).unwrap();
        assert_eq!(store.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_http_store_trims_trailing_slash() {
        let config = IndexConfig {
            base_url: "http://store:9000/".to_string(),
            ..Default::default()
        };
        let store = HttpVectorStore::new(&config).unwrap();
        assert_eq!(store.base_url, "http://store:9000");
    }
}
