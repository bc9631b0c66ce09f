//! Indexing reconciler: queued documents → external vector store.
//!
//! Selects queued (optionally failed-for-retry) document rows, pushes them to
//! the store grouped by collection, and reconciles row state against the
//! actual upsert outcomes. Because the document id derives only from
//! (entity, natural key, language), re-upserting an unchanged document is a
//! true no-op at the store; and because upserted rows leave the selection,
//! re-running the reconciler with nothing queued calls the store zero times.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lexica_core::error::Result;
use lexica_core::hash::truncate_utf8;
use lexica_storage::{Database, DocumentRepository, DocumentRow};

use crate::client::{UpsertItem, VectorStore};

/// 16 KiB safety limit for document text sent to the store.
const MAX_DOC_BYTES: usize = 16 * 1024;

/// 8 KiB limit per metadata string value.
const MAX_META_STRING_BYTES: usize = 8 * 1024;

/// One per-document failure, for operator reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexErrorDetail {
    pub doc_id: String,
    pub reason: String,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexReport {
    /// Rows selected for this batch.
    pub processed: u64,
    /// Rows confirmed in the store.
    pub upserted: u64,
    /// Rows counted but not acted on (dry run).
    pub skipped: u64,
    /// Rows that failed and were recorded as such.
    pub failed: u64,
    /// Per-document failure reasons.
    pub errors: Vec<IndexErrorDetail>,
}

/// The indexing reconciler.
pub struct IndexReconciler<S: VectorStore> {
    documents: DocumentRepository,
    store: S,
    retry_failed: bool,
    max_attempts: u32,
}

impl<S: VectorStore> IndexReconciler<S> {
    pub fn new(db: Arc<Database>, store: S, retry_failed: bool, max_attempts: u32) -> Self {
        Self {
            documents: DocumentRepository::new(db),
            store,
            retry_failed,
            max_attempts,
        }
    }

    /// Run one bounded reconciliation batch.
    ///
    /// `dry_run` performs the selection and reports counts without calling
    /// the store or mutating any state. Otherwise each document's state
    /// transition is one atomic update, so a killed run leaves finished
    /// documents finalized and the rest selectable on the next trigger.
    pub async fn run(
        &self,
        collections: Option<&[String]>,
        limit: u32,
        dry_run: bool,
    ) -> Result<IndexReport> {
        let rows = self
            .documents
            .list_queued(collections, limit, self.retry_failed, self.max_attempts)?;

        let mut report = IndexReport {
            processed: rows.len() as u64,
            ..Default::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        if dry_run {
            info!(processed = report.processed, "Index dry run only");
            report.skipped = report.processed;
            return Ok(report);
        }

        // Group by collection; BTreeMap keeps run order deterministic.
        let mut by_collection: BTreeMap<String, Vec<DocumentRow>> = BTreeMap::new();
        for row in rows {
            by_collection.entry(row.collection.clone()).or_default().push(row);
        }

        for (collection, docs) in by_collection {
            info!(collection = %collection, queued = docs.len(), "Reconciling collection");
            let items: Vec<UpsertItem> = docs.iter().map(to_upsert_item).collect();

            let outcome = match self.store.ensure_collection(&collection).await {
                Ok(()) => self.store.upsert(&collection, &items).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    for doc in &docs {
                        self.documents.mark_upserted(doc.id)?;
                        report.upserted += 1;
                    }
                }
                Err(e) => {
                    // Batch-level failure: every document in this collection
                    // batch is recorded failed, text and metadata intact for
                    // the next run. Other collections continue.
                    let reason = e.to_string();
                    warn!(collection = %collection, error = %reason, "Upsert batch failed");
                    for doc in &docs {
                        self.documents.mark_failed(doc.id, &reason)?;
                        report.failed += 1;
                        report.errors.push(IndexErrorDetail {
                            doc_id: doc.doc_id.clone(),
                            reason: truncate_utf8(&reason, 400).to_string(),
                        });
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            upserted = report.upserted,
            failed = report.failed,
            "Index reconciliation complete"
        );
        Ok(report)
    }
}

fn to_upsert_item(row: &DocumentRow) -> UpsertItem {
    UpsertItem {
        id: row.doc_id.clone(),
        text: truncate_utf8(&row.doc_text, MAX_DOC_BYTES).to_string(),
        metadata: sanitize_metadata(&row.metadata),
    }
}

/// Flatten metadata to the scalar-only shape the store accepts.
///
/// Scalars pass through; arrays of scalars join with commas; anything else
/// is JSON-encoded. String values clip to 8 KiB without splitting UTF-8.
pub fn sanitize_metadata(
    metadata: &serde_json::Value,
) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    let Some(object) = metadata.as_object() else {
        return out;
    };

    for (key, value) in object {
        let sanitized = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.clone(),
            serde_json::Value::String(s) => {
                serde_json::Value::String(truncate_utf8(s, MAX_META_STRING_BYTES).to_string())
            }
            serde_json::Value::Array(items)
                if items.iter().all(|i| {
                    i.is_null() || i.is_boolean() || i.is_number() || i.is_string()
                }) =>
            {
                let joined = items
                    .iter()
                    .filter(|i| !i.is_null())
                    .map(|i| match i {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                serde_json::Value::String(truncate_utf8(&joined, MAX_META_STRING_BYTES).to_string())
            }
            other => {
                let encoded = other.to_string();
                serde_json::Value::String(
                    truncate_utf8(&encoded, MAX_META_STRING_BYTES).to_string(),
                )
            }
        };
        out.insert(key.clone(), sanitized);
    }
    out
}
