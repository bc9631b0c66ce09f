//! Operational status: per-state counts and per-key tracing.
//!
//! Failure surfaces to operators only as elevated `failed` counts here and
//! per-record `last_error` text; there is no interactive failure path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lexica_core::error::Result;
use lexica_core::types::{DocumentState, EntityKind, TranslationState};
use lexica_storage::{
    Database, DocumentRepository, DocumentRow, TranslationRepository, TranslationRow,
};

/// Per-state translation counts, zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationCounts {
    pub pending: u64,
    pub translated: u64,
    pub failed: u64,
}

/// Per-state document counts, zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCounts {
    pub queued: u64,
    pub upserted: u64,
    pub failed: u64,
}

/// Counts of records per state across both state tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub translations: TranslationCounts,
    pub documents: DocumentCounts,
}

/// One translation row, shaped for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSnapshot {
    pub natural_key: String,
    pub entity: EntityKind,
    pub src_lang: String,
    pub tgt_lang: String,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub state: TranslationState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<TranslationRow> for TranslationSnapshot {
    fn from(row: TranslationRow) -> Self {
        Self {
            natural_key: row.natural_key,
            entity: row.entity,
            src_lang: row.src_lang,
            tgt_lang: row.tgt_lang,
            source_text: row.source_text,
            translated_text: row.translated_text,
            state: row.state,
            attempts: row.attempts,
            last_error: row.last_error,
            updated_at: row.updated_at,
        }
    }
}

/// One document row, shaped for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub doc_id: String,
    pub natural_key: String,
    pub entity: EntityKind,
    pub lang: String,
    pub collection: String,
    pub state: DocumentState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<DocumentRow> for DocumentSnapshot {
    fn from(row: DocumentRow) -> Self {
        Self {
            doc_id: row.doc_id,
            natural_key: row.natural_key,
            entity: row.entity,
            lang: row.lang,
            collection: row.collection,
            state: row.state,
            attempts: row.attempts,
            last_error: row.last_error,
            updated_at: row.updated_at,
        }
    }
}

/// Pipeline state for one natural key, across both state tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub natural_key: String,
    pub translation: Option<TranslationSnapshot>,
    pub documents: Vec<DocumentSnapshot>,
}

/// Read-only status queries over the state tables.
pub struct StatusService {
    translations: TranslationRepository,
    documents: DocumentRepository,
}

impl StatusService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            translations: TranslationRepository::new(Arc::clone(&db)),
            documents: DocumentRepository::new(db),
        }
    }

    /// Counts of records per state, zero-filled for absent states.
    pub fn summary(&self) -> Result<StatusSummary> {
        let t = self.translations.counts_by_state()?;
        let d = self.documents.counts_by_state()?;
        Ok(StatusSummary {
            translations: TranslationCounts {
                pending: t.get(&TranslationState::Pending).copied().unwrap_or(0),
                translated: t.get(&TranslationState::Translated).copied().unwrap_or(0),
                failed: t.get(&TranslationState::Failed).copied().unwrap_or(0),
            },
            documents: DocumentCounts {
                queued: d.get(&DocumentState::Queued).copied().unwrap_or(0),
                upserted: d.get(&DocumentState::Upserted).copied().unwrap_or(0),
                failed: d.get(&DocumentState::Failed).copied().unwrap_or(0),
            },
        })
    }

    /// Trace one natural key through the pipeline: its newest translation
    /// row and every document row.
    pub fn trace(&self, natural_key: &str) -> Result<TraceReport> {
        let translation = self
            .translations
            .find_latest_by_natural_key(natural_key)?
            .map(TranslationSnapshot::from);
        let documents = self
            .documents
            .find_by_natural_key(natural_key)?
            .into_iter()
            .map(DocumentSnapshot::from)
            .collect();
        Ok(TraceReport {
            natural_key: natural_key.to_string(),
            translation,
            documents,
        })
    }
}
