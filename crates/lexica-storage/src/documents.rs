//! Repository for the documents state table.
//!
//! A document row is one packaged entity per target language, keyed by
//! (entity, natural_key, lang). Packaging writes text/metadata/hash and
//! queues the row; the index reconciler owns the state/last_error columns.
//! Re-packaging overwrites in place, never duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;

use lexica_core::error::LexicaError;
use lexica_core::hash::ContentHash;
use lexica_core::types::{ChangeMode, DocumentState, EntityKind};

use crate::db::Database;

/// Truncation limit for persisted error text.
const ERROR_TEXT_LIMIT: usize = 2000;

fn storage_err(context: &str, e: impl std::fmt::Display) -> LexicaError {
    LexicaError::Storage(format!("{}: {}", context, e))
}

/// A document row.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub entity: EntityKind,
    pub natural_key: String,
    pub lang: String,
    pub doc_id: String,
    pub doc_text: String,
    pub metadata: serde_json::Value,
    pub source_hash: ContentHash,
    pub collection: String,
    pub state: DocumentState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a packaged document write.
#[derive(Debug, Clone)]
pub struct PackagedDocument {
    pub entity: EntityKind,
    pub natural_key: String,
    pub lang: String,
    pub doc_id: String,
    pub doc_text: String,
    pub metadata: serde_json::Value,
    pub source_hash: ContentHash,
    pub collection: String,
}

/// Outcome of gating a packaged document against the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOutcome {
    /// The row was inserted or refreshed and is now `queued`.
    Queued,
    /// The stored hash matched; nothing was written.
    SkippedNoChange,
}

/// Repository for document rows.
pub struct DocumentRepository {
    db: Arc<Database>,
}

impl DocumentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Gate a packaged document against the stored row and write
    /// accordingly.
    ///
    /// Unchanged hashes are a no-op unless `ForceOverwrite`. Any real write
    /// resets the row to `queued` with a cleared error and attempt counter,
    /// so the reconciler picks it up on its next run.
    pub fn upsert_packaged(
        &self,
        doc: &PackagedDocument,
        mode: ChangeMode,
    ) -> Result<PackOutcome, LexicaError> {
        let metadata = serde_json::to_string(&doc.metadata)?;
        self.db.with_conn(|conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, source_hash
                     FROM documents
                     WHERE entity = ?1 AND natural_key = ?2 AND lang = ?3",
                    rusqlite::params![doc.entity.as_str(), doc.natural_key, doc.lang],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| storage_err("Failed to read document row", e))?;

            match existing {
                Some((_, stored_hash))
                    if stored_hash == doc.source_hash.as_str()
                        && mode != ChangeMode::ForceOverwrite =>
                {
                    Ok(PackOutcome::SkippedNoChange)
                }
                _ => {
                    conn.execute(
                        "INSERT INTO documents
                             (entity, natural_key, lang, doc_id, doc_text,
                              metadata, source_hash, collection, state)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'queued')
                         ON CONFLICT (entity, natural_key, lang) DO UPDATE SET
                             doc_id      = excluded.doc_id,
                             doc_text    = excluded.doc_text,
                             metadata    = excluded.metadata,
                             source_hash = excluded.source_hash,
                             collection  = excluded.collection,
                             state       = 'queued',
                             attempts    = 0,
                             last_error  = NULL,
                             updated_at  = strftime('%s', 'now')",
                        rusqlite::params![
                            doc.entity.as_str(),
                            doc.natural_key,
                            doc.lang,
                            doc.doc_id,
                            doc.doc_text,
                            metadata,
                            doc.source_hash.as_str(),
                            doc.collection,
                        ],
                    )
                    .map_err(|e| storage_err("Failed to upsert document", e))?;
                    debug!(natural_key = %doc.natural_key, lang = %doc.lang, "Document queued");
                    Ok(PackOutcome::Queued)
                }
            }
        })
    }

    /// Select up to `limit` rows eligible for upsert: `queued` rows, plus
    /// `failed` rows under the attempt cap when `retry_failed` is set.
    /// Optional collection filter, id order.
    pub fn list_queued(
        &self,
        collections: Option<&[String]>,
        limit: u32,
        retry_failed: bool,
        max_attempts: u32,
    ) -> Result<Vec<DocumentRow>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if retry_failed {
                clauses.push(format!(
                    "(state = 'queued' OR (state = 'failed' AND attempts < ?{}))",
                    params.len() + 1
                ));
                params.push(Box::new(max_attempts as i64));
            } else {
                clauses.push("state = 'queued'".to_string());
            }

            if let Some(collections) = collections {
                if !collections.is_empty() {
                    let ph = (0..collections.len())
                        .map(|i| format!("?{}", params.len() + i + 1))
                        .collect::<Vec<_>>()
                        .join(", ");
                    clauses.push(format!("collection IN ({})", ph));
                    for c in collections {
                        params.push(Box::new(c.to_string()));
                    }
                }
            }

            params.push(Box::new(limit as i64));
            let sql = format!(
                "SELECT id, entity, natural_key, lang, doc_id, doc_text,
                        metadata, source_hash, collection, state, attempts, last_error, updated_at
                 FROM documents
                 WHERE {}
                 ORDER BY id ASC
                 LIMIT ?{}",
                clauses.join(" AND "),
                params.len()
            );

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("Failed to prepare queued list", e))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_document_row(row)))
                .map_err(|e| storage_err("Failed to list queued", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("document row", e))??);
            }
            Ok(out)
        })
    }

    /// Transition a row to `upserted`, clearing the error.
    pub fn mark_upserted(&self, id: i64) -> Result<(), LexicaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE documents
                 SET state      = 'upserted',
                     last_error = NULL,
                     updated_at = strftime('%s', 'now')
                 WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| storage_err("Failed to mark upserted", e))?;
            Ok(())
        })
    }

    /// Transition a row to `failed`, recording the error and bumping the
    /// attempt counter. Document text and metadata stay intact for retry.
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), LexicaError> {
        let truncated: String = error.chars().take(ERROR_TEXT_LIMIT).collect();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE documents
                 SET state      = 'failed',
                     last_error = ?1,
                     attempts   = attempts + 1,
                     updated_at = strftime('%s', 'now')
                 WHERE id = ?2",
                rusqlite::params![truncated, id],
            )
            .map_err(|e| storage_err("Failed to mark failed", e))?;
            Ok(())
        })
    }

    /// Find one row by its full unique key.
    pub fn find(
        &self,
        entity: EntityKind,
        natural_key: &str,
        lang: &str,
    ) -> Result<Option<DocumentRow>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, entity, natural_key, lang, doc_id, doc_text,
                        metadata, source_hash, collection, state, attempts, last_error, updated_at
                 FROM documents
                 WHERE entity = ?1 AND natural_key = ?2 AND lang = ?3",
                rusqlite::params![entity.as_str(), natural_key, lang],
                |row| Ok(map_document_row(row)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to find document", e))?
            .transpose()
        })
    }

    /// All rows for one natural key across languages, newest first.
    pub fn find_by_natural_key(&self, natural_key: &str) -> Result<Vec<DocumentRow>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, entity, natural_key, lang, doc_id, doc_text,
                            metadata, source_hash, collection, state, attempts, last_error, updated_at
                    FROM documents
                     WHERE natural_key = ?1
                     ORDER BY updated_at DESC, id DESC",
                )
                .map_err(|e| storage_err("Failed to prepare document trace", e))?;
            let rows = stmt
                .query_map(rusqlite::params![natural_key], |row| Ok(map_document_row(row)))
                .map_err(|e| storage_err("Failed to trace documents", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("document row", e))??);
            }
            Ok(out)
        })
    }

    /// Per-state row counts, zero-filled for absent states.
    pub fn counts_by_state(&self) -> Result<HashMap<DocumentState, u64>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut counts: HashMap<DocumentState, u64> = DocumentState::all()
                .into_iter()
                .map(|s| (s, 0))
                .collect();

            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM documents GROUP BY state")
                .map_err(|e| storage_err("Failed to prepare counts", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| storage_err("Failed to count states", e))?;

            for row in rows {
                let (state, count) = row.map_err(|e| storage_err("count row", e))?;
                if let Ok(state) = state.parse::<DocumentState>() {
                    counts.insert(state, count as u64);
                }
            }
            Ok(counts)
        })
    }
}

fn map_document_row(row: &rusqlite::Row<'_>) -> Result<DocumentRow, LexicaError> {
    let entity: String = row.get(1).map_err(|e| storage_err("entity", e))?;
    let metadata_raw: String = row.get(6).map_err(|e| storage_err("metadata", e))?;
    let state: String = row.get(9).map_err(|e| storage_err("state", e))?;
    Ok(DocumentRow {
        id: row.get(0).map_err(|e| storage_err("id", e))?,
        entity: entity.parse().map_err(|e| storage_err("entity", e))?,
        natural_key: row.get(2).map_err(|e| storage_err("natural_key", e))?,
        lang: row.get(3).map_err(|e| storage_err("lang", e))?,
        doc_id: row.get(4).map_err(|e| storage_err("doc_id", e))?,
        doc_text: row.get(5).map_err(|e| storage_err("doc_text", e))?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
        source_hash: ContentHash::from_stored(
            row.get::<_, String>(7).map_err(|e| storage_err("source_hash", e))?,
        ),
        collection: row.get(8).map_err(|e| storage_err("collection", e))?,
        state: state.parse().map_err(|e| storage_err("state", e))?,
        attempts: row.get(10).map_err(|e| storage_err("attempts", e))?,
        last_error: row.get(11).map_err(|e| storage_err("last_error", e))?,
        updated_at: DateTime::from_timestamp(
            row.get::<_, i64>(12).map_err(|e| storage_err("updated_at", e))?,
            0,
        )
        .unwrap_or_default(),
    })
}
