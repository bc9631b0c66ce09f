//! Repository for the translations state table.
//!
//! The unique key (entity, natural_key, src_lang, tgt_lang) is the
//! concurrency-control primitive: every write is an insert-or-update against
//! that key, so racing workers converge to one consistent row instead of
//! duplicating or corrupting state. A write that finds the row already in the
//! intended state degrades to a no-op, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;

use lexica_core::error::LexicaError;
use lexica_core::hash::ContentHash;
use lexica_core::identity::NaturalKey;
use lexica_core::types::{ChangeMode, EntityKind, TranslationState};

use crate::db::Database;

/// Truncation limit for persisted error text.
const ERROR_TEXT_LIMIT: usize = 500;

fn storage_err(context: &str, e: impl std::fmt::Display) -> LexicaError {
    LexicaError::Storage(format!("{}: {}", context, e))
}

/// A translation row.
#[derive(Debug, Clone)]
pub struct TranslationRow {
    pub id: i64,
    pub entity: EntityKind,
    pub natural_key: String,
    pub src_lang: String,
    pub tgt_lang: String,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub source_hash: ContentHash,
    pub state: TranslationState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of gating a source text against the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUpsertOutcome {
    /// No prior row existed; a pending row was inserted.
    Inserted,
    /// The stored hash differed (or the mode forced it); the row was reset
    /// to pending with the new source text.
    Updated,
    /// The stored hash matched; nothing was written.
    SkippedNoChange,
    /// A row existed and the mode forbids touching it.
    SkippedExisting,
}

/// Repository for translation rows.
pub struct TranslationRepository {
    db: Arc<Database>,
}

impl TranslationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Gate a source text against the stored row and write accordingly.
    ///
    /// New keys insert a `pending` row. Existing keys update in place only
    /// when the hash changed (or `ForceOverwrite` is set); the update resets
    /// translated text, error, and attempts so the row re-enters the pending
    /// pool. A concurrent writer that got there first turns the update into
    /// a no-op reported as `SkippedNoChange`.
    pub fn upsert_source(
        &self,
        entity: EntityKind,
        natural_key: &NaturalKey,
        src_lang: &str,
        tgt_lang: &str,
        source_text: &str,
        source_hash: &ContentHash,
        mode: ChangeMode,
    ) -> Result<SourceUpsertOutcome, LexicaError> {
        self.db.with_conn(|conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, source_hash
                     FROM translations
                     WHERE entity = ?1 AND natural_key = ?2
                       AND src_lang = ?3 AND tgt_lang = ?4",
                    rusqlite::params![entity.as_str(), natural_key.as_str(), src_lang, tgt_lang],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| storage_err("Failed to read translation row", e))?;

            match existing {
                None => {
                    // ON CONFLICT absorbs the insert/insert race: the loser
                    // falls through to the same conditional update.
                    conn.execute(
                        "INSERT INTO translations
                             (entity, natural_key, src_lang, tgt_lang,
                              source_text, translated_text, source_hash, state)
                         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 'pending')
                         ON CONFLICT (entity, natural_key, src_lang, tgt_lang) DO UPDATE SET
                             source_text     = excluded.source_text,
                             source_hash     = excluded.source_hash,
                             translated_text = NULL,
                             state           = 'pending',
                             attempts        = 0,
                             last_error      = NULL,
                             updated_at      = strftime('%s', 'now')
                         WHERE translations.source_hash != excluded.source_hash",
                        rusqlite::params![
                            entity.as_str(),
                            natural_key.as_str(),
                            src_lang,
                            tgt_lang,
                            source_text,
                            source_hash.as_str(),
                        ],
                    )
                    .map_err(|e| storage_err("Failed to insert translation row", e))?;
                    debug!(natural_key = %natural_key, "Translation row inserted");
                    Ok(SourceUpsertOutcome::Inserted)
                }
                Some(_) if mode == ChangeMode::SkipExisting => {
                    Ok(SourceUpsertOutcome::SkippedExisting)
                }
                Some((_, stored_hash))
                    if stored_hash == source_hash.as_str()
                        && mode != ChangeMode::ForceOverwrite =>
                {
                    Ok(SourceUpsertOutcome::SkippedNoChange)
                }
                Some((id, _)) => {
                    let force = mode == ChangeMode::ForceOverwrite;
                    let changed = conn
                        .execute(
                            "UPDATE translations
                             SET source_text     = ?1,
                                 source_hash     = ?2,
                                 translated_text = NULL,
                                 state           = 'pending',
                                 attempts        = 0,
                                 last_error      = NULL,
                                 updated_at      = strftime('%s', 'now')
                             WHERE id = ?3 AND (source_hash != ?2 OR ?4)",
                            rusqlite::params![source_text, source_hash.as_str(), id, force],
                        )
                        .map_err(|e| storage_err("Failed to update translation row", e))?;
                    if changed == 0 {
                        // Lost the race: another worker already wrote this hash.
                        Ok(SourceUpsertOutcome::SkippedNoChange)
                    } else {
                        debug!(natural_key = %natural_key, "Translation row reset to pending");
                        Ok(SourceUpsertOutcome::Updated)
                    }
                }
            }
        })
    }

    /// Select up to `limit` rows eligible for translation: `pending` rows
    /// plus `failed` rows that have not exhausted `max_attempts`, id order.
    pub fn pick_pending(
        &self,
        limit: u32,
        entities: Option<&[EntityKind]>,
        src_lang: &str,
        tgt_lang: &str,
        max_attempts: u32,
    ) -> Result<Vec<TranslationRow>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut clauses = vec![
                "(state = 'pending' OR (state = 'failed' AND attempts < ?1))".to_string(),
                "src_lang = ?2".to_string(),
                "tgt_lang = ?3".to_string(),
            ];
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
                Box::new(max_attempts as i64),
                Box::new(src_lang.to_string()),
                Box::new(tgt_lang.to_string()),
            ];

            if let Some(entities) = entities {
                if !entities.is_empty() {
                    let ph = (0..entities.len())
                        .map(|i| format!("?{}", params.len() + i + 1))
                        .collect::<Vec<_>>()
                        .join(", ");
                    clauses.push(format!("entity IN ({})", ph));
                    for e in entities {
                        params.push(Box::new(e.as_str().to_string()));
                    }
                }
            }

            params.push(Box::new(limit as i64));
            let sql = format!(
                "SELECT id, entity, natural_key, src_lang, tgt_lang,
                        source_text, translated_text, source_hash, state, attempts, last_error, updated_at
                 FROM translations
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
                .map_err(|e| storage_err("Failed to prepare pending pick", e))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_translation_row(row)))
                .map_err(|e| storage_err("Failed to pick pending", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("translation row", e))??);
            }
            Ok(out)
        })
    }

    /// Transition a row to `translated`, storing the text and clearing the
    /// error. A single atomic statement per record.
    pub fn mark_translated(&self, id: i64, translated_text: &str) -> Result<(), LexicaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE translations
                 SET translated_text = ?1,
                     state           = 'translated',
                     last_error      = NULL,
                     updated_at      = strftime('%s', 'now')
                 WHERE id = ?2",
                rusqlite::params![translated_text, id],
            )
            .map_err(|e| storage_err("Failed to mark translated", e))?;
            Ok(())
        })
    }

    /// Transition a row to `failed`, recording the error and bumping the
    /// attempt counter.
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), LexicaError> {
        let truncated: String = error.chars().take(ERROR_TEXT_LIMIT).collect();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE translations
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

    /// Select up to `limit` `translated` rows for packaging, id order.
    pub fn list_translated(
        &self,
        entities: &[EntityKind],
        limit: u32,
    ) -> Result<Vec<TranslationRow>, LexicaError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let ph = (0..entities.len())
                .map(|i| format!("?{}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT id, entity, natural_key, src_lang, tgt_lang,
                        source_text, translated_text, source_hash, state, attempts, last_error, updated_at
                 FROM translations
                 WHERE state = 'translated' AND entity IN ({})
                 ORDER BY id ASC
                 LIMIT ?{}",
                ph,
                entities.len() + 1
            );

            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = entities
                .iter()
                .map(|e| Box::new(e.as_str().to_string()) as Box<dyn rusqlite::types::ToSql>)
                .collect();
            params.push(Box::new(limit as i64));
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("Failed to prepare translated list", e))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_translation_row(row)))
                .map_err(|e| storage_err("Failed to list translated", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("translation row", e))??);
            }
            Ok(out)
        })
    }

    /// Find one row by its full unique key.
    pub fn find(
        &self,
        entity: EntityKind,
        natural_key: &str,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<Option<TranslationRow>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, entity, natural_key, src_lang, tgt_lang,
                        source_text, translated_text, source_hash, state, attempts, last_error, updated_at
                 FROM translations
                 WHERE entity = ?1 AND natural_key = ?2
                   AND src_lang = ?3 AND tgt_lang = ?4",
                rusqlite::params![entity.as_str(), natural_key, src_lang, tgt_lang],
                |row| Ok(map_translation_row(row)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to find translation", e))?
            .transpose()
        })
    }

    /// Find the newest row for a natural key regardless of language pair.
    pub fn find_latest_by_natural_key(
        &self,
        natural_key: &str,
    ) -> Result<Option<TranslationRow>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, entity, natural_key, src_lang, tgt_lang,
                        source_text, translated_text, source_hash, state, attempts, last_error, updated_at
                 FROM translations
                 WHERE natural_key = ?1
                 ORDER BY updated_at DESC, id DESC
                 LIMIT 1",
                rusqlite::params![natural_key],
                |row| Ok(map_translation_row(row)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to trace translation", e))?
            .transpose()
        })
    }

    /// Per-state row counts, zero-filled for absent states.
    pub fn counts_by_state(&self) -> Result<HashMap<TranslationState, u64>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut counts: HashMap<TranslationState, u64> = TranslationState::all()
                .into_iter()
                .map(|s| (s, 0))
                .collect();

            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM translations GROUP BY state")
                .map_err(|e| storage_err("Failed to prepare counts", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| storage_err("Failed to count states", e))?;

            for row in rows {
                let (state, count) = row.map_err(|e| storage_err("count row", e))?;
                if let Ok(state) = state.parse::<TranslationState>() {
                    counts.insert(state, count as u64);
                }
            }
            Ok(counts)
        })
    }
}

fn map_translation_row(row: &rusqlite::Row<'_>) -> Result<TranslationRow, LexicaError> {
    let entity: String = row.get(1).map_err(|e| storage_err("entity", e))?;
    let state: String = row.get(8).map_err(|e| storage_err("state", e))?;
    Ok(TranslationRow {
        id: row.get(0).map_err(|e| storage_err("id", e))?,
        entity: entity.parse().map_err(|e| storage_err("entity", e))?,
        natural_key: row.get(2).map_err(|e| storage_err("natural_key", e))?,
        src_lang: row.get(3).map_err(|e| storage_err("src_lang", e))?,
        tgt_lang: row.get(4).map_err(|e| storage_err("tgt_lang", e))?,
        source_text: row.get(5).map_err(|e| storage_err("source_text", e))?,
        translated_text: row.get(6).map_err(|e| storage_err("translated_text", e))?,
        source_hash: ContentHash::from_stored(
            row.get::<_, String>(7).map_err(|e| storage_err("source_hash", e))?,
        ),
        state: state.parse().map_err(|e| storage_err("state", e))?,
        attempts: row.get(9).map_err(|e| storage_err("attempts", e))?,
        last_error: row.get(10).map_err(|e| storage_err("last_error", e))?,
        updated_at: DateTime::from_timestamp(
            row.get::<_, i64>(11).map_err(|e| storage_err("updated_at", e))?,
            0,
        )
        .unwrap_or_default(),
    })
}
