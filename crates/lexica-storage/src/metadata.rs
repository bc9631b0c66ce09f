//! Repositories for the metadata tables.
//!
//! The metadata tables are the authoritative relational model of the source
//! system's UI definitions. They are written only by import/extraction code;
//! the translation and packaging stages read them and never mutate them.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lexica_core::error::LexicaError;
use lexica_core::types::ViewType;

use crate::db::Database;

fn storage_err(context: &str, e: impl std::fmt::Display) -> LexicaError {
    LexicaError::Storage(format!("{}: {}", context, e))
}

fn labels_to_json(labels: &HashMap<String, String>) -> Result<String, LexicaError> {
    serde_json::to_string(labels).map_err(LexicaError::from)
}

fn labels_from_json(raw: &str) -> HashMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Build `?N, ?N+1, ...` placeholders for a dynamic IN clause.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Records
// =============================================================================

/// A business model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: i64,
    pub model: String,
    pub model_table: String,
    pub labels: HashMap<String, String>,
    pub notes: String,
}

/// A model field row. `labels` maps language codes to display labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: i64,
    pub model: String,
    pub model_table: String,
    pub field_name: String,
    pub ttype: String,
    pub labels: HashMap<String, String>,
    pub notes: String,
}

/// An action-level view definition row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewCommonRecord {
    pub id: i64,
    pub action_xmlid: String,
    pub action_name: String,
    pub model: String,
    pub model_table: String,
    pub view_types: Vec<ViewType>,
    pub primary_view_type: Option<ViewType>,
    pub purpose: String,
    pub purpose_labels: HashMap<String, String>,
    pub help_source_text: String,
    pub help_target_text: String,
}

/// A per-presentation-type view detail row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDetailRecord {
    pub id: i64,
    pub common_id: i64,
    pub view_type: ViewType,
    pub enabled: bool,
    pub is_primary: bool,
}

/// A notebook tab under a view detail row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: i64,
    pub view_id: i64,
    pub name: String,
    pub sequence: i64,
}

/// A smart button under a view detail row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartButtonRecord {
    pub id: i64,
    pub view_id: i64,
    pub name: String,
    pub action_xmlid: String,
    pub sequence: i64,
}

/// An application menu entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuRecord {
    pub id: i64,
    pub menu_xmlid: String,
    pub name: String,
    pub parent_xmlid: Option<String>,
    pub action_xmlid: Option<String>,
    pub sequence: i64,
}

// =============================================================================
// Upsert inputs (also the import seed shapes)
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewModel {
    pub model: String,
    #[serde(default)]
    pub model_table: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewField {
    pub model: String,
    #[serde(default)]
    pub model_table: String,
    pub field_name: String,
    #[serde(default)]
    pub ttype: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewViewCommon {
    pub action_xmlid: String,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub model_table: String,
    #[serde(default)]
    pub view_types: Vec<ViewType>,
    #[serde(default)]
    pub primary_view_type: Option<ViewType>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub purpose_labels: HashMap<String, String>,
    #[serde(default)]
    pub help_source_text: String,
    #[serde(default)]
    pub help_target_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMenu {
    pub menu_xmlid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_xmlid: Option<String>,
    #[serde(default)]
    pub action_xmlid: Option<String>,
    #[serde(default)]
    pub sequence: i64,
}

// =============================================================================
// ModelRepository
// =============================================================================

/// Repository for business model rows.
pub struct ModelRepository {
    db: Arc<Database>,
}

impl ModelRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a model keyed by its technical name. Touches
    /// `updated_at` on every write.
    pub fn upsert(&self, new: &NewModel) -> Result<i64, LexicaError> {
        let labels = labels_to_json(&new.labels)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO models (model, model_table, labels, notes)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (model) DO UPDATE SET
                     model_table = excluded.model_table,
                     labels      = excluded.labels,
                     notes       = excluded.notes,
                     updated_at  = strftime('%s', 'now')",
                rusqlite::params![new.model, new.model_table, labels, new.notes],
            )
            .map_err(|e| storage_err("Failed to upsert model", e))?;

            conn.query_row(
                "SELECT id FROM models WHERE model = ?1",
                rusqlite::params![new.model],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read model id", e))
        })
    }

    /// Find a model by technical name.
    pub fn find(&self, model: &str) -> Result<Option<ModelRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, model, model_table, labels, notes
                 FROM models WHERE model = ?1",
                rusqlite::params![model],
                |row| {
                    Ok(ModelRecord {
                        id: row.get(0)?,
                        model: row.get(1)?,
                        model_table: row.get(2)?,
                        labels: labels_from_json(&row.get::<_, String>(3)?),
                        notes: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| storage_err("Failed to find model", e))
        })
    }
}

// =============================================================================
// FieldRepository
// =============================================================================

/// Repository for model field rows.
pub struct FieldRepository {
    db: Arc<Database>,
}

impl FieldRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a field keyed by (model, field name).
    pub fn upsert(&self, new: &NewField) -> Result<i64, LexicaError> {
        let labels = labels_to_json(&new.labels)?;
        let ttype = if new.ttype.is_empty() { "char" } else { new.ttype.as_str() };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO fields (model, model_table, field_name, ttype, labels, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (model, field_name) DO UPDATE SET
                     model_table = excluded.model_table,
                     ttype       = excluded.ttype,
                     labels      = excluded.labels,
                     notes       = excluded.notes,
                     updated_at  = strftime('%s', 'now')",
                rusqlite::params![
                    new.model,
                    new.model_table,
                    new.field_name,
                    ttype,
                    labels,
                    new.notes,
                ],
            )
            .map_err(|e| storage_err("Failed to upsert field", e))?;

            conn.query_row(
                "SELECT id FROM fields WHERE model = ?1 AND field_name = ?2",
                rusqlite::params![new.model, new.field_name],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read field id", e))
        })
    }

    /// Find one field by (model, field name), case-insensitively.
    pub fn find(&self, model: &str, field_name: &str) -> Result<Option<FieldRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, model, model_table, field_name, ttype, labels, notes
                 FROM fields
                 WHERE lower(model) = lower(?1) AND lower(field_name) = lower(?2)",
                rusqlite::params![model, field_name],
                |row| Ok(map_field_row(row)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to find field", e))?
            .transpose()
        })
    }

    /// List fields, optionally filtered by model names and/or field names
    /// (case-insensitive), ordered by (model, field name).
    pub fn list(
        &self,
        models: Option<&[String]>,
        field_names: Option<&[String]>,
    ) -> Result<Vec<FieldRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(models) = models {
                if !models.is_empty() {
                    clauses.push(format!(
                        "lower(model) IN ({})",
                        placeholders(params.len() + 1, models.len())
                    ));
                    for m in models {
                        params.push(Box::new(m.to_lowercase()));
                    }
                }
            }
            if let Some(names) = field_names {
                if !names.is_empty() {
                    clauses.push(format!(
                        "lower(field_name) IN ({})",
                        placeholders(params.len() + 1, names.len())
                    ));
                    for n in names {
                        params.push(Box::new(n.to_lowercase()));
                    }
                }
            }

            let where_clause = if clauses.is_empty() {
                "1 = 1".to_string()
            } else {
                clauses.join(" AND ")
            };

            let sql = format!(
                "SELECT id, model, model_table, field_name, ttype, labels, notes
                 FROM fields
                 WHERE {}
                 ORDER BY model, field_name",
                where_clause
            );

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("Failed to prepare field list", e))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_field_row(row)))
                .map_err(|e| storage_err("Failed to list fields", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("Field row", e))??);
            }
            Ok(out)
        })
    }
}

fn map_field_row(row: &rusqlite::Row<'_>) -> Result<FieldRecord, LexicaError> {
    Ok(FieldRecord {
        id: row.get(0).map_err(|e| storage_err("field id", e))?,
        model: row.get(1).map_err(|e| storage_err("field model", e))?,
        model_table: row.get(2).map_err(|e| storage_err("field table", e))?,
        field_name: row.get(3).map_err(|e| storage_err("field name", e))?,
        ttype: row.get(4).map_err(|e| storage_err("field ttype", e))?,
        labels: labels_from_json(&row.get::<_, String>(5).map_err(|e| storage_err("field labels", e))?),
        notes: row.get(6).map_err(|e| storage_err("field notes", e))?,
    })
}

// =============================================================================
// ViewCommonRepository
// =============================================================================

/// Repository for action-level view definitions.
pub struct ViewCommonRepository {
    db: Arc<Database>,
}

impl ViewCommonRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a view-common row keyed by action xmlid.
    pub fn upsert(&self, new: &NewViewCommon) -> Result<i64, LexicaError> {
        let view_types = serde_json::to_string(&new.view_types)?;
        let purpose_labels = labels_to_json(&new.purpose_labels)?;
        let primary = new.primary_view_type.map(|vt| vt.as_str());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO view_common
                     (action_xmlid, action_name, model, model_table, view_types,
                      primary_view_type, purpose, purpose_labels,
                      help_source_text, help_target_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (action_xmlid) DO UPDATE SET
                     action_name       = excluded.action_name,
                     model             = excluded.model,
                     model_table       = excluded.model_table,
                     view_types        = excluded.view_types,
                     primary_view_type = excluded.primary_view_type,
                     purpose           = excluded.purpose,
                     purpose_labels    = excluded.purpose_labels,
                     help_source_text  = excluded.help_source_text,
                     help_target_text  = excluded.help_target_text,
                     updated_at        = strftime('%s', 'now')",
                rusqlite::params![
                    new.action_xmlid,
                    new.action_name,
                    new.model,
                    new.model_table,
                    view_types,
                    primary,
                    new.purpose,
                    purpose_labels,
                    new.help_source_text,
                    new.help_target_text,
                ],
            )
            .map_err(|e| storage_err("Failed to upsert view_common", e))?;

            conn.query_row(
                "SELECT id FROM view_common WHERE action_xmlid = ?1",
                rusqlite::params![new.action_xmlid],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read view_common id", e))
        })
    }

    /// Find one view-common row by action xmlid, case-insensitively.
    pub fn find_by_action_xmlid(
        &self,
        action_xmlid: &str,
    ) -> Result<Option<ViewCommonRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, action_xmlid, action_name, model, model_table, view_types,
                        primary_view_type, purpose, purpose_labels,
                        help_source_text, help_target_text
                 FROM view_common
                 WHERE lower(action_xmlid) = lower(?1)",
                rusqlite::params![action_xmlid],
                |row| Ok(map_view_common_row(row)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to find view_common", e))?
            .transpose()
        })
    }

    /// List view-common rows for a set of action xmlids, ordered by xmlid.
    pub fn list_by_action_xmlids(
        &self,
        action_xmlids: &[String],
    ) -> Result<Vec<ViewCommonRecord>, LexicaError> {
        if action_xmlids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT id, action_xmlid, action_name, model, model_table, view_types,
                        primary_view_type, purpose, purpose_labels,
                        help_source_text, help_target_text
                 FROM view_common
                 WHERE lower(action_xmlid) IN ({})
                 ORDER BY action_xmlid",
                placeholders(1, action_xmlids.len())
            );

            let params: Vec<Box<dyn rusqlite::types::ToSql>> = action_xmlids
                .iter()
                .map(|x| Box::new(x.to_lowercase()) as Box<dyn rusqlite::types::ToSql>)
                .collect();
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("Failed to prepare view_common list", e))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_view_common_row(row)))
                .map_err(|e| storage_err("Failed to list view_common", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("view_common row", e))??);
            }
            Ok(out)
        })
    }
}

fn map_view_common_row(row: &rusqlite::Row<'_>) -> Result<ViewCommonRecord, LexicaError> {
    let view_types_raw: String = row.get(5).map_err(|e| storage_err("view_types", e))?;
    let view_types: Vec<ViewType> = serde_json::from_str(&view_types_raw).unwrap_or_default();
    let primary_raw: Option<String> = row.get(6).map_err(|e| storage_err("primary_view_type", e))?;
    let primary_view_type = match primary_raw {
        Some(s) => Some(
            s.parse::<ViewType>()
                .map_err(|e| storage_err("primary_view_type", e))?,
        ),
        None => None,
    };
    Ok(ViewCommonRecord {
        id: row.get(0).map_err(|e| storage_err("vc id", e))?,
        action_xmlid: row.get(1).map_err(|e| storage_err("vc xmlid", e))?,
        action_name: row.get(2).map_err(|e| storage_err("vc name", e))?,
        model: row.get(3).map_err(|e| storage_err("vc model", e))?,
        model_table: row.get(4).map_err(|e| storage_err("vc table", e))?,
        view_types,
        primary_view_type,
        purpose: row.get(7).map_err(|e| storage_err("vc purpose", e))?,
        purpose_labels: labels_from_json(
            &row.get::<_, String>(8).map_err(|e| storage_err("vc purpose labels", e))?,
        ),
        help_source_text: row.get(9).map_err(|e| storage_err("vc help src", e))?,
        help_target_text: row.get(10).map_err(|e| storage_err("vc help tgt", e))?,
    })
}

// =============================================================================
// ViewRepository (detail rows, tabs, smart buttons)
// =============================================================================

/// Repository for view detail rows and their child collections.
///
/// Owns the single-primary invariant: within one view-common's detail rows,
/// at most one may be marked primary. Every write that sets the flag clears
/// sibling flags inside the same transaction, so racing writers converge to
/// exactly one primary.
pub struct ViewRepository {
    db: Arc<Database>,
}

impl ViewRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Clear the primary flag on every detail row under `common_id` except
    /// the given view type. Must run inside the same transaction as the
    /// write that sets the new flag.
    fn clear_primary_within(
        tx: &Transaction<'_>,
        common_id: i64,
        keep_view_type: &str,
    ) -> Result<(), LexicaError> {
        tx.execute(
            "UPDATE views
             SET is_primary = 0, updated_at = strftime('%s', 'now')
             WHERE common_id = ?1 AND is_primary = 1 AND view_type != ?2",
            rusqlite::params![common_id, keep_view_type],
        )
        .map_err(|e| storage_err("Failed to clear sibling primary flags", e))?;
        Ok(())
    }

    /// Insert or update a detail row keyed by (common_id, view_type).
    ///
    /// Setting `is_primary` atomically demotes any other primary row under
    /// the same view-common.
    pub fn upsert_detail(
        &self,
        common_id: i64,
        view_type: ViewType,
        enabled: bool,
        is_primary: bool,
    ) -> Result<ViewDetailRecord, LexicaError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| storage_err("Failed to open transaction", e))?;

            if is_primary {
                Self::clear_primary_within(&tx, common_id, view_type.as_str())?;
            }

            tx.execute(
                "INSERT INTO views (common_id, view_type, enabled, is_primary)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (common_id, view_type) DO UPDATE SET
                     enabled    = excluded.enabled,
                     is_primary = excluded.is_primary,
                     updated_at = strftime('%s', 'now')",
                rusqlite::params![common_id, view_type.as_str(), enabled as i64, is_primary as i64],
            )
            .map_err(|e| storage_err("Failed to upsert view detail", e))?;

            let record = tx
                .query_row(
                    "SELECT id, common_id, view_type, enabled, is_primary
                     FROM views WHERE common_id = ?1 AND view_type = ?2",
                    rusqlite::params![common_id, view_type.as_str()],
                    |row| Ok(map_view_detail_row(row)),
                )
                .map_err(|e| storage_err("Failed to read view detail", e))??;

            tx.commit()
                .map_err(|e| storage_err("Failed to commit view detail", e))?;

            debug!(common_id, view_type = %view_type, is_primary, "View detail upserted");
            Ok(record)
        })
    }

    /// Mark an existing detail row as primary, demoting siblings in the same
    /// transaction.
    pub fn set_primary(&self, view_id: i64) -> Result<ViewDetailRecord, LexicaError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| storage_err("Failed to open transaction", e))?;

            let (common_id, view_type): (i64, String) = tx
                .query_row(
                    "SELECT common_id, view_type FROM views WHERE id = ?1",
                    rusqlite::params![view_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| storage_err("View detail not found", e))?;

            Self::clear_primary_within(&tx, common_id, &view_type)?;

            tx.execute(
                "UPDATE views
                 SET is_primary = 1, updated_at = strftime('%s', 'now')
                 WHERE id = ?1",
                rusqlite::params![view_id],
            )
            .map_err(|e| storage_err("Failed to set primary", e))?;

            let record = tx
                .query_row(
                    "SELECT id, common_id, view_type, enabled, is_primary
                     FROM views WHERE id = ?1",
                    rusqlite::params![view_id],
                    |row| Ok(map_view_detail_row(row)),
                )
                .map_err(|e| storage_err("Failed to read view detail", e))??;

            tx.commit()
                .map_err(|e| storage_err("Failed to commit set_primary", e))?;
            Ok(record)
        })
    }

    /// List detail rows under one view-common, ordered by view type.
    pub fn list_by_common(&self, common_id: i64) -> Result<Vec<ViewDetailRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, common_id, view_type, enabled, is_primary
                     FROM views WHERE common_id = ?1
                     ORDER BY view_type",
                )
                .map_err(|e| storage_err("Failed to prepare view list", e))?;
            let rows = stmt
                .query_map(rusqlite::params![common_id], |row| Ok(map_view_detail_row(row)))
                .map_err(|e| storage_err("Failed to list views", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("view row", e))??);
            }
            Ok(out)
        })
    }

    /// Insert or update a tab keyed by (view_id, name).
    pub fn upsert_tab(&self, view_id: i64, name: &str, sequence: i64) -> Result<i64, LexicaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO view_tabs (view_id, name, sequence)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (view_id, name) DO UPDATE SET
                     sequence   = excluded.sequence,
                     updated_at = strftime('%s', 'now')",
                rusqlite::params![view_id, name, sequence],
            )
            .map_err(|e| storage_err("Failed to upsert tab", e))?;

            conn.query_row(
                "SELECT id FROM view_tabs WHERE view_id = ?1 AND name = ?2",
                rusqlite::params![view_id, name],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read tab id", e))
        })
    }

    /// List tabs under a view detail row, in sequence order.
    pub fn list_tabs(&self, view_id: i64) -> Result<Vec<TabRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, view_id, name, sequence
                     FROM view_tabs WHERE view_id = ?1
                     ORDER BY sequence, name",
                )
                .map_err(|e| storage_err("Failed to prepare tab list", e))?;
            let rows = stmt
                .query_map(rusqlite::params![view_id], |row| {
                    Ok(TabRecord {
                        id: row.get(0)?,
                        view_id: row.get(1)?,
                        name: row.get(2)?,
                        sequence: row.get(3)?,
                    })
                })
                .map_err(|e| storage_err("Failed to list tabs", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("tab row", e))?);
            }
            Ok(out)
        })
    }

    /// Insert or update a smart button keyed by (view_id, name).
    pub fn upsert_smart_button(
        &self,
        view_id: i64,
        name: &str,
        action_xmlid: &str,
        sequence: i64,
    ) -> Result<i64, LexicaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO smart_buttons (view_id, name, action_xmlid, sequence)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (view_id, name) DO UPDATE SET
                     action_xmlid = excluded.action_xmlid,
                     sequence     = excluded.sequence,
                     updated_at   = strftime('%s', 'now')",
                rusqlite::params![view_id, name, action_xmlid, sequence],
            )
            .map_err(|e| storage_err("Failed to upsert smart button", e))?;

            conn.query_row(
                "SELECT id FROM smart_buttons WHERE view_id = ?1 AND name = ?2",
                rusqlite::params![view_id, name],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read smart button id", e))
        })
    }

    /// List smart buttons under a view detail row, in sequence order.
    pub fn list_smart_buttons(&self, view_id: i64) -> Result<Vec<SmartButtonRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, view_id, name, action_xmlid, sequence
                     FROM smart_buttons WHERE view_id = ?1
                     ORDER BY sequence, name",
                )
                .map_err(|e| storage_err("Failed to prepare smart button list", e))?;
            let rows = stmt
                .query_map(rusqlite::params![view_id], |row| {
                    Ok(SmartButtonRecord {
                        id: row.get(0)?,
                        view_id: row.get(1)?,
                        name: row.get(2)?,
                        action_xmlid: row.get(3)?,
                        sequence: row.get(4)?,
                    })
                })
                .map_err(|e| storage_err("Failed to list smart buttons", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("smart button row", e))?);
            }
            Ok(out)
        })
    }
}

fn map_view_detail_row(row: &rusqlite::Row<'_>) -> Result<ViewDetailRecord, LexicaError> {
    let view_type: String = row.get(2).map_err(|e| storage_err("view_type", e))?;
    Ok(ViewDetailRecord {
        id: row.get(0).map_err(|e| storage_err("view id", e))?,
        common_id: row.get(1).map_err(|e| storage_err("common_id", e))?,
        view_type: view_type
            .parse()
            .map_err(|e| storage_err("view_type", e))?,
        enabled: row.get::<_, i64>(3).map_err(|e| storage_err("enabled", e))? != 0,
        is_primary: row.get::<_, i64>(4).map_err(|e| storage_err("is_primary", e))? != 0,
    })
}

// =============================================================================
// MenuRepository
// =============================================================================

/// Repository for application menu entries.
pub struct MenuRepository {
    db: Arc<Database>,
}

impl MenuRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a menu entry keyed by its xmlid.
    pub fn upsert(&self, new: &NewMenu) -> Result<i64, LexicaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO menus (menu_xmlid, name, parent_xmlid, action_xmlid, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (menu_xmlid) DO UPDATE SET
                     name         = excluded.name,
                     parent_xmlid = excluded.parent_xmlid,
                     action_xmlid = excluded.action_xmlid,
                     sequence     = excluded.sequence,
                     updated_at   = strftime('%s', 'now')",
                rusqlite::params![
                    new.menu_xmlid,
                    new.name,
                    new.parent_xmlid,
                    new.action_xmlid,
                    new.sequence,
                ],
            )
            .map_err(|e| storage_err("Failed to upsert menu", e))?;

            conn.query_row(
                "SELECT id FROM menus WHERE menu_xmlid = ?1",
                rusqlite::params![new.menu_xmlid],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("Failed to read menu id", e))
        })
    }

    /// List all menu entries in sequence order.
    pub fn list(&self) -> Result<Vec<MenuRecord>, LexicaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, menu_xmlid, name, parent_xmlid, action_xmlid, sequence
                     FROM menus
                     ORDER BY sequence, menu_xmlid",
                )
                .map_err(|e| storage_err("Failed to prepare menu list", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(MenuRecord {
                        id: row.get(0)?,
                        menu_xmlid: row.get(1)?,
                        name: row.get(2)?,
                        parent_xmlid: row.get(3)?,
                        action_xmlid: row.get(4)?,
                        sequence: row.get(5)?,
                    })
                })
                .map_err(|e| storage_err("Failed to list menus", e))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| storage_err("menu row", e))?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_field() -> NewField {
        NewField {
            model: "sale.order".to_string(),
            model_table: "sale_order".to_string(),
            field_name: "amount_total".to_string(),
            ttype: "monetary".to_string(),
            labels: labels(&[("ja", "合計金額")]),
            notes: "税込の合計".to_string(),
        }
    }

    fn sample_view_common() -> NewViewCommon {
        NewViewCommon {
            action_xmlid: "sale.action_orders".to_string(),
            action_name: "受注".to_string(),
            model: "sale.order".to_string(),
            model_table: "sale_order".to_string(),
            view_types: vec![ViewType::List, ViewType::Form, ViewType::Kanban],
            primary_view_type: Some(ViewType::List),
            purpose: "受注の一覧と編集".to_string(),
            purpose_labels: HashMap::new(),
            help_source_text: "受注を管理します".to_string(),
            help_target_text: String::new(),
        }
    }

    #[test]
    fn test_field_upsert_is_stable() {
        let db = make_db();
        let repo = FieldRepository::new(Arc::clone(&db));

        let id1 = repo.upsert(&sample_field()).unwrap();
        let id2 = repo.upsert(&sample_field()).unwrap();
        assert_eq!(id1, id2);

        let found = repo.find("sale.order", "amount_total").unwrap().unwrap();
        assert_eq!(found.ttype, "monetary");
        assert_eq!(found.labels.get("ja").unwrap(), "合計金額");
    }

    #[test]
    fn test_field_upsert_updates_in_place() {
        let db = make_db();
        let repo = FieldRepository::new(Arc::clone(&db));

        repo.upsert(&sample_field()).unwrap();
        let mut changed = sample_field();
        changed.notes = "updated".to_string();
        repo.upsert(&changed).unwrap();

        let all = repo.list(None, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].notes, "updated");
    }

    #[test]
    fn test_field_find_is_case_insensitive() {
        let db = make_db();
        let repo = FieldRepository::new(Arc::clone(&db));
        repo.upsert(&sample_field()).unwrap();

        let found = repo.find("Sale.Order", "AMOUNT_TOTAL").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_field_list_filters() {
        let db = make_db();
        let repo = FieldRepository::new(Arc::clone(&db));
        repo.upsert(&sample_field()).unwrap();
        repo.upsert(&NewField {
            model: "res.partner".to_string(),
            field_name: "name".to_string(),
            ..Default::default()
        })
        .unwrap();

        let all = repo.list(None, None).unwrap();
        assert_eq!(all.len(), 2);

        let sale_only = repo
            .list(Some(&["Sale.Order".to_string()]), None)
            .unwrap();
        assert_eq!(sale_only.len(), 1);
        assert_eq!(sale_only[0].model, "sale.order");

        let by_name = repo
            .list(None, Some(&["name".to_string()]))
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].model, "res.partner");
    }

    #[test]
    fn test_model_upsert_and_find() {
        let db = make_db();
        let repo = ModelRepository::new(Arc::clone(&db));

        let id = repo
            .upsert(&NewModel {
                model: "sale.order".to_string(),
                model_table: "sale_order".to_string(),
                labels: labels(&[("ja", "受注")]),
                notes: String::new(),
            })
            .unwrap();
        assert!(id > 0);

        let found = repo.find("sale.order").unwrap().unwrap();
        assert_eq!(found.model_table, "sale_order");
        assert_eq!(found.labels.get("ja").unwrap(), "受注");
        assert!(repo.find("unknown.model").unwrap().is_none());
    }

    #[test]
    fn test_view_common_upsert_round_trip() {
        let db = make_db();
        let repo = ViewCommonRepository::new(Arc::clone(&db));

        let id1 = repo.upsert(&sample_view_common()).unwrap();
        let id2 = repo.upsert(&sample_view_common()).unwrap();
        assert_eq!(id1, id2);

        let found = repo.find_by_action_xmlid("SALE.ACTION_ORDERS").unwrap().unwrap();
        assert_eq!(found.view_types, vec![ViewType::List, ViewType::Form, ViewType::Kanban]);
        assert_eq!(found.primary_view_type, Some(ViewType::List));
        assert_eq!(found.purpose, "受注の一覧と編集");
    }

    #[test]
    fn test_view_common_list_by_xmlids() {
        let db = make_db();
        let repo = ViewCommonRepository::new(Arc::clone(&db));
        repo.upsert(&sample_view_common()).unwrap();
        repo.upsert(&NewViewCommon {
            action_xmlid: "crm.action_leads".to_string(),
            ..Default::default()
        })
        .unwrap();

        let rows = repo
            .list_by_action_xmlids(&["sale.action_orders".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = repo.list_by_action_xmlids(&[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_upsert_detail_and_list() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let common_id = vc_repo.upsert(&sample_view_common()).unwrap();
        v_repo.upsert_detail(common_id, ViewType::List, true, true).unwrap();
        v_repo.upsert_detail(common_id, ViewType::Form, true, false).unwrap();

        let rows = v_repo.list_by_common(common_id).unwrap();
        assert_eq!(rows.len(), 2);
        let primary: Vec<_> = rows.iter().filter(|r| r.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].view_type, ViewType::List);
    }

    #[test]
    fn test_single_primary_invariant_on_upsert() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let common_id = vc_repo.upsert(&sample_view_common()).unwrap();
        v_repo.upsert_detail(common_id, ViewType::List, true, true).unwrap();
        // Marking a second type primary demotes the first in the same
        // transaction.
        v_repo.upsert_detail(common_id, ViewType::Form, true, true).unwrap();

        let rows = v_repo.list_by_common(common_id).unwrap();
        let primary: Vec<_> = rows.iter().filter(|r| r.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].view_type, ViewType::Form);
    }

    #[test]
    fn test_single_primary_invariant_on_set_primary() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let common_id = vc_repo.upsert(&sample_view_common()).unwrap();
        let list = v_repo.upsert_detail(common_id, ViewType::List, true, true).unwrap();
        let form = v_repo.upsert_detail(common_id, ViewType::Form, true, false).unwrap();

        let promoted = v_repo.set_primary(form.id).unwrap();
        assert!(promoted.is_primary);

        let rows = v_repo.list_by_common(common_id).unwrap();
        let primary: Vec<_> = rows.iter().filter(|r| r.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].id, form.id);
        assert_ne!(primary[0].id, list.id);
    }

    #[test]
    fn test_single_primary_holds_under_repeated_flips() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let common_id = vc_repo.upsert(&sample_view_common()).unwrap();
        for vt in [ViewType::List, ViewType::Form, ViewType::Kanban] {
            v_repo.upsert_detail(common_id, vt, true, false).unwrap();
        }

        // Any interleaving of promotions must leave exactly one primary.
        for vt in [
            ViewType::Form,
            ViewType::List,
            ViewType::Kanban,
            ViewType::List,
            ViewType::Form,
        ] {
            v_repo.upsert_detail(common_id, vt, true, true).unwrap();
            let rows = v_repo.list_by_common(common_id).unwrap();
            let primary: Vec<_> = rows.iter().filter(|r| r.is_primary).collect();
            assert_eq!(primary.len(), 1);
            assert_eq!(primary[0].view_type, vt);
        }
    }

    #[test]
    fn test_primary_scoped_per_common() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let a = vc_repo.upsert(&sample_view_common()).unwrap();
        let b = vc_repo
            .upsert(&NewViewCommon {
                action_xmlid: "crm.action_leads".to_string(),
                ..Default::default()
            })
            .unwrap();

        v_repo.upsert_detail(a, ViewType::List, true, true).unwrap();
        v_repo.upsert_detail(b, ViewType::Form, true, true).unwrap();

        // One primary each; promoting under b does not touch a.
        assert_eq!(
            v_repo.list_by_common(a).unwrap().iter().filter(|r| r.is_primary).count(),
            1
        );
        assert_eq!(
            v_repo.list_by_common(b).unwrap().iter().filter(|r| r.is_primary).count(),
            1
        );
    }

    #[test]
    fn test_tabs_and_smart_buttons() {
        let db = make_db();
        let vc_repo = ViewCommonRepository::new(Arc::clone(&db));
        let v_repo = ViewRepository::new(Arc::clone(&db));

        let common_id = vc_repo.upsert(&sample_view_common()).unwrap();
        let form = v_repo.upsert_detail(common_id, ViewType::Form, true, true).unwrap();

        v_repo.upsert_tab(form.id, "Lines", 0).unwrap();
        v_repo.upsert_tab(form.id, "Other Info", 1).unwrap();
        // Upsert same tab again: no duplicate.
        v_repo.upsert_tab(form.id, "Lines", 2).unwrap();

        let tabs = v_repo.list_tabs(form.id).unwrap();
        assert_eq!(tabs.len(), 2);

        v_repo
            .upsert_smart_button(form.id, "Invoices", "account.action_invoices", 0)
            .unwrap();
        let buttons = v_repo.list_smart_buttons(form.id).unwrap();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].action_xmlid, "account.action_invoices");
    }

    #[test]
    fn test_menu_upsert_and_list() {
        let db = make_db();
        let repo = MenuRepository::new(Arc::clone(&db));

        repo.upsert(&NewMenu {
            menu_xmlid: "sale.menu_sale_order".to_string(),
            name: "受注".to_string(),
            parent_xmlid: Some("sale.sale_menu_root".to_string()),
            action_xmlid: Some("sale.action_orders".to_string()),
            sequence: 2,
        })
        .unwrap();
        repo.upsert(&NewMenu {
            menu_xmlid: "sale.sale_menu_root".to_string(),
            name: "販売".to_string(),
            sequence: 1,
            ..Default::default()
        })
        .unwrap();

        let menus = repo.list().unwrap();
        assert_eq!(menus.len(), 2);
        assert_eq!(menus[0].menu_xmlid, "sale.sale_menu_root");
        assert_eq!(menus[1].parent_xmlid.as_deref(), Some("sale.sale_menu_root"));
    }
}
