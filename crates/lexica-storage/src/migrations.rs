//! Database schema migrations.
//!
//! Applies the initial schema: the metadata tables (models, fields,
//! view_common, views, view_tabs, smart_buttons, menus), the translations
//! and documents state tables, and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use lexica_core::error::LexicaError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), LexicaError> {
    // Create the migrations tracking table first.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| LexicaError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| LexicaError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), LexicaError> {
    conn.execute_batch(
        "
        -- Metadata: business models.
        CREATE TABLE IF NOT EXISTS models (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            model           TEXT NOT NULL UNIQUE,
            model_table     TEXT NOT NULL DEFAULT '',
            labels          TEXT NOT NULL DEFAULT '{}',
            notes           TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Metadata: model fields. One row per (model, field name).
        CREATE TABLE IF NOT EXISTS fields (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            model           TEXT NOT NULL,
            model_table     TEXT NOT NULL DEFAULT '',
            field_name      TEXT NOT NULL,
            ttype           TEXT NOT NULL DEFAULT 'char',
            labels          TEXT NOT NULL DEFAULT '{}',
            notes           TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (model, field_name)
        );

        CREATE INDEX IF NOT EXISTS idx_fields_model
            ON fields (model);

        -- Metadata: action-level view definitions.
        CREATE TABLE IF NOT EXISTS view_common (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            action_xmlid      TEXT NOT NULL UNIQUE,
            action_name       TEXT NOT NULL DEFAULT '',
            model             TEXT NOT NULL DEFAULT '',
            model_table       TEXT NOT NULL DEFAULT '',
            view_types        TEXT NOT NULL DEFAULT '[]',
            primary_view_type TEXT,
            purpose           TEXT NOT NULL DEFAULT '',
            purpose_labels    TEXT NOT NULL DEFAULT '{}',
            help_source_text  TEXT NOT NULL DEFAULT '',
            help_target_text  TEXT NOT NULL DEFAULT '',
            created_at        INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at        INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Per-presentation-type detail rows. At most one row per
        -- (view_common, view_type); at most one primary per view_common,
        -- enforced in the write path.
        CREATE TABLE IF NOT EXISTS views (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            common_id       INTEGER NOT NULL
                            REFERENCES view_common(id) ON DELETE CASCADE,
            view_type       TEXT NOT NULL
                            CHECK (view_type IN ('form', 'list', 'kanban', 'calendar',
                                                 'search', 'graph', 'pivot', 'dashboard',
                                                 'tree', 'map')),
            enabled         INTEGER NOT NULL DEFAULT 1,
            is_primary      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (common_id, view_type)
        );

        CREATE INDEX IF NOT EXISTS idx_views_common
            ON views (common_id);

        -- Notebook tabs under a view detail row.
        CREATE TABLE IF NOT EXISTS view_tabs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            view_id         INTEGER NOT NULL
                            REFERENCES views(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            sequence        INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (view_id, name)
        );

        -- Smart buttons under a view detail row.
        CREATE TABLE IF NOT EXISTS smart_buttons (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            view_id         INTEGER NOT NULL
                            REFERENCES views(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            action_xmlid    TEXT NOT NULL DEFAULT '',
            sequence        INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (view_id, name)
        );

        -- Application menu entries.
        CREATE TABLE IF NOT EXISTS menus (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            menu_xmlid      TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL DEFAULT '',
            parent_xmlid    TEXT,
            action_xmlid    TEXT,
            sequence        INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Translation state table. The unique key is the idempotence anchor:
        -- re-extraction updates in place, never duplicates.
        CREATE TABLE IF NOT EXISTS translations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            entity          TEXT NOT NULL
                            CHECK (entity IN ('field', 'view_common')),
            natural_key     TEXT NOT NULL,
            src_lang        TEXT NOT NULL,
            tgt_lang        TEXT NOT NULL,
            source_text     TEXT NOT NULL DEFAULT '',
            translated_text TEXT,
            source_hash     TEXT NOT NULL,
            state           TEXT NOT NULL DEFAULT 'pending'
                            CHECK (state IN ('pending', 'translated', 'failed')),
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (entity, natural_key, src_lang, tgt_lang)
        );

        CREATE INDEX IF NOT EXISTS idx_translations_state
            ON translations (state, id ASC);

        CREATE INDEX IF NOT EXISTS idx_translations_natural_key
            ON translations (natural_key);

        -- Packaged document state table. Same lifecycle shape as
        -- translations, keyed per target language.
        CREATE TABLE IF NOT EXISTS documents (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            entity          TEXT NOT NULL
                            CHECK (entity IN ('field', 'view_common')),
            natural_key     TEXT NOT NULL,
            lang            TEXT NOT NULL,
            doc_id          TEXT NOT NULL,
            doc_text        TEXT NOT NULL DEFAULT '',
            metadata        TEXT NOT NULL DEFAULT '{}',
            source_hash     TEXT NOT NULL,
            collection      TEXT NOT NULL,
            state           TEXT NOT NULL DEFAULT 'queued'
                            CHECK (state IN ('queued', 'upserted', 'failed')),
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (entity, natural_key, lang)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_state
            ON documents (state, collection, id ASC);

        CREATE INDEX IF NOT EXISTS idx_documents_natural_key
            ON documents (natural_key);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| LexicaError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
