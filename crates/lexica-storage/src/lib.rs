//! Lexica Storage crate - SQLite persistence for the metadata pipeline.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for the
//! metadata tables (models, fields, view definitions, menus), the translation
//! and document state tables, and the single-primary-view enforcement.

pub mod db;
pub mod documents;
pub mod metadata;
pub mod migrations;
pub mod translations;

pub use db::Database;
pub use documents::{DocumentRepository, DocumentRow, PackOutcome, PackagedDocument};
pub use metadata::{
    FieldRecord, FieldRepository, MenuRecord, MenuRepository, ModelRecord, ModelRepository,
    NewField, NewMenu, NewModel, NewViewCommon, SmartButtonRecord, TabRecord, ViewCommonRecord,
    ViewCommonRepository, ViewDetailRecord, ViewRepository,
};
pub use translations::{
    SourceUpsertOutcome, TranslationRepository, TranslationRow,
};
