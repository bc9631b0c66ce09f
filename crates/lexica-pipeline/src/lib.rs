//! Lexica Pipeline crate - the batch stages of the metadata pipeline.
//!
//! Extraction (metadata → translation rows through the change gate),
//! translation (pending → translated/failed via a `Translator` provider),
//! packaging (translated rows + metadata → queued documents), metadata
//! import, and operational status queries.

pub mod extract;
pub mod import;
pub mod package;
pub mod status;
pub mod templates;
pub mod translate;

pub use extract::{ExtractReport, ExtractStage, ExtractTargets, SkipReason};
pub use import::{ImportReport, MetadataImporter, MetadataSeed, SeedSmartButton, SeedTab, SeedViewCommon};
pub use package::{PackageReport, PackageStage};
pub use status::{StatusService, StatusSummary, TraceReport};
pub use translate::{
    build_translator, DynTranslator, EchoTranslator, HttpTranslator, TranslateReport,
    TranslateStage, Translator,
};
