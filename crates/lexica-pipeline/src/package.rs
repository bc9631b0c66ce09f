//! Packaging stage: translated rows + metadata → document rows.
//!
//! Joins each translated row back to its metadata record, renders the
//! document text for the requested language, and writes it through the
//! change gate into the documents table with `state = queued`. The gate here
//! uses the document's own source hash, independent of the translation
//! hash, so unchanged entities are a no-op at this layer too.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lexica_core::config::PackagingConfig;
use lexica_core::error::Result;
use lexica_core::hash::{document_id, normalize_text, truncate_utf8, ContentHash};
use lexica_core::identity::{NaturalKey, ParsedKey};
use lexica_core::types::{ChangeMode, EntityKind, ViewTextTarget};
use lexica_storage::{
    Database, DocumentRepository, FieldRepository, PackOutcome, PackagedDocument,
    TranslationRepository, TranslationRow, ViewCommonRepository,
};

use crate::templates::{render_field_doc, render_view_doc};

/// A sample entry carried in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSample {
    pub doc_id: String,
    pub collection: String,
    pub model: Option<String>,
    pub status: String,
}

/// Result of one packaging run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageReport {
    /// Documents written and queued for indexing.
    pub queued: u64,
    /// Documents whose hash was unchanged.
    pub skipped: u64,
    /// Rows that could not be packaged.
    pub failed: u64,
    /// Up to `samples_max` per-document samples.
    pub samples: Vec<PackageSample>,
}

impl PackageReport {
    fn sample(&mut self, max: usize, doc_id: &str, collection: &str, model: Option<&str>, status: &str) {
        if self.samples.len() < max {
            self.samples.push(PackageSample {
                doc_id: doc_id.to_string(),
                collection: collection.to_string(),
                model: model.map(str::to_string),
                status: status.to_string(),
            });
        }
    }
}

/// The packaging stage.
pub struct PackageStage {
    translations: TranslationRepository,
    fields: FieldRepository,
    view_commons: ViewCommonRepository,
    documents: DocumentRepository,
    config: PackagingConfig,
}

impl PackageStage {
    pub fn new(db: Arc<Database>, config: PackagingConfig) -> Self {
        Self {
            translations: TranslationRepository::new(Arc::clone(&db)),
            fields: FieldRepository::new(Arc::clone(&db)),
            view_commons: ViewCommonRepository::new(Arc::clone(&db)),
            documents: DocumentRepository::new(db),
            config,
        }
    }

    /// Run one bounded packaging batch.
    ///
    /// Only `translated` rows are read. One row's failure (missing metadata,
    /// malformed key) is counted and the batch continues.
    pub fn run(
        &self,
        entity_kinds: &[EntityKind],
        lang: &str,
        collection_map: &HashMap<EntityKind, String>,
        limit: u32,
        mode: ChangeMode,
    ) -> Result<PackageReport> {
        let entities: Vec<EntityKind> = if entity_kinds.is_empty() {
            EntityKind::all().to_vec()
        } else {
            entity_kinds.to_vec()
        };
        let rows = self.translations.list_translated(&entities, limit)?;

        let mut report = PackageReport::default();
        for row in rows {
            let collection = self.collection_for(row.entity, collection_map);
            match NaturalKey::parse(&row.natural_key) {
                Ok(ParsedKey::Field(key)) => {
                    self.package_field(&row, key.model(), key.field_name(), lang, &collection, mode, &mut report)?;
                }
                Ok(ParsedKey::View(key)) => {
                    self.package_view(
                        &row,
                        key.action_xmlid(),
                        key.target(),
                        lang,
                        &collection,
                        mode,
                        &mut report,
                    )?;
                }
                Err(e) => {
                    warn!(natural_key = %row.natural_key, error = %e, "Packaging skipped malformed key");
                    report.failed += 1;
                    report.sample(self.config.samples_max, "", &collection, None, "failed");
                }
            }
        }

        info!(
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed,
            lang,
            "Packaging run complete"
        );
        Ok(report)
    }

    fn collection_for(
        &self,
        entity: EntityKind,
        collection_map: &HashMap<EntityKind, String>,
    ) -> String {
        collection_map
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| match entity {
                EntityKind::Field => self.config.field_collection.clone(),
                EntityKind::ViewCommon => self.config.view_collection.clone(),
            })
    }

    /// Resolve the display text for the requested language: translated text
    /// when packaging the row's target language, source metadata text for
    /// the source language, and otherwise the configured fallback.
    fn resolve_text<'a>(
        &self,
        row: &'a TranslationRow,
        lang: &str,
        source_text: &'a str,
    ) -> Option<String> {
        if lang == row.tgt_lang {
            row.translated_text.clone()
        } else if lang == row.src_lang || self.config.fallback_to_source {
            Some(source_text.to_string())
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn package_field(
        &self,
        row: &TranslationRow,
        model: &str,
        field_name: &str,
        lang: &str,
        collection: &str,
        mode: ChangeMode,
        report: &mut PackageReport,
    ) -> Result<()> {
        let Some(meta) = self.fields.find(model, field_name)? else {
            warn!(natural_key = %row.natural_key, "Packaging failed: field metadata not found");
            report.failed += 1;
            report.sample(self.config.samples_max, "", collection, Some(model), "failed");
            return Ok(());
        };

        let label_src = normalize_text(
            meta.labels
                .get(&row.src_lang)
                .map(String::as_str)
                .unwrap_or(""),
        );
        let notes_src = normalize_text(&meta.notes);
        let combined_src = format!("{}\n\n{}", label_src, notes_src);

        // Staleness detection hashes the metadata-derived source text,
        // independent of the translation row's hash.
        let source_hash = ContentHash::compute(&combined_src);

        let Some(display) = self.resolve_text(row, lang, &combined_src) else {
            warn!(natural_key = %row.natural_key, lang, "Packaging failed: no text for requested language");
            report.failed += 1;
            report.sample(self.config.samples_max, "", collection, Some(model), "failed");
            return Ok(());
        };
        // First line is the label; anything after the blank line is the
        // description.
        let (label, notes) = split_label_notes(&display);

        let doc_text = render_field_doc(
            label,
            model,
            field_name,
            &meta.model_table,
            &meta.ttype,
            notes,
        );
        let doc_text = truncate_utf8(&doc_text, self.config.text_limit).to_string();
        let doc_id = document_id(&row.natural_key, lang);

        let metadata = serde_json::json!({
            "entity": EntityKind::Field,
            "natural_key": row.natural_key,
            "lang": lang,
            "model": model,
            "model_table": meta.model_table,
            "field_name": field_name,
            "ttype": meta.ttype,
            "collection": collection,
        });

        let outcome = self.documents.upsert_packaged(
            &PackagedDocument {
                entity: EntityKind::Field,
                natural_key: row.natural_key.clone(),
                lang: lang.to_string(),
                doc_id: doc_id.clone(),
                doc_text,
                metadata,
                source_hash,
                collection: collection.to_string(),
            },
            mode,
        )?;

        match outcome {
            PackOutcome::Queued => {
                report.queued += 1;
                report.sample(self.config.samples_max, &doc_id, collection, Some(model), "queued");
            }
            PackOutcome::SkippedNoChange => report.skipped += 1,
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn package_view(
        &self,
        row: &TranslationRow,
        action_xmlid: &str,
        target: ViewTextTarget,
        lang: &str,
        collection: &str,
        mode: ChangeMode,
        report: &mut PackageReport,
    ) -> Result<()> {
        let Some(meta) = self.view_commons.find_by_action_xmlid(action_xmlid)? else {
            warn!(natural_key = %row.natural_key, "Packaging failed: view metadata not found");
            report.failed += 1;
            report.sample(self.config.samples_max, "", collection, None, "failed");
            return Ok(());
        };

        let purpose_src = normalize_text(&meta.purpose);
        let help_src = normalize_text(&meta.help_source_text);
        let combined_src = format!("{}\n\n{}", purpose_src, help_src);
        let source_hash = ContentHash::compute(&combined_src);

        let slot_src = match target {
            ViewTextTarget::Purpose => purpose_src.as_str(),
            ViewTextTarget::Help => help_src.as_str(),
        };
        let Some(slot_text) = self.resolve_text(row, lang, slot_src) else {
            warn!(natural_key = %row.natural_key, lang, "Packaging failed: no text for requested language");
            report.failed += 1;
            report.sample(self.config.samples_max, "", collection, Some(&meta.model), "failed");
            return Ok(());
        };

        // The sibling slot renders from its own translation row when one is
        // translated, otherwise from the source metadata.
        let sibling_target = match target {
            ViewTextTarget::Purpose => ViewTextTarget::Help,
            ViewTextTarget::Help => ViewTextTarget::Purpose,
        };
        let sibling_src = match sibling_target {
            ViewTextTarget::Purpose => purpose_src.clone(),
            ViewTextTarget::Help => help_src.clone(),
        };
        let sibling_nk = format!("view_common::{}::{}", meta.action_xmlid, sibling_target);
        let sibling_text = self
            .translations
            .find(EntityKind::ViewCommon, &sibling_nk, &row.src_lang, &row.tgt_lang)?
            .and_then(|sibling| self.resolve_text(&sibling, lang, &sibling_src))
            .unwrap_or(sibling_src);

        let (purpose_text, help_text) = match target {
            ViewTextTarget::Purpose => (slot_text, sibling_text),
            ViewTextTarget::Help => (sibling_text, slot_text),
        };

        let action_display = if meta.action_name.trim().is_empty() {
            meta.action_xmlid.clone()
        } else {
            meta.action_name.clone()
        };

        let doc_text = render_view_doc(
            &action_display,
            &purpose_text,
            &help_text,
            &meta.model,
            &meta.model_table,
            meta.primary_view_type.map(|vt| vt.as_str()),
        );
        let doc_text = truncate_utf8(&doc_text, self.config.text_limit).to_string();
        let doc_id = document_id(&row.natural_key, lang);

        let metadata = serde_json::json!({
            "entity": EntityKind::ViewCommon,
            "natural_key": row.natural_key,
            "lang": lang,
            "action_xmlid": meta.action_xmlid,
            "model": meta.model,
            "model_table": meta.model_table,
            "primary_view_type": meta.primary_view_type,
            "view_types": meta.view_types,
            "target": target,
            "collection": collection,
        });

        let outcome = self.documents.upsert_packaged(
            &PackagedDocument {
                entity: EntityKind::ViewCommon,
                natural_key: row.natural_key.clone(),
                lang: lang.to_string(),
                doc_id: doc_id.clone(),
                doc_text,
                metadata,
                source_hash,
                collection: collection.to_string(),
            },
            mode,
        )?;

        match outcome {
            PackOutcome::Queued => {
                report.queued += 1;
                report.sample(self.config.samples_max, &doc_id, collection, Some(&meta.model), "queued");
            }
            PackOutcome::SkippedNoChange => report.skipped += 1,
        }
        Ok(())
    }
}

/// Split a combined "label\n\nnotes" text into its parts.
fn split_label_notes(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((label, rest)) => (label.trim(), rest.trim()),
        None => (text.trim(), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use lexica_core::identity::FieldKey;
    use lexica_core::types::{DocumentState, ViewType};
    use lexica_storage::{NewField, NewViewCommon};

    struct Fixture {
        db: Arc<Database>,
        stage: PackageStage,
    }

    fn make_fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let stage = PackageStage::new(Arc::clone(&db), PackagingConfig::default());
        Fixture { db, stage }
    }

    fn labels(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Seed field metadata plus a translated row, as the earlier stages
    /// would leave them.
    fn seed_translated_field(db: &Arc<Database>, field: &str, ja: &str, en: &str) {
        FieldRepository::new(Arc::clone(db))
            .upsert(&NewField {
                model: "sale.order".to_string(),
                model_table: "sale_order".to_string(),
                field_name: field.to_string(),
                ttype: "monetary".to_string(),
                labels: labels(&[("ja", ja)]),
                notes: String::new(),
            })
            .unwrap();

        let repo = TranslationRepository::new(Arc::clone(db));
        let nk = FieldKey::new("sale.order", field).unwrap().natural_key();
        let source = normalize_text(ja);
        repo.upsert_source(
            EntityKind::Field,
            &nk,
            "ja",
            "en",
            &source,
            &ContentHash::compute(&source),
            ChangeMode::UpsertIfChanged,
        )
        .unwrap();
        let row = repo.find(EntityKind::Field, nk.as_str(), "ja", "en").unwrap().unwrap();
        repo.mark_translated(row.id, en).unwrap();
    }

    fn seed_translated_view(db: &Arc<Database>, xmlid: &str) {
        ViewCommonRepository::new(Arc::clone(db))
            .upsert(&NewViewCommon {
                action_xmlid: xmlid.to_string(),
                action_name: "受注".to_string(),
                model: "sale.order".to_string(),
                model_table: "sale_order".to_string(),
                view_types: vec![ViewType::List, ViewType::Form],
                primary_view_type: Some(ViewType::List),
                purpose: "受注の一覧と編集".to_string(),
                purpose_labels: Map::new(),
                help_source_text: "受注を管理します".to_string(),
                help_target_text: String::new(),
            })
            .unwrap();

        let repo = TranslationRepository::new(Arc::clone(db));
        for (target, en) in [("purpose", "Browse and edit orders"), ("help", "Manage orders")] {
            let nk_raw = format!("view_common::{}::{}", xmlid, target);
            let parsed = NaturalKey::parse(&nk_raw).unwrap();
            let ParsedKey::View(key) = parsed else { panic!("expected view key") };
            let nk = key.natural_key();
            repo.upsert_source(
                EntityKind::ViewCommon,
                &nk,
                "ja",
                "en",
                "text",
                &ContentHash::compute(&nk_raw),
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
            let row = repo
                .find(EntityKind::ViewCommon, nk.as_str(), "ja", "en")
                .unwrap()
                .unwrap();
            repo.mark_translated(row.id, en).unwrap();
        }
    }

    #[test]
    fn test_package_field_queues_document() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        let report = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.failed, 0);

        let docs = DocumentRepository::new(Arc::clone(&fx.db));
        let doc = docs
            .find(EntityKind::Field, "field::sale.order::amount_total", "en")
            .unwrap()
            .unwrap();
        assert_eq!(doc.state, DocumentState::Queued);
        assert!(doc.doc_text.starts_with("Field: Total Amount (sale.order.amount_total)"));
        assert_eq!(doc.collection, "lexica_field");
        assert_eq!(doc.doc_id, document_id("field::sale.order::amount_total", "en"));
        assert_eq!(doc.metadata["field_name"], "amount_total");
    }

    #[test]
    fn test_package_rerun_is_noop() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        let first = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(first.queued, 1);

        // Unchanged upstream: the second pass skips at the document gate.
        let second = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn test_package_source_language_uses_metadata_text() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        let report = fx
            .stage
            .run(&[], "ja", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);

        let docs = DocumentRepository::new(Arc::clone(&fx.db));
        let doc = docs
            .find(EntityKind::Field, "field::sale.order::amount_total", "ja")
            .unwrap()
            .unwrap();
        assert!(doc.doc_text.contains("合計金額"));
        assert!(!doc.doc_text.contains("Total Amount"));
    }

    #[test]
    fn test_package_unknown_language_fails_without_fallback() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        let report = fx
            .stage
            .run(&[], "de", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_package_unknown_language_with_fallback() {
        let db = Arc::new(Database::in_memory().unwrap());
        let stage = PackageStage::new(
            Arc::clone(&db),
            PackagingConfig {
                fallback_to_source: true,
                ..Default::default()
            },
        );
        seed_translated_field(&db, "amount_total", "合計金額", "Total Amount");

        let report = stage
            .run(&[], "de", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_package_missing_metadata_is_per_record_failure() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        // A translated row whose metadata has vanished.
        let repo = TranslationRepository::new(Arc::clone(&fx.db));
        let nk = FieldKey::new("ghost.model", "ghost_field").unwrap().natural_key();
        repo.upsert_source(
            EntityKind::Field,
            &nk,
            "ja",
            "en",
            "text",
            &ContentHash::compute("text"),
            ChangeMode::UpsertIfChanged,
        )
        .unwrap();
        let row = repo.find(EntityKind::Field, nk.as_str(), "ja", "en").unwrap().unwrap();
        repo.mark_translated(row.id, "Ghost").unwrap();

        let report = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        // The healthy record still packages.
        assert_eq!(report.queued, 1);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_package_view_documents() {
        let fx = make_fixture();
        seed_translated_view(&fx.db, "sale.action_orders");

        let report = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 2);

        let docs = DocumentRepository::new(Arc::clone(&fx.db));
        let purpose = docs
            .find(EntityKind::ViewCommon, "view_common::sale.action_orders::purpose", "en")
            .unwrap()
            .unwrap();
        assert!(purpose.doc_text.contains("Purpose: Browse and edit orders"));
        assert!(purpose.doc_text.contains("Usage: Manage orders"));
        assert!(purpose.doc_text.contains("primary view=list"));
        assert_eq!(purpose.collection, "lexica_view_common");

        let help = docs
            .find(EntityKind::ViewCommon, "view_common::sale.action_orders::help", "en")
            .unwrap()
            .unwrap();
        assert_ne!(purpose.doc_id, help.doc_id);
    }

    #[test]
    fn test_collection_map_overrides_default() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");

        let mut map = Map::new();
        map.insert(EntityKind::Field, "custom_collection".to_string());
        fx.stage.run(&[], "en", &map, 100, ChangeMode::UpsertIfChanged).unwrap();

        let docs = DocumentRepository::new(Arc::clone(&fx.db));
        let doc = docs
            .find(EntityKind::Field, "field::sale.order::amount_total", "en")
            .unwrap()
            .unwrap();
        assert_eq!(doc.collection, "custom_collection");
    }

    #[test]
    fn test_entity_kind_filter() {
        let fx = make_fixture();
        seed_translated_field(&fx.db, "amount_total", "合計金額", "Total Amount");
        seed_translated_view(&fx.db, "sale.action_orders");

        let report = fx
            .stage
            .run(&[EntityKind::Field], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);
    }

    #[test]
    fn test_pending_rows_are_not_packaged() {
        let fx = make_fixture();
        FieldRepository::new(Arc::clone(&fx.db))
            .upsert(&NewField {
                model: "sale.order".to_string(),
                field_name: "amount_total".to_string(),
                labels: labels(&[("ja", "合計金額")]),
                ..Default::default()
            })
            .unwrap();
        let repo = TranslationRepository::new(Arc::clone(&fx.db));
        let nk = FieldKey::new("sale.order", "amount_total").unwrap().natural_key();
        repo.upsert_source(
            EntityKind::Field,
            &nk,
            "ja",
            "en",
            "合計金額",
            &ContentHash::compute("合計金額"),
            ChangeMode::UpsertIfChanged,
        )
        .unwrap();

        // Still pending: nothing to package.
        let report = fx
            .stage
            .run(&[], "en", &Map::new(), 100, ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_split_label_notes() {
        assert_eq!(split_label_notes("Label\n\nNotes here"), ("Label", "Notes here"));
        assert_eq!(split_label_notes("Just a label"), ("Just a label", ""));
        assert_eq!(split_label_notes("A\nB"), ("A", "B"));
    }
}
