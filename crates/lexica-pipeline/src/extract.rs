//! Extraction stage: metadata tables → translation rows.
//!
//! Walks the requested field and view metadata, assembles each entity's
//! source-language text, and pushes it through the change gate into the
//! translations table. Entities with no source text, or that already carry
//! target-language text in the metadata itself, are skipped and reported.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lexica_core::error::Result;
use lexica_core::hash::{normalize_text, ContentHash};
use lexica_core::identity::{FieldKey, ViewKey};
use lexica_core::types::{ChangeMode, EntityKind, ViewTextTarget};
use lexica_storage::{
    Database, FieldRecord, FieldRepository, SourceUpsertOutcome, TranslationRepository,
    ViewCommonRecord, ViewCommonRepository,
};

/// What to extract. Empty filter lists mean "everything" for fields and
/// "nothing" for view commons (views are always addressed explicitly).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractTargets {
    /// Entity kinds to process. Empty means both.
    #[serde(default)]
    pub kinds: Vec<EntityKind>,
    /// Restrict field extraction to these models (case-insensitive).
    #[serde(default)]
    pub models: Vec<String>,
    /// Restrict field extraction to these field names (case-insensitive).
    #[serde(default)]
    pub fields: Vec<String>,
    /// View-common records to extract, by action xmlid.
    #[serde(default)]
    pub action_xmlids: Vec<String>,
    /// Which view text slots to extract. Empty means both.
    #[serde(default)]
    pub view_targets: Vec<ViewTextTarget>,
}

impl ExtractTargets {
    fn includes(&self, kind: EntityKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Why a single entity was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No source-language text to translate.
    NoSourceText,
    /// Target-language text already exists in the metadata.
    HasTargetText,
    /// Stored hash matches; nothing changed.
    NoChange,
    /// A row exists and the mode was `skip_existing`.
    ExistsSkip,
    /// The requested entity does not exist in the metadata tables.
    NotFound,
    /// The technical identifiers could not form a natural key.
    InvalidKey,
}

/// One per-entity decision, for operational reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDetail {
    pub natural_key: String,
    pub reason: SkipReason,
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractReport {
    /// Rows inserted or reset to pending.
    pub queued: u64,
    /// Entities that produced no write.
    pub skipped: u64,
    /// Per-entity skip decisions.
    pub details: Vec<ExtractDetail>,
}

impl ExtractReport {
    fn skip(&mut self, natural_key: String, reason: SkipReason) {
        self.skipped += 1;
        self.details.push(ExtractDetail { natural_key, reason });
    }
}

/// The extraction stage.
pub struct ExtractStage {
    fields: FieldRepository,
    view_commons: ViewCommonRepository,
    translations: TranslationRepository,
    src_lang: String,
    tgt_lang: String,
}

impl ExtractStage {
    pub fn new(db: Arc<Database>, src_lang: &str, tgt_lang: &str) -> Self {
        Self {
            fields: FieldRepository::new(Arc::clone(&db)),
            view_commons: ViewCommonRepository::new(Arc::clone(&db)),
            translations: TranslationRepository::new(db),
            src_lang: src_lang.to_string(),
            tgt_lang: tgt_lang.to_string(),
        }
    }

    /// Run one extraction pass. Each entity's gate decision is independent;
    /// re-running with unchanged metadata performs zero writes.
    pub fn run(&self, targets: &ExtractTargets, mode: ChangeMode) -> Result<ExtractReport> {
        let mut report = ExtractReport::default();

        self.extract_fields(targets, mode, &mut report)?;
        self.extract_view_commons(targets, mode, &mut report)?;

        info!(
            queued = report.queued,
            skipped = report.skipped,
            mode = mode.as_str(),
            "Extraction run complete"
        );
        Ok(report)
    }

    fn extract_fields(
        &self,
        targets: &ExtractTargets,
        mode: ChangeMode,
        report: &mut ExtractReport,
    ) -> Result<()> {
        if !targets.includes(EntityKind::Field) {
            return Ok(());
        }
        // Field extraction is opt-out: no filters means every field.
        let models = (!targets.models.is_empty()).then_some(targets.models.as_slice());
        let field_names = (!targets.fields.is_empty()).then_some(targets.fields.as_slice());
        let rows = self.fields.list(models, field_names)?;

        for row in rows {
            let key = match FieldKey::new(&row.model, &row.field_name) {
                Ok(key) => key,
                Err(e) => {
                    warn!(model = %row.model, field = %row.field_name, error = %e, "Skipping field with invalid identifiers");
                    report.skip(
                        format!("field::{}::{}", row.model, row.field_name),
                        SkipReason::InvalidKey,
                    );
                    continue;
                }
            };
            let nk = key.natural_key();

            let source_text = self.field_source_text(&row);
            if source_text.is_empty() {
                report.skip(nk.into_string(), SkipReason::NoSourceText);
                continue;
            }
            if Self::has_lang_text(&row.labels, &self.tgt_lang) {
                report.skip(nk.into_string(), SkipReason::HasTargetText);
                continue;
            }

            let hash = ContentHash::compute(&source_text);
            let outcome = self.translations.upsert_source(
                EntityKind::Field,
                &nk,
                &self.src_lang,
                &self.tgt_lang,
                &source_text,
                &hash,
                mode,
            )?;
            Self::tally(outcome, nk.into_string(), report);
        }
        Ok(())
    }

    fn extract_view_commons(
        &self,
        targets: &ExtractTargets,
        mode: ChangeMode,
        report: &mut ExtractReport,
    ) -> Result<()> {
        if !targets.includes(EntityKind::ViewCommon) || targets.action_xmlids.is_empty() {
            return Ok(());
        }
        let view_targets: &[ViewTextTarget] = if targets.view_targets.is_empty() {
            &[ViewTextTarget::Purpose, ViewTextTarget::Help]
        } else {
            &targets.view_targets
        };

        for xmlid in &targets.action_xmlids {
            let Some(record) = self.view_commons.find_by_action_xmlid(xmlid)? else {
                report.skip(format!("view_common::{}::*", xmlid), SkipReason::NotFound);
                continue;
            };

            for &target in view_targets {
                let key = match ViewKey::new(&record.action_xmlid, target) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(action_xmlid = %record.action_xmlid, error = %e, "Skipping view with invalid identifiers");
                        report.skip(
                            format!("view_common::{}::{}", record.action_xmlid, target),
                            SkipReason::InvalidKey,
                        );
                        continue;
                    }
                };
                let nk = key.natural_key();

                let (source_text, has_target) = self.view_source_text(&record, target);
                if source_text.is_empty() {
                    report.skip(nk.into_string(), SkipReason::NoSourceText);
                    continue;
                }
                if has_target {
                    report.skip(nk.into_string(), SkipReason::HasTargetText);
                    continue;
                }

                let hash = ContentHash::compute(&source_text);
                let outcome = self.translations.upsert_source(
                    EntityKind::ViewCommon,
                    &nk,
                    &self.src_lang,
                    &self.tgt_lang,
                    &source_text,
                    &hash,
                    mode,
                )?;
                Self::tally(outcome, nk.into_string(), report);
            }
        }
        Ok(())
    }

    /// Source-language label plus notes, blank-line separated.
    fn field_source_text(&self, row: &FieldRecord) -> String {
        let label = normalize_text(row.labels.get(&self.src_lang).map(String::as_str).unwrap_or(""));
        let notes = normalize_text(&row.notes);
        match (label.is_empty(), notes.is_empty()) {
            (false, false) => format!("{}\n\n{}", label, notes),
            (false, true) => label,
            (true, false) => notes,
            (true, true) => String::new(),
        }
    }

    /// Source text and has-target-text flag for one view text slot.
    fn view_source_text(&self, record: &ViewCommonRecord, target: ViewTextTarget) -> (String, bool) {
        match target {
            ViewTextTarget::Purpose => {
                let source = if record.purpose.trim().is_empty() {
                    record
                        .purpose_labels
                        .get(&self.src_lang)
                        .map(String::as_str)
                        .unwrap_or("")
                } else {
                    &record.purpose
                };
                (
                    normalize_text(source),
                    Self::has_lang_text(&record.purpose_labels, &self.tgt_lang),
                )
            }
            ViewTextTarget::Help => (
                normalize_text(&record.help_source_text),
                !record.help_target_text.trim().is_empty(),
            ),
        }
    }

    fn has_lang_text(labels: &std::collections::HashMap<String, String>, lang: &str) -> bool {
        labels.get(lang).map(|v| !v.trim().is_empty()).unwrap_or(false)
    }

    fn tally(outcome: SourceUpsertOutcome, natural_key: String, report: &mut ExtractReport) {
        match outcome {
            SourceUpsertOutcome::Inserted | SourceUpsertOutcome::Updated => {
                debug!(natural_key = %natural_key, outcome = ?outcome, "Entity queued for translation");
                report.queued += 1;
            }
            SourceUpsertOutcome::SkippedNoChange => {
                report.skip(natural_key, SkipReason::NoChange);
            }
            SourceUpsertOutcome::SkippedExisting => {
                report.skip(natural_key, SkipReason::ExistsSkip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use lexica_core::types::{TranslationState, ViewType};
    use lexica_storage::{NewField, NewViewCommon};

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct Fixture {
        db: Arc<Database>,
        stage: ExtractStage,
    }

    fn make_fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let stage = ExtractStage::new(Arc::clone(&db), "ja", "en");
        Fixture { db, stage }
    }

    fn seed_field(db: &Arc<Database>, model: &str, field: &str, ja: &str, notes: &str) {
        let repo = FieldRepository::new(Arc::clone(db));
        repo.upsert(&NewField {
            model: model.to_string(),
            model_table: model.replace('.', "_"),
            field_name: field.to_string(),
            ttype: "char".to_string(),
            labels: if ja.is_empty() { HashMap::new() } else { labels(&[("ja", ja)]) },
            notes: notes.to_string(),
        })
        .unwrap();
    }

    fn seed_view(db: &Arc<Database>, xmlid: &str, purpose: &str, help: &str) {
        let repo = ViewCommonRepository::new(Arc::clone(db));
        repo.upsert(&NewViewCommon {
            action_xmlid: xmlid.to_string(),
            action_name: "受注".to_string(),
            model: "sale.order".to_string(),
            model_table: "sale_order".to_string(),
            view_types: vec![ViewType::List, ViewType::Form],
            primary_view_type: Some(ViewType::List),
            purpose: purpose.to_string(),
            purpose_labels: HashMap::new(),
            help_source_text: help.to_string(),
            help_target_text: String::new(),
        })
        .unwrap();
    }

    #[test]
    fn test_extract_field_queues_pending_row() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "税込の合計");

        let report = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 0);

        let repo = TranslationRepository::new(Arc::clone(&fx.db));
        let row = repo
            .find(EntityKind::Field, "field::sale.order::amount_total", "ja", "en")
            .unwrap()
            .unwrap();
        assert_eq!(row.state, TranslationState::Pending);
        assert_eq!(row.source_text, "合計金額\n\n税込の合計");
    }

    #[test]
    fn test_extract_skips_field_without_source_text() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "", "");

        let report = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.details[0].reason, SkipReason::NoSourceText);
    }

    #[test]
    fn test_extract_skips_field_with_target_text() {
        let fx = make_fixture();
        let repo = FieldRepository::new(Arc::clone(&fx.db));
        repo.upsert(&NewField {
            model: "sale.order".to_string(),
            field_name: "amount_total".to_string(),
            labels: labels(&[("ja", "合計金額"), ("en", "Total Amount")]),
            ..Default::default()
        })
        .unwrap();

        let report = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.details[0].reason, SkipReason::HasTargetText);
    }

    #[test]
    fn test_extract_rerun_is_noop() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "");

        let first = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(first.queued, 1);

        // Unchanged metadata: the second pass writes nothing.
        let second = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.details[0].reason, SkipReason::NoChange);
    }

    #[test]
    fn test_extract_requeues_only_changed_field() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "");
        seed_field(&fx.db, "sale.order", "partner_id", "顧客", "");

        fx.stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();

        // One field's label changes; only it is requeued.
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額（税込）", "");
        let report = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_extract_field_filters() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "");
        seed_field(&fx.db, "res.partner", "name", "名前", "");

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    models: vec!["SALE.ORDER".to_string()],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        assert_eq!(report.queued, 1);
    }

    #[test]
    fn test_extract_view_common_both_targets() {
        let fx = make_fixture();
        seed_view(&fx.db, "sale.action_orders", "受注の一覧と編集", "受注を管理します");

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    action_xmlids: vec!["sale.action_orders".to_string()],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        assert_eq!(report.queued, 2);

        let repo = TranslationRepository::new(Arc::clone(&fx.db));
        assert!(repo
            .find(EntityKind::ViewCommon, "view_common::sale.action_orders::purpose", "ja", "en")
            .unwrap()
            .is_some());
        assert!(repo
            .find(EntityKind::ViewCommon, "view_common::sale.action_orders::help", "ja", "en")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_extract_view_common_single_target() {
        let fx = make_fixture();
        seed_view(&fx.db, "sale.action_orders", "受注の一覧と編集", "受注を管理します");

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    action_xmlids: vec!["sale.action_orders".to_string()],
                    view_targets: vec![ViewTextTarget::Help],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        assert_eq!(report.queued, 1);
    }

    #[test]
    fn test_extract_view_common_not_found() {
        let fx = make_fixture();

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    action_xmlids: vec!["missing.action".to_string()],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.details[0].reason, SkipReason::NotFound);
        assert_eq!(report.details[0].natural_key, "view_common::missing.action::*");
    }

    #[test]
    fn test_extract_view_common_skips_empty_slot() {
        let fx = make_fixture();
        seed_view(&fx.db, "sale.action_orders", "受注の一覧と編集", "");

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    action_xmlids: vec!["sale.action_orders".to_string()],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        // Purpose queued, help has no source text.
        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.details[0].reason, SkipReason::NoSourceText);
    }

    #[test]
    fn test_kind_scope_excludes_fields() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "");
        seed_view(&fx.db, "sale.action_orders", "受注の一覧と編集", "受注を管理します");

        let report = fx
            .stage
            .run(
                &ExtractTargets {
                    kinds: vec![EntityKind::ViewCommon],
                    action_xmlids: vec!["sale.action_orders".to_string()],
                    ..Default::default()
                },
                ChangeMode::UpsertIfChanged,
            )
            .unwrap();
        // Only the two view slots; the field is out of scope.
        assert_eq!(report.queued, 2);

        let repo = TranslationRepository::new(Arc::clone(&fx.db));
        assert!(repo
            .find(EntityKind::Field, "field::sale.order::amount_total", "ja", "en")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_skip_existing_mode_leaves_rows_alone() {
        let fx = make_fixture();
        seed_field(&fx.db, "sale.order", "amount_total", "合計金額", "");
        fx.stage
            .run(&ExtractTargets::default(), ChangeMode::UpsertIfChanged)
            .unwrap();

        seed_field(&fx.db, "sale.order", "amount_total", "変更後", "");
        let report = fx
            .stage
            .run(&ExtractTargets::default(), ChangeMode::SkipExisting)
            .unwrap();
        assert_eq!(report.queued, 0);
        assert_eq!(report.details[0].reason, SkipReason::ExistsSkip);
    }
}
