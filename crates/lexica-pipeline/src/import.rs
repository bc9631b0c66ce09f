//! Metadata import: JSON seed → metadata tables.
//!
//! The Extraction Store's single writer. Loads a seed describing models,
//! fields, view definitions, and menus, upserts everything keyed by
//! technical names, and bootstraps the per-presentation-type view detail
//! rows from each view-common's declared types. Idempotent: re-importing
//! the same seed updates rows in place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lexica_core::error::Result;
use lexica_core::types::ViewType;
use lexica_storage::{
    Database, FieldRepository, MenuRepository, ModelRepository, NewField, NewMenu, NewModel,
    NewViewCommon, ViewCommonRepository, ViewRepository,
};

/// A notebook tab in the seed, addressed by presentation type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTab {
    pub view_type: ViewType,
    pub name: String,
    #[serde(default)]
    pub sequence: i64,
}

/// A smart button in the seed, addressed by presentation type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSmartButton {
    pub view_type: ViewType,
    pub name: String,
    #[serde(default)]
    pub action_xmlid: String,
    #[serde(default)]
    pub sequence: i64,
}

/// One view definition in the seed: the common record plus child
/// collections hanging off its detail rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedViewCommon {
    #[serde(flatten)]
    pub common: NewViewCommon,
    #[serde(default)]
    pub tabs: Vec<SeedTab>,
    #[serde(default)]
    pub smart_buttons: Vec<SeedSmartButton>,
}

/// The JSON seed shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSeed {
    #[serde(default)]
    pub models: Vec<NewModel>,
    #[serde(default)]
    pub fields: Vec<NewField>,
    #[serde(default)]
    pub view_commons: Vec<SeedViewCommon>,
    #[serde(default)]
    pub menus: Vec<NewMenu>,
}

impl MetadataSeed {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of one import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub models: u64,
    pub fields: u64,
    pub view_commons: u64,
    pub views_bootstrapped: u64,
    pub tabs: u64,
    pub smart_buttons: u64,
    pub menus: u64,
}

/// The metadata importer.
pub struct MetadataImporter {
    models: ModelRepository,
    fields: FieldRepository,
    view_commons: ViewCommonRepository,
    views: ViewRepository,
    menus: MenuRepository,
}

impl MetadataImporter {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            models: ModelRepository::new(Arc::clone(&db)),
            fields: FieldRepository::new(Arc::clone(&db)),
            view_commons: ViewCommonRepository::new(Arc::clone(&db)),
            views: ViewRepository::new(Arc::clone(&db)),
            menus: MenuRepository::new(db),
        }
    }

    /// Upsert the seed into the metadata tables and bootstrap view detail
    /// rows. The declared primary type goes through the same write path as
    /// any other primary change, so the single-primary invariant holds.
    pub fn run(&self, seed: &MetadataSeed) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for model in &seed.models {
            self.models.upsert(model)?;
            report.models += 1;
        }

        for field in &seed.fields {
            self.fields.upsert(field)?;
            report.fields += 1;
        }

        for entry in &seed.view_commons {
            let vc = &entry.common;
            let common_id = self.view_commons.upsert(vc)?;
            report.view_commons += 1;

            let mut detail_ids = std::collections::HashMap::new();
            for &view_type in &vc.view_types {
                let is_primary = vc.primary_view_type == Some(view_type);
                let detail = self.views.upsert_detail(common_id, view_type, true, is_primary)?;
                detail_ids.insert(view_type, detail.id);
                report.views_bootstrapped += 1;
            }
            if let Some(primary) = vc.primary_view_type {
                if !vc.view_types.contains(&primary) {
                    warn!(
                        action_xmlid = %vc.action_xmlid,
                        primary = %primary,
                        "Declared primary view type is not among the view types"
                    );
                }
            }

            for tab in &entry.tabs {
                let Some(&view_id) = detail_ids.get(&tab.view_type) else {
                    warn!(
                        action_xmlid = %vc.action_xmlid,
                        view_type = %tab.view_type,
                        tab = %tab.name,
                        "Tab references a view type the action does not declare"
                    );
                    continue;
                };
                self.views.upsert_tab(view_id, &tab.name, tab.sequence)?;
                report.tabs += 1;
            }

            for button in &entry.smart_buttons {
                let Some(&view_id) = detail_ids.get(&button.view_type) else {
                    warn!(
                        action_xmlid = %vc.action_xmlid,
                        view_type = %button.view_type,
                        button = %button.name,
                        "Smart button references a view type the action does not declare"
                    );
                    continue;
                };
                self.views
                    .upsert_smart_button(view_id, &button.name, &button.action_xmlid, button.sequence)?;
                report.smart_buttons += 1;
            }
        }

        for menu in &seed.menus {
            self.menus.upsert(menu)?;
            report.menus += 1;
        }

        info!(
            models = report.models,
            fields = report.fields,
            view_commons = report.view_commons,
            views = report.views_bootstrapped,
            tabs = report.tabs,
            smart_buttons = report.smart_buttons,
            menus = report.menus,
            "Metadata import complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexica_core::types::ViewType;

    const SEED: &str = r#"{
        "models": [
            {"model": "sale.order", "model_table": "sale_order", "labels": {"ja": "受注"}}
        ],
        "fields": [
            {"model": "sale.order", "model_table": "sale_order", "field_name": "amount_total",
             "ttype": "monetary", "labels": {"ja": "合計金額"}, "notes": "税込の合計"},
            {"model": "sale.order", "model_table": "sale_order", "field_name": "partner_id",
             "ttype": "many2one", "labels": {"ja": "顧客"}}
        ],
        "view_commons": [
            {"action_xmlid": "sale.action_orders", "action_name": "受注",
             "model": "sale.order", "model_table": "sale_order",
             "view_types": ["list", "form", "kanban"], "primary_view_type": "list",
             "purpose": "受注の一覧と編集", "help_source_text": "受注を管理します",
             "tabs": [
                {"view_type": "form", "name": "明細", "sequence": 0},
                {"view_type": "form", "name": "その他情報", "sequence": 1}
             ],
             "smart_buttons": [
                {"view_type": "form", "name": "請求書", "action_xmlid": "account.action_invoices"}
             ]}
        ],
        "menus": [
            {"menu_xmlid": "sale.menu_root", "name": "販売", "sequence": 1}
        ]
    }"#;

    #[test]
    fn test_seed_parses() {
        let seed = MetadataSeed::from_json(SEED).unwrap();
        assert_eq!(seed.models.len(), 1);
        assert_eq!(seed.fields.len(), 2);
        assert_eq!(seed.view_commons.len(), 1);
        assert_eq!(seed.menus.len(), 1);
    }

    #[test]
    fn test_seed_rejects_bad_json() {
        assert!(MetadataSeed::from_json("{ nope").is_err());
        assert!(MetadataSeed::from_json(r#"{"view_commons": [{"action_xmlid": "a", "view_types": ["gantt"]}]}"#).is_err());
    }

    #[test]
    fn test_import_populates_tables() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let seed = MetadataSeed::from_json(SEED).unwrap();

        let report = importer.run(&seed).unwrap();
        assert_eq!(report.models, 1);
        assert_eq!(report.fields, 2);
        assert_eq!(report.view_commons, 1);
        assert_eq!(report.views_bootstrapped, 3);
        assert_eq!(report.tabs, 2);
        assert_eq!(report.smart_buttons, 1);
        assert_eq!(report.menus, 1);

        let fields = FieldRepository::new(Arc::clone(&db));
        assert!(fields.find("sale.order", "amount_total").unwrap().is_some());
    }

    #[test]
    fn test_import_attaches_children_to_form_view() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        importer.run(&MetadataSeed::from_json(SEED).unwrap()).unwrap();

        let vc = ViewCommonRepository::new(Arc::clone(&db))
            .find_by_action_xmlid("sale.action_orders")
            .unwrap()
            .unwrap();
        let views = ViewRepository::new(Arc::clone(&db)).list_by_common(vc.id).unwrap();
        let form = views.iter().find(|v| v.view_type == ViewType::Form).unwrap();

        let view_repo = ViewRepository::new(Arc::clone(&db));
        let tabs = view_repo.list_tabs(form.id).unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].name, "明細");

        let buttons = view_repo.list_smart_buttons(form.id).unwrap();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].action_xmlid, "account.action_invoices");
    }

    #[test]
    fn test_import_skips_child_with_undeclared_view_type() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let mut seed = MetadataSeed::from_json(SEED).unwrap();
        seed.view_commons[0].tabs.push(SeedTab {
            view_type: ViewType::Pivot,
            name: "orphan".to_string(),
            sequence: 0,
        });

        // The orphan tab is skipped, not an error.
        let report = importer.run(&seed).unwrap();
        assert_eq!(report.tabs, 2);
    }

    #[test]
    fn test_import_bootstraps_primary_view() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let seed = MetadataSeed::from_json(SEED).unwrap();
        importer.run(&seed).unwrap();

        let vc = ViewCommonRepository::new(Arc::clone(&db))
            .find_by_action_xmlid("sale.action_orders")
            .unwrap()
            .unwrap();
        let views = ViewRepository::new(Arc::clone(&db)).list_by_common(vc.id).unwrap();
        assert_eq!(views.len(), 3);
        let primary: Vec<_> = views.iter().filter(|v| v.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].view_type, ViewType::List);
    }

    #[test]
    fn test_import_is_idempotent() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let seed = MetadataSeed::from_json(SEED).unwrap();

        importer.run(&seed).unwrap();
        importer.run(&seed).unwrap();

        let fields = FieldRepository::new(Arc::clone(&db));
        assert_eq!(fields.list(None, None).unwrap().len(), 2);

        let vc = ViewCommonRepository::new(Arc::clone(&db))
            .find_by_action_xmlid("sale.action_orders")
            .unwrap()
            .unwrap();
        let views = ViewRepository::new(Arc::clone(&db)).list_by_common(vc.id).unwrap();
        assert_eq!(views.len(), 3);
        assert_eq!(views.iter().filter(|v| v.is_primary).count(), 1);
    }

    #[test]
    fn test_reimport_changed_primary_moves_flag() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let mut seed = MetadataSeed::from_json(SEED).unwrap();
        importer.run(&seed).unwrap();

        seed.view_commons[0].common.primary_view_type = Some(ViewType::Form);
        importer.run(&seed).unwrap();

        let vc = ViewCommonRepository::new(Arc::clone(&db))
            .find_by_action_xmlid("sale.action_orders")
            .unwrap()
            .unwrap();
        let views = ViewRepository::new(Arc::clone(&db)).list_by_common(vc.id).unwrap();
        let primary: Vec<_> = views.iter().filter(|v| v.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].view_type, ViewType::Form);
    }

    #[test]
    fn test_empty_seed_is_fine() {
        let db = Arc::new(Database::in_memory().unwrap());
        let importer = MetadataImporter::new(Arc::clone(&db));
        let report = importer.run(&MetadataSeed::default()).unwrap();
        assert_eq!(report.fields, 0);
    }
}
