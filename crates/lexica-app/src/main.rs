//! Lexica application binary - composition root.
//!
//! Ties the pipeline crates together into one executable:
//! 1. Parse CLI arguments and load the TOML configuration
//! 2. Open storage (WAL-mode SQLite with migrations)
//! 3. Run exactly one batch operation (import / extract / translate /
//!    package / index-upsert / status)
//! 4. Print the operation report as JSON and exit
//!
//! Periodic execution is the external scheduler's job; every operation is
//! idempotent, so overlapping or repeated invocations are safe.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;

use lexica_core::config::LexicaConfig;
use lexica_core::error::LexicaError;
use lexica_core::types::{ChangeMode, EntityKind, ViewTextTarget};
use lexica_index::{HttpVectorStore, IndexReconciler};
use lexica_pipeline::{
    build_translator, ExtractStage, ExtractTargets, MetadataImporter, MetadataSeed, PackageStage,
    StatusService, TranslateStage,
};
use lexica_storage::Database;

mod cli;

use cli::{CliArgs, Command};

fn parse_entities(raw: &[String]) -> Result<Option<Vec<EntityKind>>, LexicaError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        out.push(item.parse::<EntityKind>()?);
    }
    Ok(Some(out))
}

/// Parse `entity=collection` override pairs.
fn parse_collection_map(raw: &[String]) -> Result<HashMap<EntityKind, String>, LexicaError> {
    let mut map = HashMap::new();
    for pair in raw {
        let Some((entity, collection)) = pair.split_once('=') else {
            return Err(LexicaError::Config(format!(
                "collection override must be entity=collection: {}",
                pair
            )));
        };
        map.insert(entity.parse::<EntityKind>()?, collection.to_string());
    }
    Ok(map)
}

fn print_report<T: serde::Serialize>(report: &T) -> Result<(), LexicaError> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn run(args: CliArgs, config: LexicaConfig, db: Arc<Database>) -> Result<(), LexicaError> {
    match args.command {
        Command::Import { ref seed } => {
            let json = std::fs::read_to_string(seed)?;
            let seed = MetadataSeed::from_json(&json)?;
            let report = MetadataImporter::new(db).run(&seed)?;
            print_report(&report)
        }

        Command::Extract {
            ref kinds,
            ref models,
            ref fields,
            ref actions,
            ref targets,
            ref mode,
        } => {
            // Mode, kinds, and targets are validated before any database
            // work.
            let mode: ChangeMode = mode.parse()?;
            let kinds = parse_entities(kinds)?.unwrap_or_default();
            let mut view_targets = Vec::with_capacity(targets.len());
            for t in targets {
                view_targets.push(t.parse::<ViewTextTarget>()?);
            }
            let targets = ExtractTargets {
                kinds,
                models: models.clone(),
                fields: fields.clone(),
                action_xmlids: actions.clone(),
                view_targets,
            };
            let stage = ExtractStage::new(
                db,
                &config.translation.source_lang,
                &config.translation.target_lang,
            );
            let report = stage.run(&targets, mode)?;
            print_report(&report)
        }

        Command::Translate {
            limit,
            ref source_lang,
            ref target_lang,
            ref entities,
        } => {
            let entities = parse_entities(entities)?;
            let translator = build_translator(&config.translation)?;
            let stage = TranslateStage::new(
                db,
                translator,
                config.translation.text_limit,
                config.translation.max_attempts,
            );
            let report = stage
                .run(
                    limit.unwrap_or(config.translation.batch_limit),
                    source_lang.as_deref().unwrap_or(&config.translation.source_lang),
                    target_lang.as_deref().unwrap_or(&config.translation.target_lang),
                    entities.as_deref(),
                )
                .await?;
            print_report(&report)
        }

        Command::Package {
            ref entities,
            ref lang,
            ref collection,
            limit,
            ref mode,
        } => {
            let mode: ChangeMode = mode.parse()?;
            let entities = parse_entities(entities)?.unwrap_or_default();
            let collection_map = parse_collection_map(collection)?;
            let stage = PackageStage::new(db, config.packaging.clone());
            let report = stage.run(
                &entities,
                lang.as_deref().unwrap_or(&config.translation.target_lang),
                &collection_map,
                limit,
                mode,
            )?;
            print_report(&report)
        }

        Command::IndexUpsert {
            ref collections,
            limit,
            dry_run,
        } => {
            let store = HttpVectorStore::new(&config.index)?;
            let reconciler = IndexReconciler::new(
                db,
                store,
                config.index.retry_failed,
                config.index.max_attempts,
            );
            let filter = (!collections.is_empty()).then_some(collections.as_slice());
            let report = reconciler.run(filter, limit, dry_run).await?;
            print_report(&report)
        }

        Command::Status { ref trace } => {
            let service = StatusService::new(db);
            match trace {
                Some(natural_key) => print_report(&service.trace(natural_key)?),
                None => print_report(&service.summary()?),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = LexicaConfig::load_or_default(&config_file);

    // Tracing. Priority: --log-level flag > config value.
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Lexica v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("lexica.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    run(args, config, db).await?;
    Ok(())
}
