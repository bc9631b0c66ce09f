//! CLI argument definitions for the Lexica binary.
//!
//! Uses `clap` with derive macros. Each subcommand maps to one batch
//! operation; an external scheduler (cron or similar) provides periodicity
//! by invoking the binary. Every operation is idempotent and safe to
//! re-invoke.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lexica: metadata extraction, translation, packaging, and vector
/// indexing as idempotent batch runs.
#[derive(Parser, Debug)]
#[command(name = "lexica", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a metadata seed file into the metadata tables.
    Import {
        /// JSON seed file (models, fields, view_commons, menus).
        #[arg(long)]
        seed: PathBuf,
    },

    /// Gate metadata source text into the translation table.
    Extract {
        /// Restrict to entity kinds: field, view_common. Empty means both.
        #[arg(long)]
        kinds: Vec<String>,

        /// Restrict field extraction to these models.
        #[arg(long)]
        models: Vec<String>,

        /// Restrict field extraction to these field names.
        #[arg(long)]
        fields: Vec<String>,

        /// View-common records to extract, by action xmlid.
        #[arg(long)]
        actions: Vec<String>,

        /// View text slots: purpose, help. Empty means both.
        #[arg(long)]
        targets: Vec<String>,

        /// upsert_if_changed, force_overwrite, or skip_existing.
        #[arg(long, default_value = "upsert_if_changed")]
        mode: String,
    },

    /// Translate pending rows for a language pair.
    Translate {
        /// Maximum rows this run.
        #[arg(long)]
        limit: Option<u32>,

        /// Source language (defaults to config).
        #[arg(long)]
        source_lang: Option<String>,

        /// Target language (defaults to config).
        #[arg(long)]
        target_lang: Option<String>,

        /// Restrict to entity kinds: field, view_common.
        #[arg(long)]
        entities: Vec<String>,
    },

    /// Assemble translated rows into queued documents.
    Package {
        /// Restrict to entity kinds: field, view_common. Empty means both.
        #[arg(long)]
        entities: Vec<String>,

        /// Document language (defaults to the configured target language).
        #[arg(long)]
        lang: Option<String>,

        /// Collection overrides as entity=collection pairs
        /// (e.g. field=my_fields).
        #[arg(long)]
        collection: Vec<String>,

        /// Maximum rows this run.
        #[arg(long, default_value_t = 1000)]
        limit: u32,

        /// upsert_if_changed or force_overwrite.
        #[arg(long, default_value = "upsert_if_changed")]
        mode: String,
    },

    /// Push queued documents to the vector store.
    IndexUpsert {
        /// Restrict to these collections. Empty means all.
        #[arg(long)]
        collections: Vec<String>,

        /// Maximum documents this run.
        #[arg(long, default_value_t = 1000)]
        limit: u32,

        /// Select and count without calling the store or mutating state.
        #[arg(long)]
        dry_run: bool,
    },

    /// Report per-state counts, or trace one natural key.
    Status {
        /// Natural key to trace (e.g. field::sale.order::amount_total).
        #[arg(long)]
        trace: Option<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LEXICA_CONFIG env var > ~/.lexica/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LEXICA_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> PathBuf {
        if let Some(ref p) = self.data_dir {
            return p.clone();
        }
        expand_home(config_data_dir)
    }
}

/// Expand a leading ~ to the home directory.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".lexica").join("config.toml");
    }
    PathBuf::from("config.toml")
}
