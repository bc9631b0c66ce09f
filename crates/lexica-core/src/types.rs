use serde::{Deserialize, Serialize};

use crate::error::LexicaError;

// =============================================================================
// Enums
// =============================================================================

/// The kind of logical entity the pipeline processes.
///
/// Closed enumeration: extending it is a schema migration, not a runtime
/// parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A single model field (label + notes).
    Field,
    /// An action-level view definition (purpose + help text).
    ViewCommon,
}

impl EntityKind {
    /// The TEXT value stored in state tables. Matches the CHECK constraints.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Field => "field",
            EntityKind::ViewCommon => "view_common",
        }
    }

    /// All kinds, in natural-key prefix order.
    pub fn all() -> [EntityKind; 2] {
        [EntityKind::Field, EntityKind::ViewCommon]
    }
}

impl std::str::FromStr for EntityKind {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "field" => Ok(EntityKind::Field),
            "view_common" => Ok(EntityKind::ViewCommon),
            other => Err(LexicaError::Identity(format!(
                "unknown entity kind: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which text slot of a view-common record a natural key refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewTextTarget {
    /// The screen's purpose description.
    Purpose,
    /// The screen's usage/help text.
    Help,
}

impl ViewTextTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewTextTarget::Purpose => "purpose",
            ViewTextTarget::Help => "help",
        }
    }
}

impl std::str::FromStr for ViewTextTarget {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purpose" => Ok(ViewTextTarget::Purpose),
            "help" => Ok(ViewTextTarget::Help),
            other => Err(LexicaError::Identity(format!(
                "unknown view text target: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ViewTextTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI presentation type of a view detail record. Closed enumeration; the
/// `views.view_type` CHECK constraint mirrors this list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    Form,
    List,
    Kanban,
    Calendar,
    Search,
    Graph,
    Pivot,
    Dashboard,
    Tree,
    Map,
}

impl ViewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewType::Form => "form",
            ViewType::List => "list",
            ViewType::Kanban => "kanban",
            ViewType::Calendar => "calendar",
            ViewType::Search => "search",
            ViewType::Graph => "graph",
            ViewType::Pivot => "pivot",
            ViewType::Dashboard => "dashboard",
            ViewType::Tree => "tree",
            ViewType::Map => "map",
        }
    }
}

impl std::str::FromStr for ViewType {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form" => Ok(ViewType::Form),
            "list" => Ok(ViewType::List),
            "kanban" => Ok(ViewType::Kanban),
            "calendar" => Ok(ViewType::Calendar),
            "search" => Ok(ViewType::Search),
            "graph" => Ok(ViewType::Graph),
            "pivot" => Ok(ViewType::Pivot),
            "dashboard" => Ok(ViewType::Dashboard),
            "tree" => Ok(ViewType::Tree),
            "map" => Ok(ViewType::Map),
            other => Err(LexicaError::Identity(format!(
                "unknown view type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ViewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage treats an entity that already has a row under the same key.
///
/// Validated before any I/O happens; there is no free-form mode string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    /// Write only when the content hash differs from the stored one.
    #[default]
    UpsertIfChanged,
    /// Write unconditionally, ignoring the stored hash.
    ForceOverwrite,
    /// Never touch an existing row; only insert new ones.
    SkipExisting,
}

impl ChangeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeMode::UpsertIfChanged => "upsert_if_changed",
            ChangeMode::ForceOverwrite => "force_overwrite",
            ChangeMode::SkipExisting => "skip_existing",
        }
    }
}

impl std::str::FromStr for ChangeMode {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert_if_changed" => Ok(ChangeMode::UpsertIfChanged),
            "force_overwrite" => Ok(ChangeMode::ForceOverwrite),
            "skip_existing" => Ok(ChangeMode::SkipExisting),
            other => Err(LexicaError::Config(format!("unknown change mode: {}", other))),
        }
    }
}

/// Per-record translation lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationState {
    /// Waiting for the translation stage.
    Pending,
    /// Translated text is present.
    Translated,
    /// The last translation attempt failed; `last_error` holds the detail.
    Failed,
}

impl TranslationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationState::Pending => "pending",
            TranslationState::Translated => "translated",
            TranslationState::Failed => "failed",
        }
    }

    pub fn all() -> [TranslationState; 3] {
        [
            TranslationState::Pending,
            TranslationState::Translated,
            TranslationState::Failed,
        ]
    }
}

impl std::str::FromStr for TranslationState {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TranslationState::Pending),
            "translated" => Ok(TranslationState::Translated),
            "failed" => Ok(TranslationState::Failed),
            other => Err(LexicaError::Storage(format!(
                "unknown translation state: {}",
                other
            ))),
        }
    }
}

/// Per-record document lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Packaged and waiting for the index reconciler.
    Queued,
    /// Confirmed present in the vector store.
    Upserted,
    /// The last upsert attempt failed; `last_error` holds the detail.
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Queued => "queued",
            DocumentState::Upserted => "upserted",
            DocumentState::Failed => "failed",
        }
    }

    pub fn all() -> [DocumentState; 3] {
        [
            DocumentState::Queued,
            DocumentState::Upserted,
            DocumentState::Failed,
        ]
    }
}

impl std::str::FromStr for DocumentState {
    type Err = LexicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DocumentState::Queued),
            "upserted" => Ok(DocumentState::Upserted),
            "failed" => Ok(DocumentState::Failed),
            other => Err(LexicaError::Storage(format!(
                "unknown document state: {}",
                other
            ))),
        }
    }
}

/// Outcome of comparing an entity's current content hash against the stored
/// one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDecision {
    /// No prior record exists.
    New,
    /// The hash differs from the stored one.
    Changed,
    /// The hash matches; reprocessing would be a no-op.
    Unchanged,
}

// =============================================================================
// Tests
// =============================================================================
