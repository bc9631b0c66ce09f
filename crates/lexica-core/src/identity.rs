//! Natural-key derivation for pipeline entities.
//!
//! A natural key is a stable string identifying one logical entity within one
//! entity kind, built by a fixed concatenation rule from source technical
//! names. Derivation is pure: the same identifiers always produce the same
//! key, with no time or randomness involved.
//!
//! Key shapes:
//! - field: `field::<model>::<field_name>`
//! - view-common text: `view_common::<action_xmlid>::<target>`

use serde::{Deserialize, Serialize};

use crate::error::{LexicaError, Result};
use crate::types::{EntityKind, ViewTextTarget};

/// Separator between natural-key components.
pub const KEY_SEPARATOR: &str = "::";

fn validate_component(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LexicaError::Identity(format!("{} must not be empty", name)));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(LexicaError::Identity(format!(
            "{} must not contain '{}': {}",
            name, KEY_SEPARATOR, value
        )));
    }
    Ok(())
}

/// A fully-derived natural key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Parse a stored key string back into its typed components.
    pub fn parse(raw: &str) -> Result<ParsedKey> {
        let mut parts = raw.splitn(3, KEY_SEPARATOR);
        let kind = parts.next().unwrap_or_default();
        match kind {
            "field" => {
                let model = parts.next().unwrap_or_default();
                let field_name = parts.next().unwrap_or_default();
                Ok(ParsedKey::Field(FieldKey::new(model, field_name)?))
            }
            "view_common" => {
                let action_xmlid = parts.next().unwrap_or_default();
                let target: ViewTextTarget = parts.next().unwrap_or_default().parse()?;
                Ok(ParsedKey::View(ViewKey::new(action_xmlid, target)?))
            }
            other => Err(LexicaError::Identity(format!(
                "natural key has unknown entity prefix: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed natural key, one variant per entity kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedKey {
    Field(FieldKey),
    View(ViewKey),
}

impl ParsedKey {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ParsedKey::Field(_) => EntityKind::Field,
            ParsedKey::View(_) => EntityKind::ViewCommon,
        }
    }
}

/// Identity of a single model field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldKey {
    model: String,
    field_name: String,
}

impl FieldKey {
    /// Build a field key from technical names. Fails on empty components.
    pub fn new(model: &str, field_name: &str) -> Result<Self> {
        validate_component("model", model)?;
        validate_component("field name", field_name)?;
        Ok(Self {
            model: model.trim().to_string(),
            field_name: field_name.trim().to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey(format!(
            "{}{sep}{}{sep}{}",
            EntityKind::Field.as_str(),
            self.model,
            self.field_name,
            sep = KEY_SEPARATOR
        ))
    }
}

/// Identity of one text slot of a view-common record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewKey {
    action_xmlid: String,
    target: ViewTextTarget,
}

impl ViewKey {
    /// Build a view key from an action identifier and text target.
    pub fn new(action_xmlid: &str, target: ViewTextTarget) -> Result<Self> {
        validate_component("action xmlid", action_xmlid)?;
        Ok(Self {
            action_xmlid: action_xmlid.trim().to_string(),
            target,
        })
    }

    pub fn action_xmlid(&self) -> &str {
        &self.action_xmlid
    }

    pub fn target(&self) -> ViewTextTarget {
        self.target
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey(format!(
            "{}{sep}{}{sep}{}",
            EntityKind::ViewCommon.as_str(),
            self.action_xmlid,
            self.target.as_str(),
            sep = KEY_SEPARATOR
        ))
    }
}
