// src/catalog/mod.rs

//! Registry of runnable analysis tools.
//!
//! The builtin definition set is embedded TOML (`builtin.toml`). Extra
//! `[[tool]]` entries and `[release.<tool>]` overrides from the engine config
//! are merged in before validation, and everything is loaded exactly once at
//! startup.

pub mod model;
pub mod template;
pub mod validate;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::types::ToolCategory;

pub use model::{
    BinarySpec, RawBinarySpec, RawCatalog, RawCommand, RawToolDefinition, ReleaseOverride,
    ReleaseSpec, ToolDefinition,
};
pub use template::{CommandTemplate, Invocation, RenderContext, Repeat};

const BUILTIN_CATALOG: &str = include_str!("builtin.toml");

/// Immutable, ordered set of tool definitions.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<Arc<ToolDefinition>>,
}

impl ToolCatalog {
    /// The embedded definition set, without any operator additions.
    pub fn builtin() -> Result<Self> {
        Self::load(Vec::new(), &BTreeMap::new())
    }

    /// Builtin definitions plus `extra`, with release `overrides` applied.
    pub fn load(
        extra: Vec<RawToolDefinition>,
        overrides: &BTreeMap<String, ReleaseOverride>,
    ) -> Result<Self> {
        let builtin: RawCatalog = toml::from_str(BUILTIN_CATALOG)
            .map_err(|e| TriageError::CatalogLoad(format!("builtin catalog: {e}")))?;

        let mut raw = builtin.tool;
        raw.extend(extra);
        Self::from_raw(raw, overrides)
    }

    /// Validate a raw definition set.
    pub fn from_raw(
        mut raw: Vec<RawToolDefinition>,
        overrides: &BTreeMap<String, ReleaseOverride>,
    ) -> Result<Self> {
        for (name, ov) in overrides {
            let target = raw
                .iter_mut()
                .find(|t| t.name.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    TriageError::CatalogLoad(format!("[release.{name}] names an unknown tool"))
                })?;
            validate::apply_release_override(target, ov)?;
        }

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(raw.len());
        for def in raw {
            let def = ToolDefinition::try_from(def)?;
            if !seen.insert(def.name.to_lowercase()) {
                return Err(TriageError::CatalogLoad(format!(
                    "duplicate tool identity '{}'",
                    def.name
                )));
            }
            debug!(tool = %def.name, category = %def.category, "catalog entry loaded");
            tools.push(Arc::new(def));
        }

        Ok(Self { tools })
    }

    /// Definitions of one category, in catalog order.
    pub fn list(&self, category: ToolCategory) -> Vec<Arc<ToolDefinition>> {
        self.tools
            .iter()
            .filter(|t| t.category == category)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Arc<ToolDefinition>] {
        &self.tools
    }

    /// Look up a definition by identity (case-insensitive).
    pub fn get(&self, name: &str) -> Result<Arc<ToolDefinition>> {
        let name = name.trim();
        self.tools
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| TriageError::ToolNotFound(name.to_string()))
    }
}
